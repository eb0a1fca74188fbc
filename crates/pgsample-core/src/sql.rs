//! SQL text helpers shared by the query builder and the catalog adapters

/// Quote an identifier for PostgreSQL, doubling embedded quotes.
///
/// Always quotes, so mixed-case and reserved-word column names survive.
pub fn quote_ident(name: &str) -> String {
    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push('"');
    for ch in name.chars() {
        if ch == '"' {
            quoted.push('"');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

/// Comma-separated list of quoted column names: `"id", "email"`
pub fn column_list<S: AsRef<str>>(columns: &[S]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Unfiltered projection of `columns` from `table`.
///
/// The table name is emitted as given so schema-qualified names
/// (`audit.events`) keep working. With no columns this degrades to
/// `SELECT FROM table`, which PostgreSQL accepts for zero-column tables.
pub fn select_statement<S: AsRef<str>>(table: &str, columns: &[S]) -> String {
    if columns.is_empty() {
        format!("SELECT FROM {}", table)
    } else {
        format!("SELECT {} FROM {}", column_list(columns), table)
    }
}

/// Trim trailing whitespace and statement terminators.
pub fn strip_statement_terminator(sql: &str) -> &str {
    sql.trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}

/// True when the last line of `sql` holds a `--` comment, so anything
/// appended to that line would be commented out.
///
/// A `--` inside a string literal also counts; callers only use this to
/// decide whether to start a new line.
pub fn ends_with_line_comment(sql: &str) -> bool {
    sql.trim_end().lines().last().is_some_and(|line| line.contains("--"))
}
