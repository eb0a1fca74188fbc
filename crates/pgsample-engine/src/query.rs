//! Per-table SELECT construction

use pgsample_core::{
    column_list, ends_with_line_comment, select_statement, strip_statement_terminator,
};
use pgsample_manifest::ManifestItem;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("valid placeholder regex")
});

/// Alias used when a custom query is narrowed to explicit columns
const SUBSET_ALIAS: &str = "pgsample_subset";

/// Substitute `{{name}}` placeholders with values from `vars`.
///
/// Whitespace inside the braces is allowed. Placeholders without a matching
/// variable are kept exactly as written.
pub fn render_template(template: &str, vars: &HashMap<String, String>) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures| match vars.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Builds the statement that produces a table's COPY rows
#[derive(Debug, Clone, Copy)]
pub struct QueryBuilder<'a> {
    vars: &'a HashMap<String, String>,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(vars: &'a HashMap<String, String>) -> Self {
        Self { vars }
    }

    /// SQL for `item`, projecting `columns`.
    ///
    /// `columns` is the final COPY column list: the manifest's explicit list
    /// when present, otherwise the introspected one.
    pub fn build<S: AsRef<str>>(&self, item: &ManifestItem, columns: &[S]) -> String {
        let Some(template) = &item.query else {
            return select_statement(&item.table, columns);
        };

        let rendered = render_template(template, self.vars);
        let rendered = strip_statement_terminator(&rendered);

        match item.explicit_columns() {
            Some(explicit) => {
                // Keep the closing paren off a trailing `--` comment
                let close = if ends_with_line_comment(rendered) { "\n)" } else { ")" };
                format!(
                    "SELECT {} FROM ({}{} AS {}",
                    column_list(explicit),
                    rendered,
                    close,
                    SUBSET_ALIAS
                )
            }
            None => rendered.to_string(),
        }
    }
}
