//! Mock catalog for testing
//!
//! Holds tables, foreign keys and rows in memory. It's useful for:
//! - Unit testing dump generation without a database
//! - Simulating catalog and query failures
//! - Checking which statements the engine actually ran
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pgsample_catalog::{MockCatalogBuilder, MockTable};
//!
//! let catalog = MockCatalogBuilder::new()
//!     .with_table("users", MockTable::new(["id", "email"])
//!         .with_row([Some("1"), Some("alice@example.com")]))
//!     .with_table("posts", MockTable::new(["id", "user_id"])
//!         .with_dependency("users"))
//!     .build();
//! ```
//!
//! Registering a table also registers its full-table query
//! (`SELECT "id", "email" FROM users`), so default manifest entries work
//! without further setup. Any other statement needs an explicit
//! [`MockCatalog::add_query_result`].
//!
//! Table names are canonical as registered. An alias
//! ([`MockCatalog::add_alias`]) stands in for another spelling of the same
//! table, the way `public.users` and `users` name one PostgreSQL table.

use crate::adapter::{CatalogError, Row, RowSource, RowStream, SchemaIntrospector};
use futures_util::{stream, StreamExt};
use pgsample_core::select_statement;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// An in-memory table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockTable {
    pub columns: Vec<String>,
    pub dependencies: Vec<String>,
    /// Rows aligned with `columns`
    pub rows: Vec<Row>,
}

impl MockTable {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            dependencies: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Add a foreign key to `table`
    pub fn with_dependency(mut self, table: impl Into<String>) -> Self {
        self.dependencies.push(table.into());
        self
    }

    /// Append a row; `None` is SQL NULL
    pub fn with_row<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        self.rows.push(values.into_iter().map(|v| v.map(Into::into)).collect());
        self
    }

    /// Rows restricted to `columns`, in that order.
    ///
    /// Unknown columns come back as NULL.
    pub fn project<S: AsRef<str>>(&self, columns: &[S]) -> Vec<Row> {
        let positions: Vec<Option<usize>> = columns
            .iter()
            .map(|c| self.columns.iter().position(|own| own == c.as_ref()))
            .collect();

        self.rows
            .iter()
            .map(|row| {
                positions
                    .iter()
                    .map(|p| p.and_then(|i| row.get(i).cloned().flatten()))
                    .collect()
            })
            .collect()
    }
}

/// Failure injected part-way through a row stream
#[derive(Debug, Clone)]
struct StreamFailure {
    after_rows: usize,
    error: CatalogError,
}

/// Mock catalog for testing
///
/// Cloning shares the underlying state, so a test can keep a handle for
/// inspecting [`MockCatalog::executed`] after passing the catalog on.
pub struct MockCatalog {
    tables: Arc<RwLock<HashMap<String, MockTable>>>,

    /// Alternative spelling -> canonical table name
    aliases: Arc<RwLock<HashMap<String, String>>>,

    /// Canned results keyed by exact SQL text
    query_results: Arc<RwLock<HashMap<String, Vec<Row>>>>,

    /// Errors to return for catalog lookups of specific tables
    table_errors: Arc<RwLock<HashMap<String, CatalogError>>>,

    /// Errors to return when starting specific statements
    query_errors: Arc<RwLock<HashMap<String, CatalogError>>>,

    stream_failures: Arc<RwLock<HashMap<String, StreamFailure>>>,

    /// Every statement passed to `query_rows`, in order
    executed: Arc<RwLock<Vec<String>>>,

    /// Snapshot boundaries and statements, in order
    session: Arc<RwLock<Vec<String>>>,

    fail_connection: bool,

    /// Simulate query latency (milliseconds)
    latency_ms: u64,
}

/// Entry [`MockCatalog::session`] records for `begin_snapshot`
pub const SNAPSHOT_BEGIN: &str = "BEGIN SNAPSHOT";

/// Entry [`MockCatalog::session`] records for `end_snapshot`
pub const SNAPSHOT_END: &str = "END SNAPSHOT";

impl MockCatalog {
    /// Create a new mock catalog with no tables
    pub fn new() -> Self {
        MockCatalogBuilder::new().build()
    }

    /// Add or replace a table and register its full-table query
    pub async fn add_table(&self, name: impl Into<String>, table: MockTable) {
        let name = name.into();
        let sql = select_statement(&name, &table.columns);
        self.query_results.write().await.insert(sql, table.rows.clone());
        self.tables.write().await.insert(name, table);
    }

    /// Make `alias` another spelling of the registered `table`, including
    /// its full-table query under the alias
    pub async fn add_alias(&self, alias: impl Into<String>, table: impl Into<String>) {
        let alias = alias.into();
        let table = table.into();
        if let Some(existing) = self.tables.read().await.get(&table) {
            let sql = select_statement(&alias, &existing.columns);
            self.query_results.write().await.insert(sql, existing.rows.clone());
        }
        self.aliases.write().await.insert(alias, table);
    }

    /// Return `rows` whenever exactly `sql` is executed
    pub async fn add_query_result(&self, sql: impl Into<String>, rows: Vec<Row>) {
        self.query_results.write().await.insert(sql.into(), rows);
    }

    /// Fail catalog lookups (`columns`, `dependencies`) for a table
    pub async fn add_table_error(&self, table: impl Into<String>, error: CatalogError) {
        self.table_errors.write().await.insert(table.into(), error);
    }

    /// Fail `sql` before it returns any row
    pub async fn add_query_error(&self, sql: impl Into<String>, error: CatalogError) {
        self.query_errors.write().await.insert(sql.into(), error);
    }

    /// Yield `after_rows` rows of `sql`, then fail
    pub async fn add_stream_error(&self, sql: impl Into<String>, after_rows: usize, error: CatalogError) {
        self.stream_failures
            .write()
            .await
            .insert(sql.into(), StreamFailure { after_rows, error });
    }

    /// Configure to fail all connection tests
    pub fn with_connection_failure(mut self) -> Self {
        self.fail_connection = true;
        self
    }

    /// Configure simulated latency for all operations
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Statements run through `query_rows` so far
    pub async fn executed(&self) -> Vec<String> {
        self.executed.read().await.clone()
    }

    /// Snapshot boundaries interleaved with executed statements
    pub async fn session(&self) -> Vec<String> {
        self.session.read().await.clone()
    }

    async fn simulate_latency(&self) {
        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }
    }

    async fn resolve(&self, table: &str) -> Result<String, CatalogError> {
        if let Some(error) = self.table_errors.read().await.get(table) {
            return Err(error.clone());
        }

        let name = self
            .aliases
            .read()
            .await
            .get(table)
            .cloned()
            .unwrap_or_else(|| table.to_string());

        if self.tables.read().await.contains_key(&name) {
            Ok(name)
        } else {
            Err(CatalogError::TableNotFound(table.to_string()))
        }
    }

    async fn lookup(&self, table: &str) -> Result<MockTable, CatalogError> {
        self.simulate_latency().await;

        let name = self.resolve(table).await?;
        self.tables
            .read()
            .await
            .get(&name)
            .cloned()
            .ok_or_else(|| CatalogError::TableNotFound(table.to_string()))
    }
}

impl Default for MockCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MockCatalog {
    fn clone(&self) -> Self {
        Self {
            tables: Arc::clone(&self.tables),
            aliases: Arc::clone(&self.aliases),
            query_results: Arc::clone(&self.query_results),
            table_errors: Arc::clone(&self.table_errors),
            query_errors: Arc::clone(&self.query_errors),
            stream_failures: Arc::clone(&self.stream_failures),
            executed: Arc::clone(&self.executed),
            session: Arc::clone(&self.session),
            fail_connection: self.fail_connection,
            latency_ms: self.latency_ms,
        }
    }
}

#[async_trait::async_trait]
impl SchemaIntrospector for MockCatalog {
    async fn canonical_name(&self, table: &str) -> Result<String, CatalogError> {
        self.simulate_latency().await;
        self.resolve(table).await
    }

    async fn columns(&self, table: &str) -> Result<Vec<String>, CatalogError> {
        Ok(self.lookup(table).await?.columns)
    }

    async fn dependencies(&self, table: &str) -> Result<Vec<String>, CatalogError> {
        Ok(self.lookup(table).await?.dependencies)
    }

    async fn test_connection(&self) -> Result<(), CatalogError> {
        self.simulate_latency().await;

        if self.fail_connection {
            Err(CatalogError::ConnectionError(
                "Simulated connection failure".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl RowSource for MockCatalog {
    async fn query_rows<'a>(&'a self, sql: &str) -> Result<RowStream<'a>, CatalogError> {
        self.simulate_latency().await;
        self.executed.write().await.push(sql.to_string());
        self.session.write().await.push(sql.to_string());

        if let Some(error) = self.query_errors.read().await.get(sql) {
            return Err(error.clone());
        }

        let rows = self
            .query_results
            .read()
            .await
            .get(sql)
            .cloned()
            .ok_or_else(|| CatalogError::QueryError(format!("no mock result for: {}", sql)))?;

        let items: Vec<Result<Row, CatalogError>> = match self.stream_failures.read().await.get(sql) {
            Some(failure) => rows
                .into_iter()
                .take(failure.after_rows)
                .map(Ok)
                .chain(std::iter::once(Err(failure.error.clone())))
                .collect(),
            None => rows.into_iter().map(Ok).collect(),
        };

        Ok(stream::iter(items).boxed())
    }

    async fn begin_snapshot(&self) -> Result<(), CatalogError> {
        self.session.write().await.push(SNAPSHOT_BEGIN.to_string());
        Ok(())
    }

    async fn end_snapshot(&self) -> Result<(), CatalogError> {
        self.session.write().await.push(SNAPSHOT_END.to_string());
        Ok(())
    }
}

/// Builder for creating MockCatalog with multiple tables
pub struct MockCatalogBuilder {
    tables: HashMap<String, MockTable>,
    aliases: HashMap<String, String>,
    query_results: HashMap<String, Vec<Row>>,
    table_errors: HashMap<String, CatalogError>,
    fail_connection: bool,
    latency_ms: u64,
}

impl MockCatalogBuilder {
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
            aliases: HashMap::new(),
            query_results: HashMap::new(),
            table_errors: HashMap::new(),
            fail_connection: false,
            latency_ms: 0,
        }
    }

    /// Add a table and register its full-table query
    pub fn with_table(mut self, name: impl Into<String>, table: MockTable) -> Self {
        let name = name.into();
        self.query_results
            .insert(select_statement(&name, &table.columns), table.rows.clone());
        self.tables.insert(name, table);
        self
    }

    /// Alias an already added table; see [`MockCatalog::add_alias`]
    pub fn with_alias(mut self, alias: impl Into<String>, table: impl Into<String>) -> Self {
        let alias = alias.into();
        let table = table.into();
        if let Some(existing) = self.tables.get(&table) {
            self.query_results
                .insert(select_statement(&alias, &existing.columns), existing.rows.clone());
        }
        self.aliases.insert(alias, table);
        self
    }

    pub fn with_query_result(mut self, sql: impl Into<String>, rows: Vec<Row>) -> Self {
        self.query_results.insert(sql.into(), rows);
        self
    }

    pub fn with_table_error(mut self, table: impl Into<String>, error: CatalogError) -> Self {
        self.table_errors.insert(table.into(), error);
        self
    }

    pub fn with_connection_failure(mut self) -> Self {
        self.fail_connection = true;
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn build(self) -> MockCatalog {
        MockCatalog {
            tables: Arc::new(RwLock::new(self.tables)),
            aliases: Arc::new(RwLock::new(self.aliases)),
            query_results: Arc::new(RwLock::new(self.query_results)),
            table_errors: Arc::new(RwLock::new(self.table_errors)),
            query_errors: Arc::new(RwLock::new(HashMap::new())),
            stream_failures: Arc::new(RwLock::new(HashMap::new())),
            executed: Arc::new(RwLock::new(Vec::new())),
            session: Arc::new(RwLock::new(Vec::new())),
            fail_connection: self.fail_connection,
            latency_ms: self.latency_ms,
        }
    }
}

impl Default for MockCatalogBuilder {
    fn default() -> Self {
        Self::new()
    }
}
