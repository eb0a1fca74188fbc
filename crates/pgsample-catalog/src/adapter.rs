//! Catalog traits used by the dump engine

use futures_util::stream::BoxStream;

/// One result row: the text form of each value, `None` for SQL NULL
pub type Row = Vec<Option<String>>;

/// Lazy, finite, non-restartable sequence of rows
pub type RowStream<'a> = BoxStream<'a, Result<Row, CatalogError>>;

/// Errors that can occur when talking to the database
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Query failed: {0}")]
    QueryError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Read-only access to the schema catalog
#[async_trait::async_trait]
pub trait SchemaIntrospector: Send + Sync {
    /// Single spelling for `table`, matching the names `dependencies`
    /// reports.
    ///
    /// `users` and `public.users` resolve to the same value when they name
    /// the same table.
    async fn canonical_name(&self, table: &str) -> Result<String, CatalogError>;

    /// Column names of `table` in ordinal order
    async fn columns(&self, table: &str) -> Result<Vec<String>, CatalogError>;

    /// Tables that `table` references through foreign keys, spelled as
    /// `canonical_name` spells them.
    ///
    /// May include `table` itself for self-referencing tables.
    async fn dependencies(&self, table: &str) -> Result<Vec<String>, CatalogError>;

    /// Cheap round trip used as a health check before dumping
    async fn test_connection(&self) -> Result<(), CatalogError>;
}

/// Execution of row-returning statements
#[async_trait::async_trait]
pub trait RowSource: Send + Sync {
    /// Run `sql` and stream its rows.
    ///
    /// Errors starting the statement are returned directly; errors while
    /// fetching surface as an `Err` item, after which the stream ends.
    async fn query_rows<'a>(&'a self, sql: &str) -> Result<RowStream<'a>, CatalogError>;

    /// Read every following `query_rows` call from one snapshot, until
    /// `end_snapshot`
    async fn begin_snapshot(&self) -> Result<(), CatalogError> {
        Ok(())
    }

    /// Release the snapshot taken by `begin_snapshot`
    async fn end_snapshot(&self) -> Result<(), CatalogError> {
        Ok(())
    }
}
