use pgsample_catalog::CatalogError;
use pgsample_manifest::GraphError;

/// Fatal errors that abort a dump
#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error("Schema query failed for table '{table}': {source}")]
    SchemaQuery {
        table: String,
        #[source]
        source: CatalogError,
    },

    #[error("Cyclic foreign key dependency between tables: {}", .tables.join(", "))]
    CyclicDependency { tables: Vec<String> },

    #[error("Table '{0}' is listed more than once in the manifest")]
    DuplicateTable(String),

    #[error("Column '{column}' does not exist in table '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("Query failed for table '{table}': {source}")]
    QueryExecution {
        table: String,
        #[source]
        source: CatalogError,
    },

    #[error("Could not read from a consistent snapshot: {0}")]
    Snapshot(#[source] CatalogError),

    #[error("Failed to write dump output: {0}")]
    Output(#[from] std::io::Error),
}

impl From<GraphError> for DumpError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::DuplicateTable(table) => DumpError::DuplicateTable(table),
            GraphError::Cycle { tables } => DumpError::CyclicDependency { tables },
        }
    }
}
