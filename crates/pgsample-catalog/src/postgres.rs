//! PostgreSQL catalog adapter
//!
//! Column lists come from `pg_catalog.pg_attribute` and foreign keys from
//! `pg_catalog.pg_constraint`. Table names are resolved with `regclass`, so
//! anything the server's `search_path` resolves (`users`, `audit.events`,
//! `"MixedCase"`) works, and referenced tables are reported in the same form.
//!
//! Rows are streamed through a server-side cursor and fetched with the
//! simple-query protocol, so every value arrives in PostgreSQL's canonical
//! text output form, exactly as `pg_dump` would write it. Between
//! `begin_snapshot` and `end_snapshot` every cursor runs inside one
//! `REPEATABLE READ READ ONLY` transaction, so all tables of a dump see the
//! same data. Outside of it each statement gets its own read-only
//! transaction.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let catalog = PostgresCatalog::connect(&settings).await?.with_fetch_size(500);
//! let mut rows = catalog.query_rows("SELECT id, email FROM users").await?;
//! while let Some(row) = rows.next().await { ... }
//! ```

use crate::adapter::{CatalogError, RowSource, RowStream, SchemaIntrospector};
use pgsample_core::ConnectionSettings;

#[cfg(feature = "postgres")]
use pgsample_core::config::DEFAULT_FETCH_SIZE;

#[cfg(feature = "postgres")]
use futures_util::{stream, StreamExt};

#[cfg(feature = "postgres")]
use pgsample_core::strip_statement_terminator;

#[cfg(feature = "postgres")]
use std::collections::VecDeque;

#[cfg(feature = "postgres")]
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(feature = "postgres")]
use tokio_postgres::{error::SqlState, Client, NoTls, SimpleQueryMessage};

#[cfg(feature = "postgres")]
use postgres_native_tls::MakeTlsConnector;

#[cfg(feature = "postgres")]
use native_tls::TlsConnector;

#[cfg(feature = "postgres")]
const CURSOR_NAME: &str = "pgsample_rows";

#[cfg(feature = "postgres")]
const CANONICAL_NAME_QUERY: &str = "SELECT $1::text::regclass::text";

#[cfg(feature = "postgres")]
const COLUMNS_QUERY: &str = r#"
    SELECT a.attname::text
    FROM pg_catalog.pg_attribute a
    WHERE a.attrelid = $1::text::regclass
      AND a.attnum > 0
      AND NOT a.attisdropped
    ORDER BY a.attnum
"#;

#[cfg(feature = "postgres")]
const DEPENDENCIES_QUERY: &str = r#"
    SELECT DISTINCT c.confrelid::regclass::text
    FROM pg_catalog.pg_constraint c
    WHERE c.contype = 'f'
      AND c.conrelid = $1::text::regclass
    ORDER BY 1
"#;

#[cfg(not(feature = "postgres"))]
const NOT_COMPILED: &str =
    "PostgreSQL support not compiled. Rebuild with: cargo build --features postgres";

/// PostgreSQL catalog adapter
pub struct PostgresCatalog {
    #[cfg(feature = "postgres")]
    client: Client,

    /// Set while a dump-wide snapshot transaction is open
    #[cfg(feature = "postgres")]
    in_snapshot: AtomicBool,

    /// Rows per `FETCH` round trip
    #[cfg_attr(not(feature = "postgres"), allow(dead_code))]
    fetch_size: u32,
}

impl PostgresCatalog {
    /// Connect using resolved settings, over TLS when `settings.tls` is set
    #[cfg(feature = "postgres")]
    pub async fn connect(settings: &ConnectionSettings) -> Result<Self, CatalogError> {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&settings.host)
            .port(settings.port)
            .user(&settings.user)
            .dbname(&settings.dbname)
            .application_name("pgsample");
        if let Some(password) = &settings.password {
            config.password(password);
        }

        let client = if settings.tls {
            let connector = TlsConnector::builder()
                .build()
                .map_err(|e| CatalogError::ConfigError(format!(
                    "Failed to create TLS connector: {}", e
                )))?;

            let (client, connection) = config
                .connect(MakeTlsConnector::new(connector))
                .await
                .map_err(|e| connect_error(settings, e))?;
            spawn_connection(settings, connection);
            client
        } else {
            let (client, connection) = config
                .connect(NoTls)
                .await
                .map_err(|e| connect_error(settings, e))?;
            spawn_connection(settings, connection);
            client
        };

        tracing::debug!(server = %settings, tls = settings.tls, "connected to PostgreSQL");

        Ok(Self {
            client,
            in_snapshot: AtomicBool::new(false),
            fetch_size: DEFAULT_FETCH_SIZE,
        })
    }

    /// Create adapter without postgres feature (returns error)
    #[cfg(not(feature = "postgres"))]
    pub async fn connect(_settings: &ConnectionSettings) -> Result<Self, CatalogError> {
        Err(CatalogError::ConfigError(NOT_COMPILED.to_string()))
    }

    /// Set the number of rows pulled per cursor fetch
    pub fn with_fetch_size(mut self, fetch_size: u32) -> Self {
        self.fetch_size = fetch_size.max(1);
        self
    }
}

#[cfg(feature = "postgres")]
fn spawn_connection<C>(settings: &ConnectionSettings, connection: C)
where
    C: std::future::Future<Output = Result<(), tokio_postgres::Error>> + Send + 'static,
{
    let server = settings.to_string();
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!(server = %server, error = %e, "PostgreSQL connection error");
        }
    });
}

#[cfg(feature = "postgres")]
fn connect_error(settings: &ConnectionSettings, e: tokio_postgres::Error) -> CatalogError {
    CatalogError::ConnectionError(format!(
        "Failed to connect to PostgreSQL at {}:{}: {}",
        settings.host, settings.port, describe(&e)
    ))
}

/// Server message when there is one, otherwise the driver's description
#[cfg(feature = "postgres")]
fn describe(e: &tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db) => db.message().to_string(),
        None => e.to_string(),
    }
}

/// Map a driver error raised while working on `table`
#[cfg(feature = "postgres")]
fn classify(table: &str, e: tokio_postgres::Error) -> CatalogError {
    if e.is_closed() {
        return CatalogError::ConnectionError(describe(&e));
    }

    match e.code() {
        Some(code) if *code == SqlState::UNDEFINED_TABLE || *code == SqlState::INVALID_SCHEMA_NAME => {
            CatalogError::TableNotFound(table.to_string())
        }
        Some(code) if *code == SqlState::INSUFFICIENT_PRIVILEGE => {
            CatalogError::PermissionDenied(format!("Cannot access {}: {}", table, describe(&e)))
        }
        _ => CatalogError::QueryError(describe(&e)),
    }
}

#[cfg(feature = "postgres")]
fn query_error(e: tokio_postgres::Error) -> CatalogError {
    if e.is_closed() {
        CatalogError::ConnectionError(describe(&e))
    } else {
        CatalogError::QueryError(describe(&e))
    }
}

/// Cursor state threaded through the row stream
#[cfg(feature = "postgres")]
struct CursorState<'a> {
    client: &'a Client,
    fetch: String,
    fetch_size: usize,
    buffered: VecDeque<crate::adapter::Row>,
    exhausted: bool,
    /// The cursor runs in a transaction opened just for it
    owns_transaction: bool,
}

#[cfg(feature = "postgres")]
impl CursorState<'_> {
    /// Pull the next chunk; closes the cursor and transaction once drained
    async fn fill(&mut self) -> Result<(), CatalogError> {
        let messages = match self.client.simple_query(&self.fetch).await {
            Ok(messages) => messages,
            Err(e) => {
                if self.owns_transaction {
                    let _ = self.client.batch_execute("ROLLBACK").await;
                }
                return Err(query_error(e));
            }
        };

        let mut fetched = 0;
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                fetched += 1;
                self.buffered
                    .push_back((0..row.len()).map(|i| row.get(i).map(str::to_string)).collect());
            }
        }

        if fetched < self.fetch_size {
            self.exhausted = true;
            let close = if self.owns_transaction {
                format!("CLOSE {}; COMMIT", CURSOR_NAME)
            } else {
                format!("CLOSE {}", CURSOR_NAME)
            };
            self.client.batch_execute(&close).await.map_err(query_error)?;
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl SchemaIntrospector for PostgresCatalog {
    #[cfg(feature = "postgres")]
    async fn canonical_name(&self, table: &str) -> Result<String, CatalogError> {
        let row = self.client
            .query_one(CANONICAL_NAME_QUERY, &[&table])
            .await
            .map_err(|e| classify(table, e))?;
        Ok(row.get(0))
    }

    #[cfg(not(feature = "postgres"))]
    async fn canonical_name(&self, _table: &str) -> Result<String, CatalogError> {
        Err(CatalogError::ConfigError(NOT_COMPILED.to_string()))
    }

    #[cfg(feature = "postgres")]
    async fn columns(&self, table: &str) -> Result<Vec<String>, CatalogError> {
        let rows = self.client
            .query(COLUMNS_QUERY, &[&table])
            .await
            .map_err(|e| classify(table, e))?;

        let columns: Vec<String> = rows.iter().map(|row| row.get(0)).collect();
        tracing::debug!(table, columns = columns.len(), "introspected columns");
        Ok(columns)
    }

    #[cfg(not(feature = "postgres"))]
    async fn columns(&self, _table: &str) -> Result<Vec<String>, CatalogError> {
        Err(CatalogError::ConfigError(NOT_COMPILED.to_string()))
    }

    #[cfg(feature = "postgres")]
    async fn dependencies(&self, table: &str) -> Result<Vec<String>, CatalogError> {
        let rows = self.client
            .query(DEPENDENCIES_QUERY, &[&table])
            .await
            .map_err(|e| classify(table, e))?;

        let deps: Vec<String> = rows.iter().map(|row| row.get(0)).collect();
        tracing::debug!(table, ?deps, "introspected foreign keys");
        Ok(deps)
    }

    #[cfg(not(feature = "postgres"))]
    async fn dependencies(&self, _table: &str) -> Result<Vec<String>, CatalogError> {
        Err(CatalogError::ConfigError(NOT_COMPILED.to_string()))
    }

    #[cfg(feature = "postgres")]
    async fn test_connection(&self) -> Result<(), CatalogError> {
        self.client
            .query("SELECT 1", &[])
            .await
            .map_err(|e| CatalogError::ConnectionError(format!(
                "Connection test failed: {}", describe(&e)
            )))?;
        Ok(())
    }

    #[cfg(not(feature = "postgres"))]
    async fn test_connection(&self) -> Result<(), CatalogError> {
        Err(CatalogError::ConfigError(NOT_COMPILED.to_string()))
    }
}

#[async_trait::async_trait]
impl RowSource for PostgresCatalog {
    #[cfg(feature = "postgres")]
    async fn query_rows<'a>(&'a self, sql: &str) -> Result<RowStream<'a>, CatalogError> {
        let sql = strip_statement_terminator(sql);
        tracing::debug!(%sql, fetch_size = self.fetch_size, "opening cursor");

        let owns_transaction = !self.in_snapshot.load(Ordering::Acquire);
        if owns_transaction {
            self.client
                .batch_execute("BEGIN READ ONLY")
                .await
                .map_err(query_error)?;
        }

        let declare = format!("DECLARE {} NO SCROLL CURSOR FOR {}", CURSOR_NAME, sql);
        if let Err(e) = self.client.batch_execute(&declare).await {
            if owns_transaction {
                let _ = self.client.batch_execute("ROLLBACK").await;
            }
            return Err(query_error(e));
        }

        let state = CursorState {
            client: &self.client,
            fetch: format!("FETCH {} FROM {}", self.fetch_size, CURSOR_NAME),
            fetch_size: self.fetch_size as usize,
            buffered: VecDeque::new(),
            exhausted: false,
            owns_transaction,
        };

        let rows = stream::try_unfold(state, |mut state| async move {
            loop {
                if let Some(row) = state.buffered.pop_front() {
                    return Ok::<_, CatalogError>(Some((row, state)));
                }
                if state.exhausted {
                    return Ok(None);
                }
                state.fill().await?;
            }
        });

        Ok(rows.boxed())
    }

    #[cfg(not(feature = "postgres"))]
    async fn query_rows<'a>(&'a self, _sql: &str) -> Result<RowStream<'a>, CatalogError> {
        Err(CatalogError::ConfigError(NOT_COMPILED.to_string()))
    }

    #[cfg(feature = "postgres")]
    async fn begin_snapshot(&self) -> Result<(), CatalogError> {
        self.client
            .batch_execute("BEGIN ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .await
            .map_err(query_error)?;
        self.in_snapshot.store(true, Ordering::Release);
        tracing::debug!("opened snapshot transaction");
        Ok(())
    }

    #[cfg(feature = "postgres")]
    async fn end_snapshot(&self) -> Result<(), CatalogError> {
        if !self.in_snapshot.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        // COMMIT on an aborted transaction rolls it back
        self.client.batch_execute("COMMIT").await.map_err(query_error)
    }
}
