//! Database catalog and row access for dump generation
//!
//! The dump engine talks to the database through two traits:
//! - [`SchemaIntrospector`] - column lists and foreign-key references
//! - [`RowSource`] - streaming the rows of an arbitrary SELECT, optionally
//!   all from one snapshot
//!
//! ## Features
//!
//! - `postgres` - [`PostgresCatalog`] backed by tokio-postgres
//!
//! [`MockCatalog`] is always available for tests and demos.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pgsample_catalog::{PostgresCatalog, SchemaIntrospector};
//!
//! let catalog = PostgresCatalog::connect(&settings).await?;
//! catalog.test_connection().await?;
//! let columns = catalog.columns("users").await?;
//! ```

pub mod adapter;
pub mod mock;
pub mod postgres;

pub use adapter::{CatalogError, Row, RowSource, RowStream, SchemaIntrospector};
pub use mock::{MockCatalog, MockCatalogBuilder, MockTable, SNAPSHOT_BEGIN, SNAPSHOT_END};
pub use postgres::PostgresCatalog;
