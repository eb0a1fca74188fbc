//! pgsample core
//!
//! Shared configuration schema and SQL text helpers used by every other
//! pgsample crate.

pub mod config;
pub mod sql;

pub use config::{Config, ConfigError, ConnectionConfig, ConnectionSettings, DumpConfig};
pub use sql::{
    column_list, ends_with_line_comment, quote_ident, select_statement, strip_statement_terminator,
};
