//! pgsample engine - partial dump generation
//!
//! This crate turns a manifest and a live catalog into a replayable dump:
//! - Query building with `{{var}}` substitution
//! - COPY text row encoding
//! - Dump planning and orchestration

pub mod copy;
pub mod dump;
pub mod errors;
pub mod query;

pub use copy::{decode_copy_line, escape_copy_value, CopyRowEncoder, DecodeError};
pub use dump::{DumpEngine, DumpPlan, DumpSummary, TablePlan, TableSummary};
pub use errors::DumpError;
pub use query::{render_template, QueryBuilder};
