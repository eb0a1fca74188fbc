//! Dump manifest parsing and dependency ordering
//!
//! This crate handles:
//! - Parsing the YAML manifest that selects tables, queries and post-actions
//! - Building the foreign-key dependency graph between manifest tables
//! - Producing a stable load order (or reporting the cycle that prevents one)

pub mod manifest;
pub mod dag;

pub use manifest::{Manifest, ManifestItem, ManifestError};
pub use dag::{DependencyGraph, GraphError, TableName};
