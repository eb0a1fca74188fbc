//! Dump orchestration
//!
//! A dump runs in two phases. [`DumpEngine::plan`] does every catalog
//! lookup, validates the manifest against the live schema, orders the tables
//! and builds their queries. Only when that succeeds does
//! [`DumpEngine::write_plan`] start writing, so schema problems and FK
//! cycles never leave a partial dump behind.
//!
//! Output layout:
//!
//! ```text
//! preamble        comment header, BEGIN, session SETs
//! per table       header comment, COPY ... FROM stdin, rows, \.
//!                 post-actions, each terminated by ';'
//! trailer         COMMIT, completion marker
//! ```

use crate::copy::CopyRowEncoder;
use crate::errors::DumpError;
use crate::query::QueryBuilder;
use futures_util::TryStreamExt;
use pgsample_catalog::{CatalogError, RowSource, SchemaIntrospector};
use pgsample_core::{column_list, ends_with_line_comment, strip_statement_terminator};
use pgsample_manifest::{DependencyGraph, GraphError, Manifest, ManifestItem, TableName};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;

/// Marker downstream tooling looks for to tell a finished dump from a
/// truncated one
pub const COMPLETION_MARKER: &str = "PostgreSQL database dump complete";

/// Session settings applied before any data is loaded
const SESSION_SETTINGS: &[&str] = &[
    "SET statement_timeout = 0;",
    "SET client_encoding = 'UTF8';",
    "SET standard_conforming_strings = on;",
    "SET check_function_bodies = false;",
    "SET client_min_messages = warning;",
];

/// Everything needed to dump one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePlan {
    /// Name as written in the manifest; used in the dump output
    pub table: TableName,
    /// Catalog spelling; the key into [`DumpPlan::graph`]
    pub canonical: TableName,
    /// COPY column list, in order
    pub columns: Vec<String>,
    /// Statement producing the rows
    pub sql: String,
    pub post_actions: Vec<String>,
}

/// Resolved dump: tables in load order plus the graph used to order them.
///
/// The graph is keyed by canonical table names.
#[derive(Debug, Clone)]
pub struct DumpPlan {
    pub tables: Vec<TablePlan>,
    pub graph: DependencyGraph,
}

impl DumpPlan {
    /// Table names in load order
    pub fn order(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.table.as_str()).collect()
    }
}

/// Per-table outcome of a dump
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSummary {
    pub table: TableName,
    pub rows: u64,
    pub post_actions: usize,
}

/// Outcome of a successful dump
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DumpSummary {
    pub tables: Vec<TableSummary>,
    pub total_rows: u64,
}

/// Generates dumps from a manifest against one database
pub struct DumpEngine<'a, D: ?Sized> {
    db: &'a D,
}

impl<'a, D> DumpEngine<'a, D>
where
    D: SchemaIntrospector + RowSource + ?Sized,
{
    pub fn new(db: &'a D) -> Self {
        Self { db }
    }

    /// Introspect, validate and order the manifest's tables.
    ///
    /// Nothing is written. Tables are visited in manifest order, so the
    /// first failing table in the manifest is the one reported. Every name
    /// is resolved to its canonical spelling first, so `users` and
    /// `public.users` are one table both for duplicate detection and for
    /// matching foreign keys.
    pub async fn plan(&self, manifest: &Manifest) -> Result<DumpPlan, DumpError> {
        // Reject literal duplicates before touching the database
        DependencyGraph::new(manifest.table_names())?;

        let mut keys: Vec<TableName> = Vec::with_capacity(manifest.tables.len());
        let mut items: HashMap<TableName, &ManifestItem> = HashMap::new();
        let mut columns: HashMap<TableName, Vec<String>> = HashMap::new();
        let mut dependencies: HashMap<TableName, Vec<TableName>> = HashMap::new();

        for item in &manifest.tables {
            let table = item.table.as_str();
            let schema_error = |source: CatalogError| DumpError::SchemaQuery {
                table: table.to_string(),
                source,
            };

            let key = self.db.canonical_name(table).await.map_err(schema_error)?;
            if items.contains_key(&key) {
                return Err(DumpError::DuplicateTable(item.table.clone()));
            }

            let existing = self.db.columns(table).await.map_err(schema_error)?;

            let selected = match item.explicit_columns() {
                Some(explicit) => {
                    if let Some(missing) = explicit.iter().find(|c| !existing.contains(*c)) {
                        return Err(DumpError::UnknownColumn {
                            table: table.to_string(),
                            column: missing.clone(),
                        });
                    }
                    explicit.to_vec()
                }
                None => existing,
            };

            let deps = self.db.dependencies(table).await.map_err(schema_error)?;

            tracing::debug!(table, canonical = %key, columns = selected.len(), ?deps, "planned table");

            items.insert(key.clone(), item);
            columns.insert(key.clone(), selected);
            dependencies.insert(key.clone(), deps);
            keys.push(key);
        }

        let graph = DependencyGraph::from_dependencies(keys.as_slice(), &dependencies)?;
        let order = graph.topological_order().map_err(|err| match err {
            GraphError::Cycle { tables } => DumpError::CyclicDependency {
                tables: tables
                    .iter()
                    .map(|key| items.get(key).map_or_else(|| key.clone(), |item| item.table.clone()))
                    .collect(),
            },
            other => other.into(),
        })?;

        let builder = QueryBuilder::new(&manifest.vars);
        let mut tables = Vec::with_capacity(order.len());

        for key in order {
            let Some(item) = items.get(&key) else {
                continue;
            };
            let cols = columns.remove(&key).unwrap_or_default();
            let sql = builder.build(item, cols.as_slice());
            tracing::debug!(table = %item.table, %sql, "built query");

            tables.push(TablePlan {
                table: item.table.clone(),
                canonical: key,
                columns: cols,
                sql,
                post_actions: item.post_actions.clone(),
            });
        }

        Ok(DumpPlan { tables, graph })
    }

    /// Plan `manifest` and write the complete dump to `out`
    pub async fn write_dump<W: Write + ?Sized>(
        &self,
        manifest: &Manifest,
        out: &mut W,
    ) -> Result<DumpSummary, DumpError> {
        let plan = self.plan(manifest).await?;
        self.write_plan(&plan, out).await
    }

    /// Write a dump for an already resolved plan.
    ///
    /// All tables are read from one database snapshot. Stops at the first
    /// error; whatever was written up to that point is left in `out` for the
    /// caller to discard.
    pub async fn write_plan<W: Write + ?Sized>(
        &self,
        plan: &DumpPlan,
        out: &mut W,
    ) -> Result<DumpSummary, DumpError> {
        self.db.begin_snapshot().await.map_err(DumpError::Snapshot)?;

        match self.write_tables(plan, out).await {
            Ok(summary) => {
                self.db.end_snapshot().await.map_err(DumpError::Snapshot)?;
                Ok(summary)
            }
            Err(err) => {
                if let Err(e) = self.db.end_snapshot().await {
                    tracing::warn!(error = %e, "could not release snapshot");
                }
                Err(err)
            }
        }
    }

    async fn write_tables<W: Write + ?Sized>(
        &self,
        plan: &DumpPlan,
        out: &mut W,
    ) -> Result<DumpSummary, DumpError> {
        let mut summary = DumpSummary::default();
        let mut encoder = CopyRowEncoder::new();

        write_preamble(out)?;

        for table in &plan.tables {
            let rows = self.copy_table(table, &mut encoder, out).await?;

            for action in &table.post_actions {
                write_post_action(out, action)?;
            }
            if !table.post_actions.is_empty() {
                writeln!(out)?;
            }

            tracing::info!(
                table = %table.table,
                rows,
                post_actions = table.post_actions.len(),
                "dumped table"
            );

            summary.total_rows += rows;
            summary.tables.push(TableSummary {
                table: table.table.clone(),
                rows,
                post_actions: table.post_actions.len(),
            });
        }

        write_trailer(out)?;
        out.flush()?;

        Ok(summary)
    }

    /// Emit one COPY block, streaming rows straight from the database
    async fn copy_table<W: Write + ?Sized>(
        &self,
        table: &TablePlan,
        encoder: &mut CopyRowEncoder,
        out: &mut W,
    ) -> Result<u64, DumpError> {
        let query_error = |source: CatalogError| DumpError::QueryExecution {
            table: table.table.clone(),
            source,
        };

        let mut rows = self.db.query_rows(&table.sql).await.map_err(query_error)?;

        begin_table(out, &table.table, table.columns.as_slice())?;

        let mut count = 0u64;
        while let Some(row) = rows.try_next().await.map_err(query_error)? {
            encoder.write_row(out, row.as_slice())?;
            count += 1;
        }

        end_table(out)?;
        Ok(count)
    }
}

/// Header comment, transaction start and session settings
pub fn write_preamble<W: Write + ?Sized>(out: &mut W) -> std::io::Result<()> {
    writeln!(out, "--")?;
    writeln!(out, "-- PostgreSQL database dump")?;
    writeln!(out, "--")?;
    writeln!(out)?;
    writeln!(out, "BEGIN;")?;
    writeln!(out)?;
    for setting in SESSION_SETTINGS {
        writeln!(out, "{}", setting)?;
    }
    writeln!(out)
}

/// Table header comment and the COPY statement
pub fn begin_table<W: Write + ?Sized, S: AsRef<str>>(
    out: &mut W,
    table: &str,
    columns: &[S],
) -> std::io::Result<()> {
    writeln!(out, "--")?;
    writeln!(out, "-- Data for Name: {}; Type: TABLE DATA", table)?;
    writeln!(out, "--")?;
    writeln!(out)?;
    writeln!(out, "COPY {} ({}) FROM stdin;", table, column_list(columns))
}

/// End-of-data marker closing a COPY block
pub fn end_table<W: Write + ?Sized>(out: &mut W) -> std::io::Result<()> {
    writeln!(out, "\\.")?;
    writeln!(out)
}

/// A post-action as a single terminated statement
pub fn write_post_action<W: Write + ?Sized>(out: &mut W, sql: &str) -> std::io::Result<()> {
    let sql = strip_statement_terminator(sql.trim_start());
    if ends_with_line_comment(sql) {
        writeln!(out, "{}\n;", sql)
    } else {
        writeln!(out, "{};", sql)
    }
}

/// Transaction commit and completion marker
pub fn write_trailer<W: Write + ?Sized>(out: &mut W) -> std::io::Result<()> {
    writeln!(out, "COMMIT;")?;
    writeln!(out)?;
    writeln!(out, "--")?;
    writeln!(out, "-- {}", COMPLETION_MARKER)?;
    writeln!(out, "--")
}
