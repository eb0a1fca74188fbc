//! Dump manifest parsing
//!
//! A manifest names the tables to dump, optionally with a custom row query,
//! an explicit column list and SQL to run after the table's data:
//!
//! ```yaml
//! vars:
//!   max_user_id: 2
//! tables:
//!   - table: users
//!     query: "SELECT * FROM users WHERE id <= {{max_user_id}}"
//!     columns: [id, username, email]
//!     post_actions:
//!       - SELECT pg_catalog.setval('users_id_seq', 100, true)
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Parsed dump manifest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Template variables available to every table query
    #[serde(default, deserialize_with = "deserialize_vars")]
    pub vars: HashMap<String, String>,

    /// Tables to dump. Order is a hint; dependencies decide the final order.
    #[serde(default)]
    pub tables: Vec<ManifestItem>,
}

/// One table's dump specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestItem {
    /// Table name, optionally schema-qualified
    pub table: String,

    /// Custom row-selection query template
    #[serde(default)]
    pub query: Option<String>,

    /// Explicit projection; restricts both SELECT and COPY header
    #[serde(default)]
    pub columns: Option<Vec<String>>,

    /// SQL statements emitted after the table's data block
    #[serde(default)]
    pub post_actions: Vec<String>,
}

impl ManifestItem {
    /// Create an item that dumps every row and column of `table`
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            query: None,
            columns: None,
            post_actions: Vec::new(),
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_post_action(mut self, sql: impl Into<String>) -> Self {
        self.post_actions.push(sql.into());
        self
    }

    /// Explicit column list, if one was given and is non-empty
    pub fn explicit_columns(&self) -> Option<&[String]> {
        match &self.columns {
            Some(cols) if !cols.is_empty() => Some(cols.as_slice()),
            _ => None,
        }
    }
}

impl Manifest {
    /// Load manifest from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ManifestError::IoError(path.display().to_string(), e.to_string()))?;

        let manifest = Self::from_yaml(&contents)?;
        tracing::debug!(
            path = %path.display(),
            tables = manifest.tables.len(),
            vars = manifest.vars.len(),
            "loaded manifest"
        );
        Ok(manifest)
    }

    /// Parse manifest from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ManifestError> {
        // An empty document is a valid, empty manifest
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(yaml).map_err(|e| ManifestError::ParseError(e.to_string()))
    }

    /// Table names in manifest order
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.table.as_str()).collect()
    }

    /// Look up the entry for a table
    pub fn get(&self, table: &str) -> Option<&ManifestItem> {
        self.tables.iter().find(|t| t.table == table)
    }

    /// Table names listed more than once, in order of first repetition
    pub fn duplicate_tables(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for item in &self.tables {
            if !seen.insert(item.table.as_str()) && !duplicates.contains(&item.table.as_str()) {
                duplicates.push(item.table.as_str());
            }
        }
        duplicates
    }
}

/// Accept any YAML scalar as a variable value, storing its text form.
fn deserialize_vars<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    let raw: Option<HashMap<String, Value>> = Option::deserialize(deserializer)?;
    let mut vars = HashMap::new();

    for (name, value) in raw.unwrap_or_default() {
        let text = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => String::new(),
            _ => {
                return Err(D::Error::custom(format!(
                    "variable '{}' must be a scalar value",
                    name
                )))
            }
        };
        vars.insert(name, text);
    }

    Ok(vars)
}

/// Errors from reading a manifest
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Failed to read manifest {0}: {1}")]
    IoError(String, String),

    #[error("Failed to parse manifest: {0}")]
    ParseError(String),
}
