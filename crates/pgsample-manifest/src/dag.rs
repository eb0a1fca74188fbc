//! Dependency graph (DAG) construction and traversal
//!
//! Nodes are the manifest's tables; an edge `B -> A` means A has a foreign
//! key referencing B, so B's rows must be loaded first. Only edges between
//! manifest tables are kept.

use std::collections::{BTreeSet, HashMap};

/// Table name as written in the manifest
pub type TableName = String;

/// Errors from building or ordering the graph
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("Table '{0}' is listed more than once in the manifest")]
    DuplicateTable(TableName),

    #[error("Cyclic foreign key dependency between tables: {}", .tables.join(", "))]
    Cycle { tables: Vec<TableName> },
}

/// Foreign-key dependency graph restricted to the manifest's tables
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Tables in manifest order; the index is the tie-break key
    nodes: Vec<TableName>,

    index: HashMap<TableName, usize>,

    /// node -> nodes it depends on
    parents: Vec<Vec<usize>>,

    /// node -> nodes that depend on it
    children: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Create a graph with no edges over `tables`, in the given order
    pub fn new<I, S>(tables: I) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = S>,
        S: Into<TableName>,
    {
        let mut nodes = Vec::new();
        let mut index = HashMap::new();

        for table in tables {
            let table = table.into();
            if index.contains_key(&table) {
                return Err(GraphError::DuplicateTable(table));
            }
            index.insert(table.clone(), nodes.len());
            nodes.push(table);
        }

        let count = nodes.len();
        Ok(Self {
            nodes,
            index,
            parents: vec![Vec::new(); count],
            children: vec![Vec::new(); count],
        })
    }

    /// Build a graph from each table's referenced tables
    pub fn from_dependencies<S: AsRef<str>>(
        tables: &[S],
        dependencies: &HashMap<TableName, Vec<TableName>>,
    ) -> Result<Self, GraphError> {
        let mut graph = Self::new(tables.iter().map(|t| t.as_ref().to_string()))?;

        for table in tables {
            let table = table.as_ref();
            if let Some(deps) = dependencies.get(table) {
                for dep in deps {
                    graph.add_dependency(table, dep);
                }
            }
        }

        Ok(graph)
    }

    /// Record that `table` references `depends_on`.
    ///
    /// Returns false when the edge is ignored: either endpoint is outside the
    /// graph, the table references itself, or the edge already exists.
    pub fn add_dependency(&mut self, table: &str, depends_on: &str) -> bool {
        let (Some(&child), Some(&parent)) = (self.index.get(table), self.index.get(depends_on)) else {
            return false;
        };

        // Self-references are loadable in a single COPY block
        if child == parent || self.parents[child].contains(&parent) {
            return false;
        }

        self.parents[child].push(parent);
        self.children[parent].push(child);
        true
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Immediate dependencies of a table
    pub fn parents(&self, table: &str) -> Vec<&TableName> {
        self.index
            .get(table)
            .map(|&i| self.parents[i].iter().map(|&p| &self.nodes[p]).collect())
            .unwrap_or_default()
    }

    /// Load order in which every table follows the tables it references.
    ///
    /// Kahn's algorithm, always taking the ready table that appears earliest
    /// in the manifest, so independent tables keep manifest order and the
    /// result is identical across runs.
    pub fn topological_order(&self) -> Result<Vec<TableName>, GraphError> {
        let mut in_degree: Vec<usize> = self.parents.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &degree)| degree == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(node) = ready.pop_first() {
            order.push(self.nodes[node].clone());

            for &child in &self.children[node] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    ready.insert(child);
                }
            }
        }

        if order.len() == self.nodes.len() {
            return Ok(order);
        }

        let blocked: BTreeSet<usize> = (0..self.nodes.len())
            .filter(|&i| in_degree[i] > 0)
            .collect();
        let tables = self
            .cycle_members(blocked)
            .into_iter()
            .map(|i| self.nodes[i].clone())
            .collect();

        Err(GraphError::Cycle { tables })
    }

    /// Narrow the tables Kahn's algorithm could not place down to the ones on
    /// (or between) cycles, dropping tables that only depend on a cycle.
    fn cycle_members(&self, mut remaining: BTreeSet<usize>) -> BTreeSet<usize> {
        loop {
            let sinks: Vec<usize> = remaining
                .iter()
                .copied()
                .filter(|&i| !self.children[i].iter().any(|c| remaining.contains(c)))
                .collect();

            if sinks.is_empty() {
                return remaining;
            }
            for sink in sinks {
                remaining.remove(&sink);
            }
        }
    }
}
