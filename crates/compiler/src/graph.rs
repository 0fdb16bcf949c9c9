//! Generic dependency graph and loop detection.
//!
//! The same routine checks every named sub-graph of a workflow: actions
//! calling actions, stages needing stages, jobs needing jobs inside one stage,
//! and declarative node entries depending on each other.
//!
//! The check strips roots (nodes whose remaining dependencies are all gone)
//! until the graph is empty. A pass that strips nothing while nodes remain
//! means every remaining node sits on, or behind, a loop.

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::{CompileError, Result};

/// A named vertex and the names it depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub depends_on: Vec<String>,
}

impl Node {
    pub fn new(name: impl Into<String>, depends_on: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            depends_on: depends_on.into_iter().map(Into::into).collect(),
        }
    }
}

/// A set of nodes, labelled for error reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    label: String,
    nodes: Vec<Node>,
}

impl Graph {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            nodes: Vec::new(),
        }
    }

    pub fn with_nodes(label: impl Into<String>, nodes: Vec<Node>) -> Self {
        Self {
            label: label.into(),
            nodes,
        }
    }

    /// Fail with [`CompileError::DependencyLoop`] if the graph has a cycle.
    ///
    /// Dependencies on names that are not part of the graph are ignored:
    /// resolving them is the caller's job.
    ///
    /// # Errors
    /// The error lists every node left once no more roots can be stripped.
    pub fn detect_loops(&self) -> Result<()> {
        let known: BTreeSet<&str> = self.nodes.iter().map(|n| n.name.as_str()).collect();

        let mut remaining: Vec<(&str, BTreeSet<&str>)> = self
            .nodes
            .iter()
            .map(|n| {
                let deps = n
                    .depends_on
                    .iter()
                    .map(String::as_str)
                    .filter(|d| known.contains(d))
                    .collect();
                (n.name.as_str(), deps)
            })
            .collect();

        let mut pass = 0usize;
        while !remaining.is_empty() {
            pass += 1;
            let roots: BTreeSet<&str> = remaining
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(name, _)| *name)
                .collect();

            if roots.is_empty() {
                let mut nodes: Vec<String> = remaining.iter().map(|(n, _)| n.to_string()).collect();
                nodes.sort();
                nodes.dedup();
                return Err(CompileError::DependencyLoop {
                    graph: self.label.clone(),
                    nodes,
                });
            }

            debug!(graph = %self.label, pass, stripped = roots.len(), "stripped graph roots");

            remaining.retain(|(name, _)| !roots.contains(name));
            for (_, deps) in remaining.iter_mut() {
                deps.retain(|d| !roots.contains(d));
            }
        }

        Ok(())
    }
}
