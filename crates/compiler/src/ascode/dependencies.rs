//! Names a workflow uses but does not define.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Marks a name as defined outside the document.
pub const EXTERNAL_SIGIL: char = '@';

/// The part of `name` after the sigil, when `name` is external.
pub fn external(name: &str) -> Option<&str> {
    name.strip_prefix(EXTERNAL_SIGIL)
}

/// Externally scoped names found while validating a workflow, grouped by
/// kind. Every list is sorted and free of duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalDependencies {
    pub repositories: BTreeSet<String>,
    pub variables: BTreeSet<String>,
    pub secrets: BTreeSet<String>,
    pub vcs_servers: BTreeSet<String>,
    pub actions: BTreeSet<String>,
    pub integrations: BTreeSet<String>,
    pub deployments: BTreeSet<String>,
    pub ssh_keys: BTreeSet<String>,
    pub pgp_keys: BTreeSet<String>,
}

impl ExternalDependencies {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.repositories.len()
            + self.variables.len()
            + self.secrets.len()
            + self.vcs_servers.len()
            + self.actions.len()
            + self.integrations.len()
            + self.deployments.len()
            + self.ssh_keys.len()
            + self.pgp_keys.len()
    }

    pub fn merge(&mut self, other: ExternalDependencies) {
        self.repositories.extend(other.repositories);
        self.variables.extend(other.variables);
        self.secrets.extend(other.secrets);
        self.vcs_servers.extend(other.vcs_servers);
        self.actions.extend(other.actions);
        self.integrations.extend(other.integrations);
        self.deployments.extend(other.deployments);
        self.ssh_keys.extend(other.ssh_keys);
        self.pgp_keys.extend(other.pgp_keys);
    }
}
