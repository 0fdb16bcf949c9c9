//! Execution model of a workflow.
//!
//! All nodes live in one arena owned by [`Workflow`] and are addressed by
//! [`NodeId`]. Edges are stored as child ids in `triggers`; joins refer to
//! their parents by name. Nothing holds a pointer to a parent, so a node's
//! ancestors are found by scanning the arena.

use std::collections::BTreeMap;
use std::fmt;

use catalog::{HookConfig, NotificationTemplate, NotificationType};
use serde::{Deserialize, Serialize};

use crate::error::{CompileError, Result};

/// Operator used by every plain condition the compiler produces.
pub const OPERATOR_EQ: &str = "eq";

pub const CONDITION_STATUS_VARIABLE: &str = "cds.status";
pub const CONDITION_STATUS_SUCCESS: &str = "Success";
pub const CONDITION_MANUAL_VARIABLE: &str = "cds.manual";
pub const CONDITION_MANUAL_TRUE: &str = "true";

/// Number of runs kept when a workflow does not say otherwise.
pub const DEFAULT_HISTORY_LENGTH: i64 = 20;

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlainCondition {
    pub variable: String,
    pub operator: String,
    pub value: String,
}

impl PlainCondition {
    pub fn new(variable: impl Into<String>, operator: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }

    /// `cds.status eq Success`, written `when: [success]` in documents.
    pub fn success() -> Self {
        Self::new(CONDITION_STATUS_VARIABLE, OPERATOR_EQ, CONDITION_STATUS_SUCCESS)
    }

    /// `cds.manual eq true`, written `when: [manual]` in documents.
    pub fn manual() -> Self {
        Self::new(CONDITION_MANUAL_VARIABLE, OPERATOR_EQ, CONDITION_MANUAL_TRUE)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conditions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plain: Vec<PlainCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

impl Conditions {
    pub fn is_empty(&self) -> bool {
        self.plain.is_empty() && self.script.as_deref().map_or(true, str::is_empty)
    }
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// Index of a node in [`Workflow::nodes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a pipeline-like node runs with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration: Option<String>,
    /// Only one run of this node at a time.
    #[serde(default)]
    pub mutex: bool,
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub default_payload: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub default_parameters: BTreeMap<String, String>,
}

/// A hook attached to a node, or the call an outgoing hook node makes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hook {
    pub model: String,
    #[serde(default)]
    pub config: HookConfig,
    #[serde(default)]
    pub conditions: Conditions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Pipeline {
        context: NodeContext,
    },
    /// A node without a pipeline that only fans out to its triggers.
    Fork {
        context: NodeContext,
    },
    OutgoingHook {
        context: NodeContext,
        hook: Hook,
    },
    /// Convergence point of several parents, referenced by name.
    Join {
        parents: Vec<String>,
        #[serde(default)]
        conditions: Conditions,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Empty for joins the compiler synthesized.
    #[serde(default)]
    pub name: String,
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<Hook>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub permissions: BTreeMap<String, i32>,
}

impl Node {
    pub fn new(name: impl Into<String>, reference: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            reference: reference.into(),
            kind,
            triggers: Vec::new(),
            hooks: Vec::new(),
            permissions: BTreeMap::new(),
        }
    }

    pub fn context(&self) -> Option<&NodeContext> {
        match &self.kind {
            NodeKind::Pipeline { context }
            | NodeKind::Fork { context }
            | NodeKind::OutgoingHook { context, .. } => Some(context),
            NodeKind::Join { .. } => None,
        }
    }

    pub fn conditions(&self) -> &Conditions {
        match &self.kind {
            NodeKind::Join { conditions, .. } => conditions,
            NodeKind::Pipeline { context }
            | NodeKind::Fork { context }
            | NodeKind::OutgoingHook { context, .. } => &context.conditions,
        }
    }

    pub fn join_parents(&self) -> Option<&[String]> {
        match &self.kind {
            NodeKind::Join { parents, .. } => Some(parents),
            _ => None,
        }
    }

    pub fn is_join(&self) -> bool {
        matches!(self.kind, NodeKind::Join { .. })
    }

    /// An anonymous join without conditions. It only expresses convergence
    /// and does not appear in documents. Named joins always do.
    pub fn is_trivial_join(&self) -> bool {
        self.is_join() && self.name.is_empty() && self.conditions().is_empty()
    }

    /// Name used in documents: the node name, or the reference of an
    /// anonymous join.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.reference
        } else {
            &self.name
        }
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// When a notification fires for a given run outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    Always,
    /// Only when the outcome differs from the previous run.
    Change,
    Never,
}

impl Policy {
    pub const ACCEPTED: [&'static str; 3] = ["always", "change", "never"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::Change => "change",
            Self::Never => "never",
        }
    }

    /// Parse `token`, naming `field` in the error.
    pub fn parse(field: &'static str, token: &str) -> Result<Self> {
        match token {
            "always" => Ok(Self::Always),
            "change" => Ok(Self::Change),
            "never" => Ok(Self::Never),
            _ => Err(CompileError::InvalidToken {
                field,
                token: token.to_string(),
                accepted: Self::ACCEPTED.to_vec(),
            }),
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub on_success: Policy,
    pub on_failure: Policy,
    pub on_start: bool,
    pub send_to_groups: bool,
    pub send_to_author: bool,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub template: NotificationTemplate,
}

impl NotificationSettings {
    /// Settings applied when a document does not say otherwise.
    pub fn defaults(template: NotificationTemplate) -> Self {
        Self {
            on_success: Policy::Change,
            on_failure: Policy::Always,
            on_start: false,
            send_to_groups: false,
            send_to_author: true,
            recipients: Vec::new(),
            template,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub settings: NotificationSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration: Option<String>,
    /// References of the nodes this notification watches. Empty means all.
    #[serde(default)]
    pub source_node_refs: Vec<String>,
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A materialized workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub nodes: Vec<Node>,
    pub root: NodeId,
    #[serde(default)]
    pub joins: Vec<NodeId>,
    #[serde(default)]
    pub permissions: BTreeMap<String, i32>,
    #[serde(default)]
    pub notifications: Vec<Notification>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub purge_tags: Vec<String>,
    #[serde(default)]
    pub retention_policy: Option<String>,
    #[serde(default = "default_history_length")]
    pub history_length: i64,
}

fn default_history_length() -> i64 {
    DEFAULT_HISTORY_LENGTH
}

impl Workflow {
    /// A workflow reduced to its root node.
    pub fn new(name: impl Into<String>, root: Node) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            nodes: vec![root],
            root: NodeId(0),
            joins: Vec::new(),
            permissions: BTreeMap::new(),
            notifications: Vec::new(),
            metadata: BTreeMap::new(),
            purge_tags: Vec::new(),
            retention_policy: None,
            history_length: DEFAULT_HISTORY_LENGTH,
        }
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| CompileError::NodeNotFound(id.to_string()))
    }

    pub fn root_node(&self) -> Result<&Node> {
        self.node(self.root)
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Look a node up by its document name. Anonymous joins have none.
    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        if name.is_empty() {
            return None;
        }
        self.nodes.iter().position(|n| n.name == name).map(NodeId)
    }

    pub fn node_by_ref(&self, reference: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.reference == reference).map(NodeId)
    }

    /// Nodes whose triggers contain `id`.
    pub fn parents_of(&self, id: NodeId) -> Vec<NodeId> {
        self.ids()
            .filter(|p| self.nodes[p.0].triggers.contains(&id))
            .collect()
    }

    /// Check that every stored id points into the arena.
    pub fn check_ids(&self) -> Result<()> {
        self.root_node()?;
        for id in self.joins.iter().chain(self.nodes.iter().flat_map(|n| n.triggers.iter())) {
            self.node(*id)?;
        }
        Ok(())
    }
}
