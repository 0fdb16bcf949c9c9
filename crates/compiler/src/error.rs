//! Compiler error types.

use std::fmt;

use catalog::CatalogError;
use thiserror::Error;

/// Result type alias for compiler operations.
pub type Result<T> = std::result::Result<T, CompileError>;

/// The kind of entity an error is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Workflow,
    Node,
    Hook,
    HookModel,
    Notification,
    Repository,
    Variable,
    Secret,
    Deployment,
    Action,
    Key,
    Stage,
    Job,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Workflow => "workflow",
            Self::Node => "node",
            Self::Hook => "hook",
            Self::HookModel => "hook model",
            Self::Notification => "notification",
            Self::Repository => "repository",
            Self::Variable => "variable",
            Self::Secret => "secret",
            Self::Deployment => "deployment",
            Self::Action => "action",
            Self::Key => "key",
            Self::Stage => "stage",
            Self::Job => "job",
        };
        f.write_str(s)
    }
}

/// Coarse error taxonomy used by callers to pick a user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The graph cannot be built (second root, unplaceable nodes, payload placement).
    Structural,
    /// A name resolves neither locally nor as an external reference.
    Reference,
    /// A dependency loop.
    Cycle,
    /// A token outside a closed enumeration.
    Schema,
}

/// Errors produced while validating, materializing or exporting a workflow.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    // ------ Structural errors ------

    /// A second entry without dependencies was found.
    #[error("invalid node dependencies: '{node}' should have at least one dependency because the workflow already has a root ('{root}')")]
    SecondRoot { node: String, root: String },

    /// No entry without dependencies.
    #[error("workflow has no root node")]
    MissingRoot,

    /// Entries still pending once the materializer stopped making progress.
    #[error("unable to place nodes: {}", .nodes.join(", "))]
    UnresolvedNodes { nodes: Vec<String> },

    /// A default payload on an entry that has dependencies.
    #[error("default payload cannot be set on another node than the root (node: '{node}')")]
    PayloadOnNonRoot { node: String },

    /// A name outside `[a-zA-Z0-9._-]+`.
    #[error("{kind} name '{name}' must only contain alphanumeric characters, '.', '_' or '-'")]
    InvalidName { kind: EntityKind, name: String },

    /// An execution graph references a node that is not in its arena.
    #[error("node '{0}' not found in workflow graph")]
    NodeNotFound(String),

    /// An entity is internally inconsistent.
    #[error("{kind} '{entity}': {reason}")]
    Invalid {
        kind: EntityKind,
        entity: String,
        reason: String,
    },

    // ------ Reference errors ------

    /// A reference that resolves to no sibling entity.
    #[error("{kind} '{entity}' references unknown {target} '{reference}'")]
    UnknownReference {
        kind: EntityKind,
        entity: String,
        target: EntityKind,
        reference: String,
    },

    /// A required reference is absent.
    #[error("{kind} '{entity}': missing {field}")]
    MissingField {
        kind: EntityKind,
        entity: String,
        field: &'static str,
    },

    // ------ Cycle errors ------

    #[error("dependency loop detected in {graph}: {}", .nodes.join(", "))]
    DependencyLoop { graph: String, nodes: Vec<String> },

    // ------ Schema errors ------

    #[error("invalid {field} '{token}' (accepted: {})", .accepted.join(", "))]
    InvalidToken {
        field: &'static str,
        token: String,
        accepted: Vec<&'static str>,
    },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Every error found while checking one validation phase.
    #[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<CompileError>),
}

impl CompileError {
    /// Build the error for one validation phase: `Ok` when nothing was found,
    /// the error itself when there is one, [`CompileError::Multiple`] otherwise.
    pub fn from_phase(mut errors: Vec<CompileError>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(CompileError::Multiple(errors)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SecondRoot { .. }
            | Self::MissingRoot
            | Self::UnresolvedNodes { .. }
            | Self::PayloadOnNonRoot { .. }
            | Self::InvalidName { .. }
            | Self::NodeNotFound(_)
            | Self::Invalid { .. } => ErrorKind::Structural,
            Self::UnknownReference { .. } | Self::MissingField { .. } => ErrorKind::Reference,
            Self::DependencyLoop { .. } => ErrorKind::Cycle,
            Self::InvalidToken { .. } => ErrorKind::Schema,
            Self::Catalog(CatalogError::UnknownNotificationType { .. }) => ErrorKind::Schema,
            Self::Catalog(_) => ErrorKind::Reference,
            Self::Multiple(errors) => errors
                .first()
                .map(CompileError::kind)
                .unwrap_or(ErrorKind::Structural),
        }
    }

    /// Machine-parseable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SecondRoot { .. } => "SECOND_ROOT",
            Self::MissingRoot => "MISSING_ROOT",
            Self::UnresolvedNodes { .. } => "UNRESOLVED_NODES",
            Self::PayloadOnNonRoot { .. } => "PAYLOAD_ON_NON_ROOT",
            Self::InvalidName { .. } => "INVALID_NAME",
            Self::NodeNotFound(_) => "NODE_NOT_FOUND",
            Self::Invalid { .. } => "INVALID_ENTITY",
            Self::UnknownReference { .. } => "UNKNOWN_REFERENCE",
            Self::MissingField { .. } => "MISSING_FIELD",
            Self::DependencyLoop { .. } => "DEPENDENCY_LOOP",
            Self::InvalidToken { .. } => "INVALID_TOKEN",
            Self::Catalog(CatalogError::UnknownNotificationType { .. }) => "INVALID_TOKEN",
            Self::Catalog(_) => "UNKNOWN_HOOK_MODEL",
            Self::Multiple(_) => "MULTIPLE_ERRORS",
        }
    }

    /// Flatten [`CompileError::Multiple`] into its members.
    pub fn errors(&self) -> Vec<&CompileError> {
        match self {
            Self::Multiple(errors) => errors.iter().flat_map(CompileError::errors).collect(),
            other => vec![other],
        }
    }
}
