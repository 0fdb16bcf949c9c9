//! Catalogue-level error type.

use thiserror::Error;

/// Errors returned when a name cannot be resolved against a catalogue.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// No incoming hook model is registered under this name.
    #[error("unknown hook model '{0}'")]
    UnknownHookModel(String),

    /// No outgoing hook model is registered under this name.
    #[error("unknown outgoing hook model '{0}'")]
    UnknownOutgoingHookModel(String),

    /// The notification type is not part of the closed set.
    #[error("unknown notification type '{token}' (accepted: {})", .accepted.join(", "))]
    UnknownNotificationType {
        token: String,
        accepted: Vec<&'static str>,
    },
}
