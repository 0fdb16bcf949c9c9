//! Catalogue entry types shared by the compiler and its callers.
//!
//! Hook configurations are persisted alongside the execution graph, so these
//! types derive `serde` traits.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::CatalogError;

// ---------------------------------------------------------------------------
// Hook configuration
// ---------------------------------------------------------------------------

/// Plain string configuration value.
pub const HOOK_CONFIG_TYPE_STRING: &str = "string";
/// Value naming a project integration.
pub const HOOK_CONFIG_TYPE_INTEGRATION: &str = "integration";

/// One configuration key of a hook, as stored on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookConfigValue {
    pub value: String,
    /// Whether users may override the model default.
    pub configurable: bool,
    #[serde(rename = "type")]
    pub kind: String,
}

impl HookConfigValue {
    /// A configurable string value.
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            configurable: true,
            kind: HOOK_CONFIG_TYPE_STRING.to_string(),
        }
    }

    /// A value fixed by the model that users cannot override.
    pub fn fixed(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            configurable: false,
            kind: HOOK_CONFIG_TYPE_STRING.to_string(),
        }
    }

    /// A configurable value that names a project integration.
    pub fn integration(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            configurable: true,
            kind: HOOK_CONFIG_TYPE_INTEGRATION.to_string(),
        }
    }
}

/// Hook configuration keyed by configuration name.
pub type HookConfig = BTreeMap<String, HookConfigValue>;

/// A hook model: a named hook kind and its declared default configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookModel {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default_config: HookConfig,
}

impl HookModel {
    pub fn new(name: impl Into<String>, default_config: HookConfig) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            default_config,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Closed set of notification types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Email,
    Jabber,
    Vcs,
    /// Forwards run events to a project integration.
    Event,
}

impl NotificationType {
    pub const ALL: [NotificationType; 4] = [
        NotificationType::Email,
        NotificationType::Jabber,
        NotificationType::Vcs,
        NotificationType::Event,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Jabber => "jabber",
            Self::Vcs => "vcs",
            Self::Event => "event",
        }
    }

    /// Tokens accepted by [`FromStr`].
    pub fn accepted() -> Vec<&'static str> {
        Self::ALL.iter().map(|t| t.as_str()).collect()
    }

    /// Whether this type only makes sense with an integration name.
    pub fn requires_integration(&self) -> bool {
        matches!(self, Self::Event)
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CatalogError::UnknownNotificationType {
                token: s.to_string(),
                accepted: Self::accepted(),
            })
    }
}

/// Message template used when a notification is sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationTemplate {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subject: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,
}

impl NotificationTemplate {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }
}
