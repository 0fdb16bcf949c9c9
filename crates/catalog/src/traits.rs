//! The catalogue traits — the contract the compiler queries through.

use crate::{CatalogError, HookModel, NotificationTemplate, NotificationType};

/// Read-only lookup of hook models by name.
///
/// Incoming hooks (attached to a node) and outgoing hooks (a node that calls
/// out) live in separate namespaces: the same name may exist in both.
pub trait HookModelCatalog: Send + Sync {
    fn hook_model(&self, name: &str) -> Option<&HookModel>;

    fn outgoing_hook_model(&self, name: &str) -> Option<&HookModel>;

    /// Like [`HookModelCatalog::hook_model`] but fails on unknown names.
    fn require_hook_model(&self, name: &str) -> Result<&HookModel, CatalogError> {
        self.hook_model(name)
            .ok_or_else(|| CatalogError::UnknownHookModel(name.to_string()))
    }

    fn require_outgoing_hook_model(&self, name: &str) -> Result<&HookModel, CatalogError> {
        self.outgoing_hook_model(name)
            .ok_or_else(|| CatalogError::UnknownOutgoingHookModel(name.to_string()))
    }
}

/// Default notification template per notification type.
pub trait TemplateCatalog: Send + Sync {
    fn default_template(&self, kind: NotificationType) -> NotificationTemplate;
}
