//! `MockCatalog` — a test double for the catalogue traits.
//!
//! Starts empty; tests register exactly the models and templates they need
//! and can inspect which names the compiler looked up.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::model::{HookConfig, HookConfigValue, HookModel, NotificationTemplate, NotificationType};
use crate::traits::{HookModelCatalog, TemplateCatalog};

#[derive(Debug, Default, Clone)]
pub struct MockCatalog {
    hooks: BTreeMap<String, HookModel>,
    outgoing: BTreeMap<String, HookModel>,
    templates: BTreeMap<NotificationType, NotificationTemplate>,
    /// Every hook model name looked up (in call order).
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl MockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an incoming hook model whose keys are all configurable strings.
    pub fn with_hook_model<'a>(
        mut self,
        name: &str,
        defaults: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        self.hooks
            .insert(name.to_string(), HookModel::new(name, string_config(defaults)));
        self
    }

    /// Register an outgoing hook model whose keys are all configurable strings.
    pub fn with_outgoing_hook_model<'a>(
        mut self,
        name: &str,
        defaults: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        self.outgoing
            .insert(name.to_string(), HookModel::new(name, string_config(defaults)));
        self
    }

    pub fn with_template(mut self, kind: NotificationType, template: NotificationTemplate) -> Self {
        self.templates.insert(kind, template);
        self
    }

    /// Number of hook model lookups performed so far.
    pub fn lookup_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn record(&self, name: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(name.to_string());
        }
    }
}

impl HookModelCatalog for MockCatalog {
    fn hook_model(&self, name: &str) -> Option<&HookModel> {
        self.record(name);
        self.hooks.get(name)
    }

    fn outgoing_hook_model(&self, name: &str) -> Option<&HookModel> {
        self.record(name);
        self.outgoing.get(name)
    }
}

impl TemplateCatalog for MockCatalog {
    fn default_template(&self, kind: NotificationType) -> NotificationTemplate {
        self.templates.get(&kind).cloned().unwrap_or_default()
    }
}

fn string_config<'a>(defaults: impl IntoIterator<Item = (&'a str, &'a str)>) -> HookConfig {
    defaults
        .into_iter()
        .map(|(k, v)| (k.to_string(), HookConfigValue::string(v)))
        .collect()
}
