//! Built-in hook models and notification templates.

use std::collections::BTreeMap;

use crate::model::{HookConfig, HookConfigValue, HookModel, NotificationTemplate, NotificationType};
use crate::traits::{HookModelCatalog, TemplateCatalog};

pub const REPOSITORY_WEBHOOK_MODEL: &str = "RepositoryWebHook";
pub const WEBHOOK_MODEL: &str = "WebHook";
pub const SCHEDULER_MODEL: &str = "Scheduler";
pub const KAFKA_MODEL: &str = "Kafka";
pub const WORKFLOW_MODEL: &str = "Workflow";

pub const CONFIG_EVENT_FILTER: &str = "eventFilter";
pub const CONFIG_METHOD: &str = "method";
pub const CONFIG_CRON: &str = "cron";
pub const CONFIG_TIMEZONE: &str = "timezone";
pub const CONFIG_PAYLOAD: &str = "payload";
pub const CONFIG_INTEGRATION: &str = "integration";
pub const CONFIG_TOPIC: &str = "topic";
pub const CONFIG_URL: &str = "URL";
pub const CONFIG_TARGET_PROJECT: &str = "target_project";
pub const CONFIG_TARGET_WORKFLOW: &str = "target_workflow";
pub const CONFIG_TARGET_HOOK: &str = "target_hook";

const DEFAULT_SUBJECT: &str = "{{.cds.project}}/{{.cds.workflow}}#{{.cds.version}} {{.cds.status}}";
const DEFAULT_EMAIL_BODY: &str = "Project : {{.cds.project}}\n\
Workflow : {{.cds.workflow}}#{{.cds.version}}\n\
Pipeline : {{.cds.node}}\n\
Status : {{.cds.status}}\n\
Details : {{.cds.buildURL}}\n\
Triggered by : {{.cds.triggered_by.username}}\n\
Branch : {{.git.branch | default \"n/a\"}}";
const DEFAULT_JABBER_BODY: &str = "{{.cds.buildURL}}";
const DEFAULT_VCS_BODY: &str = "[[- if .cds.status]]\n\
Status: [[.cds.status]]\n\
[[- end]]\n\
Details: [[.cds.buildURL]]";

/// The platform's built-in catalogue.
#[derive(Debug, Clone)]
pub struct BuiltinCatalog {
    hooks: BTreeMap<String, HookModel>,
    outgoing: BTreeMap<String, HookModel>,
}

impl BuiltinCatalog {
    pub fn new() -> Self {
        let hooks = [
            HookModel::new(
                REPOSITORY_WEBHOOK_MODEL,
                config([(CONFIG_EVENT_FILTER, HookConfigValue::string("push"))]),
            )
            .with_description("Triggered by a push on the application repository"),
            HookModel::new(
                WEBHOOK_MODEL,
                config([(CONFIG_METHOD, HookConfigValue::string("POST"))]),
            )
            .with_description("Triggered by an HTTP call"),
            HookModel::new(
                SCHEDULER_MODEL,
                config([
                    (CONFIG_CRON, HookConfigValue::string("10 * * * *")),
                    (CONFIG_TIMEZONE, HookConfigValue::string("UTC")),
                    (CONFIG_PAYLOAD, HookConfigValue::string("{}")),
                ]),
            )
            .with_description("Triggered on a cron schedule"),
            HookModel::new(
                KAFKA_MODEL,
                config([
                    (CONFIG_INTEGRATION, HookConfigValue::integration("")),
                    (CONFIG_TOPIC, HookConfigValue::string("")),
                ]),
            )
            .with_description("Triggered by a message on a Kafka topic"),
        ];

        let outgoing = [
            HookModel::new(
                WEBHOOK_MODEL,
                config([
                    (CONFIG_URL, HookConfigValue::string("")),
                    (CONFIG_METHOD, HookConfigValue::string("POST")),
                    (CONFIG_PAYLOAD, HookConfigValue::string("{}")),
                ]),
            )
            .with_description("Calls an HTTP endpoint"),
            HookModel::new(
                WORKFLOW_MODEL,
                config([
                    (CONFIG_TARGET_PROJECT, HookConfigValue::string("")),
                    (CONFIG_TARGET_WORKFLOW, HookConfigValue::string("")),
                    (CONFIG_TARGET_HOOK, HookConfigValue::string("")),
                ]),
            )
            .with_description("Triggers another workflow"),
        ];

        Self {
            hooks: hooks.into_iter().map(|m| (m.name.clone(), m)).collect(),
            outgoing: outgoing.into_iter().map(|m| (m.name.clone(), m)).collect(),
        }
    }
}

impl Default for BuiltinCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl HookModelCatalog for BuiltinCatalog {
    fn hook_model(&self, name: &str) -> Option<&HookModel> {
        self.hooks.get(name)
    }

    fn outgoing_hook_model(&self, name: &str) -> Option<&HookModel> {
        self.outgoing.get(name)
    }
}

impl TemplateCatalog for BuiltinCatalog {
    fn default_template(&self, kind: NotificationType) -> NotificationTemplate {
        match kind {
            NotificationType::Email => NotificationTemplate::new(DEFAULT_SUBJECT, DEFAULT_EMAIL_BODY),
            NotificationType::Jabber => NotificationTemplate::new(DEFAULT_SUBJECT, DEFAULT_JABBER_BODY),
            NotificationType::Vcs => NotificationTemplate::new("", DEFAULT_VCS_BODY),
            NotificationType::Event => NotificationTemplate::default(),
        }
    }
}

fn config<const N: usize>(entries: [(&str, HookConfigValue); N]) -> HookConfig {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
