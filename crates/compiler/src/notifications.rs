//! Notifications between the execution form and documents.
//!
//! The execution form stores full settings and node references; documents
//! group notifications by node name and omit every setting left at its
//! default.

use catalog::{NotificationType, TemplateCatalog};
use tracing::{debug, instrument};

use crate::declarative::{NotificationEntry, NotificationSettingsEntry};
use crate::error::{CompileError, EntityKind, Result};
use crate::models::{Notification, NotificationSettings, Policy, Workflow};

/// Document entries for every notification of `workflow`.
#[instrument(skip_all, fields(workflow = %workflow.name))]
pub fn craft(workflow: &Workflow, templates: &dyn TemplateCatalog) -> Result<Vec<NotificationEntry>> {
    workflow
        .notifications
        .iter()
        .map(|n| craft_one(workflow, n, templates))
        .collect()
}

fn craft_one(
    workflow: &Workflow,
    notification: &Notification,
    templates: &dyn TemplateCatalog,
) -> Result<NotificationEntry> {
    let mut pipelines = notification
        .source_node_refs
        .iter()
        .map(|reference| {
            let id = workflow
                .node_by_ref(reference)
                .ok_or_else(|| CompileError::NodeNotFound(reference.clone()))?;
            Ok(workflow.node(id)?.display_name().to_string())
        })
        .collect::<Result<Vec<_>>>()?;
    pipelines.sort();
    pipelines.dedup();

    let defaults = NotificationSettings::defaults(templates.default_template(notification.kind));
    let settings = elide_defaults(&notification.settings, &defaults);

    Ok(NotificationEntry {
        kind: notification.kind.to_string(),
        pipelines,
        integration: notification.integration.clone(),
        settings: (!settings.is_empty()).then_some(settings),
    })
}

fn elide_defaults(settings: &NotificationSettings, defaults: &NotificationSettings) -> NotificationSettingsEntry {
    fn differs<T: PartialEq + Clone>(value: &T, default: &T) -> Option<T> {
        (value != default).then(|| value.clone())
    }

    NotificationSettingsEntry {
        on_success: differs(&settings.on_success, &defaults.on_success).map(|p| p.to_string()),
        on_failure: differs(&settings.on_failure, &defaults.on_failure).map(|p| p.to_string()),
        on_start: differs(&settings.on_start, &defaults.on_start),
        send_to_groups: differs(&settings.send_to_groups, &defaults.send_to_groups),
        send_to_author: differs(&settings.send_to_author, &defaults.send_to_author),
        recipients: settings.recipients.clone(),
        template: differs(&settings.template, &defaults.template),
    }
}

/// Check an entry against the closed type set and the names `is_node`
/// accepts, returning its type.
pub fn check_entry(entry: &NotificationEntry, is_node: impl Fn(&str) -> bool) -> Result<NotificationType> {
    let kind: NotificationType = entry.kind.parse()?;

    if kind.requires_integration() && entry.integration.as_deref().map_or(true, str::is_empty) {
        return Err(CompileError::MissingField {
            kind: EntityKind::Notification,
            entity: kind.to_string(),
            field: "integration",
        });
    }

    if let Some(unknown) = entry.pipelines.iter().find(|p| !is_node(p.as_str())) {
        return Err(CompileError::UnknownReference {
            kind: EntityKind::Notification,
            entity: kind.to_string(),
            target: EntityKind::Node,
            reference: unknown.clone(),
        });
    }

    Ok(kind)
}

/// Execution notifications for `entries`, with absent settings taking
/// their defaults. Node names are resolved against `workflow`.
#[instrument(skip_all, fields(workflow = %workflow.name, count = entries.len()))]
pub fn resolve(
    entries: &[NotificationEntry],
    workflow: &Workflow,
    templates: &dyn TemplateCatalog,
) -> Result<Vec<Notification>> {
    let mut errors = Vec::new();
    let mut notifications = Vec::with_capacity(entries.len());
    for entry in entries {
        match resolve_one(entry, workflow, templates) {
            Ok(n) => notifications.push(n),
            Err(e) => errors.push(e),
        }
    }
    CompileError::from_phase(errors)?;
    Ok(notifications)
}

fn resolve_one(entry: &NotificationEntry, workflow: &Workflow, templates: &dyn TemplateCatalog) -> Result<Notification> {
    let kind = check_entry(entry, |name| workflow.node_by_name(name).is_some())?;

    let mut source_node_refs = Vec::with_capacity(entry.pipelines.len());
    for name in &entry.pipelines {
        let id = workflow
            .node_by_name(name)
            .ok_or_else(|| CompileError::NodeNotFound(name.clone()))?;
        source_node_refs.push(workflow.node(id)?.reference.clone());
    }

    let mut settings = NotificationSettings::defaults(templates.default_template(kind));
    if let Some(given) = &entry.settings {
        if let Some(token) = &given.on_success {
            settings.on_success = Policy::parse("on_success", token)?;
        }
        if let Some(token) = &given.on_failure {
            settings.on_failure = Policy::parse("on_failure", token)?;
        }
        settings.on_start = given.on_start.unwrap_or(settings.on_start);
        settings.send_to_groups = given.send_to_groups.unwrap_or(settings.send_to_groups);
        settings.send_to_author = given.send_to_author.unwrap_or(settings.send_to_author);
        settings.recipients = given.recipients.clone();
        if let Some(template) = &given.template {
            settings.template = template.clone();
        }
    }

    debug!(kind = %kind, sources = source_node_refs.len(), "resolved notification");
    Ok(Notification {
        kind,
        settings,
        integration: entry.integration.clone().filter(|i| !i.is_empty()),
        source_node_refs,
    })
}
