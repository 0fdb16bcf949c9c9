//! Execution graph → declarative document.
//!
//! The inverse of [`crate::materialize`]: anonymous joins without conditions
//! disappear into the `depends_on` lists of their children, the reserved conditions go back to
//! `when` shortcuts and hook configuration is reduced to what differs from
//! the model defaults.

use catalog::builtin::REPOSITORY_WEBHOOK_MODEL;
use catalog::{HookModelCatalog, TemplateCatalog};
use tracing::{debug, info, instrument};

use crate::declarative::{self, ConditionEntry, HookEntry, NodeEntry, DOCUMENT_VERSION, WHEN_MANUAL, WHEN_SUCCESS};
use crate::defaults::diff_against_default;
use crate::error::{CompileError, EntityKind, Result};
use crate::models::{Conditions, Hook, NodeId, NodeKind, PlainCondition, Workflow, DEFAULT_HISTORY_LENGTH};
use crate::notifications;

/// What to include in an exported document.
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Export workflow permissions, and node permissions when the workflow
    /// has more than one node.
    pub with_permissions: bool,
    /// Leave out the root's hook when it is a single repository webhook with
    /// default settings, together with the root payload.
    pub skip_if_only_one_repo_webhook: bool,
}

pub struct Exporter<'a> {
    hooks: &'a dyn HookModelCatalog,
    templates: &'a dyn TemplateCatalog,
}

impl<'a> Exporter<'a> {
    pub fn new(hooks: &'a dyn HookModelCatalog, templates: &'a dyn TemplateCatalog) -> Self {
        Self { hooks, templates }
    }

    #[instrument(skip_all, fields(workflow = %workflow.name))]
    pub fn export(&self, workflow: &Workflow, options: &ExportOptions) -> Result<declarative::Workflow> {
        workflow.check_ids()?;

        let mut doc = declarative::Workflow {
            name: workflow.name.clone(),
            description: workflow.description.clone(),
            version: Some(DOCUMENT_VERSION.to_string()),
            retention_policy: workflow.retention_policy.clone(),
            purge_tags: workflow.purge_tags.clone(),
            metadata: workflow
                .metadata
                .iter()
                .filter(|(_, v)| !v.is_empty())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            history_length: (workflow.history_length > 0 && workflow.history_length != DEFAULT_HISTORY_LENGTH)
                .then_some(workflow.history_length),
            ..Default::default()
        };

        let node_permissions = options.with_permissions && workflow.nodes.len() > 1;
        for id in workflow.ids() {
            let node = workflow.node(id)?;
            if node.is_trivial_join() {
                continue;
            }

            let mut entry = self.node_entry(workflow, id)?;
            if !node_permissions {
                entry.permissions.clear();
            }
            let name = node.display_name().to_string();

            let hooks = node
                .hooks
                .iter()
                .map(|h| self.hook_entry(h))
                .collect::<Result<Vec<_>>>()?;
            if !hooks.is_empty() {
                doc.hooks.insert(name.clone(), hooks);
            }

            if doc.workflow.contains_key(&name) {
                return Err(CompileError::Invalid {
                    kind: EntityKind::Node,
                    entity: name,
                    reason: "name used by more than one node".to_string(),
                });
            }
            debug!(node = %name, "exported node");
            doc.workflow.insert(name, entry);
        }

        if options.skip_if_only_one_repo_webhook {
            self.skip_default_repository_webhook(workflow, &mut doc)?;
        }
        if options.with_permissions {
            doc.permissions = workflow.permissions.clone();
        }
        doc.notifications = notifications::craft(workflow, self.templates)?;

        info!(entries = doc.workflow.len(), hooks = doc.hooks.len(), "workflow exported");
        Ok(doc)
    }

    fn node_entry(&self, workflow: &Workflow, id: NodeId) -> Result<NodeEntry> {
        let node = workflow.node(id)?;
        let mut entry = NodeEntry {
            depends_on: ancestors(workflow, id)?,
            permissions: node.permissions.clone(),
            ..Default::default()
        };
        let (when, conditions) = split_conditions(node.conditions());
        entry.when = when;
        entry.conditions = conditions;

        match &node.kind {
            NodeKind::Join { parents, .. } => {
                // a join exported as a node keeps its own parents
                entry.depends_on = parents.clone();
            }
            NodeKind::Pipeline { context } | NodeKind::Fork { context } | NodeKind::OutgoingHook { context, .. } => {
                entry.pipeline = context.pipeline.clone();
                entry.application = context.application.clone();
                entry.environment = context.environment.clone();
                entry.integration = context.integration.clone();
                entry.one_at_a_time = context.mutex.then_some(true);
                entry.payload = context.default_payload.clone();
                entry.parameters = context.default_parameters.clone();
            }
        }

        if let NodeKind::OutgoingHook { hook, .. } = &node.kind {
            let model = self.hooks.require_outgoing_hook_model(&hook.model)?;
            entry.trigger = Some(hook.model.clone());
            entry.config = diff_against_default(&hook.config, &model.default_config);
        }

        Ok(entry)
    }

    fn hook_entry(&self, hook: &Hook) -> Result<HookEntry> {
        let model = self.hooks.require_hook_model(&hook.model)?;
        Ok(HookEntry {
            model: hook.model.clone(),
            config: diff_against_default(&hook.config, &model.default_config),
            conditions: ConditionEntry::from_conditions(&hook.conditions),
        })
    }

    fn skip_default_repository_webhook(&self, workflow: &Workflow, doc: &mut declarative::Workflow) -> Result<()> {
        let root = workflow.root_node()?;
        let name = root.display_name();
        let is_default_webhook = match doc.hooks.get(name).map(Vec::as_slice) {
            Some([hook]) => hook.model == REPOSITORY_WEBHOOK_MODEL && hook.config.is_empty() && hook.conditions.is_none(),
            _ => false,
        };
        if is_default_webhook {
            doc.hooks.remove(name);
            if let Some(entry) = doc.workflow.get_mut(name) {
                entry.payload.clear();
            }
            debug!(node = %name, "skipped default repository webhook");
        }
        Ok(())
    }
}

/// Names a node's entry depends on: every node that triggers it, with
/// trivial joins replaced by their own parents.
fn ancestors(workflow: &Workflow, id: NodeId) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for parent in workflow.parents_of(id) {
        let parent = workflow.node(parent)?;
        match parent.join_parents() {
            Some(parents) if parent.is_trivial_join() => names.extend(parents.iter().cloned()),
            _ => names.push(parent.display_name().to_string()),
        }
    }
    names.sort();
    names.dedup();
    Ok(names)
}

/// Reserved conditions as `when` tokens, the rest as a condition block.
fn split_conditions(conditions: &Conditions) -> (Vec<String>, Option<ConditionEntry>) {
    let (success, manual) = (PlainCondition::success(), PlainCondition::manual());
    let mut when = Vec::new();
    let mut rest = Conditions {
        plain: Vec::new(),
        script: conditions.script.clone(),
    };
    for condition in &conditions.plain {
        if *condition == success {
            when.push(WHEN_SUCCESS.to_string());
        } else if *condition == manual {
            when.push(WHEN_MANUAL.to_string());
        } else {
            rest.plain.push(condition.clone());
        }
    }
    (when, ConditionEntry::from_conditions(&rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog::mock::MockCatalog;
    use catalog::HookConfigValue;

    use crate::models::{Node, NodeContext};

    fn pipeline(name: &str, conditions: Conditions) -> Node {
        Node::new(
            name,
            name,
            NodeKind::Pipeline {
                context: NodeContext {
                    pipeline: Some(name.to_string()),
                    conditions,
                    ..Default::default()
                },
            },
        )
    }

    fn catalog() -> MockCatalog {
        MockCatalog::new()
            .with_hook_model(REPOSITORY_WEBHOOK_MODEL, [("eventFilter", "push")])
            .with_hook_model("Scheduler", [("cron", "10 * * * *"), ("timezone", "UTC")])
    }

    fn export(wf: &Workflow, options: &ExportOptions) -> declarative::Workflow {
        let catalog = catalog();
        Exporter::new(&catalog, &catalog).export(wf, options).unwrap()
    }

    #[test]
    fn reserved_conditions_export_as_when() {
        let mut wf = Workflow::new("wf", pipeline("a", Conditions::default()));
        wf.nodes.push(pipeline(
            "b",
            Conditions {
                plain: vec![
                    PlainCondition::success(),
                    PlainCondition::new("git.branch", "eq", "master"),
                ],
                script: None,
            },
        ));
        wf.nodes[0].triggers.push(NodeId(1));

        let doc = export(&wf, &ExportOptions::default());
        let b = &doc.workflow["b"];
        assert_eq!(b.when, vec!["success"]);
        assert_eq!(b.depends_on, vec!["a"]);
        let rest = b.conditions.as_ref().unwrap();
        assert_eq!(rest.check.len(), 1);
        assert_eq!(rest.check[0].variable, "git.branch");
    }

    #[test]
    fn trivial_join_is_flattened_into_depends_on() {
        let mut wf = Workflow::new("wf", pipeline("a", Conditions::default()));
        wf.nodes.push(pipeline("b", Conditions::default()));
        wf.nodes.push(pipeline("c", Conditions::default()));
        wf.nodes.push(Node::new(
            "",
            "join-1",
            NodeKind::Join {
                parents: vec!["b".into(), "c".into()],
                conditions: Conditions::default(),
            },
        ));
        wf.nodes.push(pipeline("d", Conditions::default()));
        wf.nodes[0].triggers = vec![NodeId(1), NodeId(2)];
        wf.nodes[3].triggers = vec![NodeId(4)];
        wf.joins = vec![NodeId(3)];

        let doc = export(&wf, &ExportOptions::default());
        assert_eq!(doc.workflow.len(), 4);
        assert!(!doc.workflow.contains_key("join-1"));
        assert_eq!(doc.workflow["d"].depends_on, vec!["b", "c"]);
    }

    #[test]
    fn join_with_conditions_is_exported_as_a_node() {
        let mut wf = Workflow::new("wf", pipeline("a", Conditions::default()));
        wf.nodes.push(pipeline("b", Conditions::default()));
        wf.nodes.push(Node::new(
            "gate",
            "gate",
            NodeKind::Join {
                parents: vec!["a".into(), "b".into()],
                conditions: Conditions {
                    plain: vec![PlainCondition::manual()],
                    script: None,
                },
            },
        ));
        wf.nodes.push(pipeline("c", Conditions::default()));
        wf.nodes[0].triggers = vec![NodeId(1)];
        wf.nodes[2].triggers = vec![NodeId(3)];
        wf.joins = vec![NodeId(2)];

        let doc = export(&wf, &ExportOptions::default());
        assert_eq!(doc.workflow["gate"].depends_on, vec!["a", "b"]);
        assert_eq!(doc.workflow["gate"].when, vec!["manual"]);
        assert_eq!(doc.workflow["c"].depends_on, vec!["gate"]);
    }

    #[test]
    fn default_hook_keeps_its_entry_without_config() {
        let mut wf = Workflow::new("wf", pipeline("a", Conditions::default()));
        let defaults = catalog().require_hook_model("Scheduler").unwrap().default_config.clone();
        wf.nodes[0].hooks.push(Hook {
            model: "Scheduler".into(),
            config: defaults.clone(),
            conditions: Conditions::default(),
        });
        let mut custom = defaults;
        custom.insert("cron".into(), HookConfigValue::string("0 3 * * *"));
        wf.nodes[0].hooks.push(Hook {
            model: "Scheduler".into(),
            config: custom,
            conditions: Conditions::default(),
        });

        let doc = export(&wf, &ExportOptions::default());
        let hooks = &doc.hooks["a"];
        assert_eq!(hooks.len(), 2);
        assert!(hooks[0].config.is_empty());
        assert!(hooks[0].conditions.is_none());
        assert_eq!(hooks[1].config["cron"], "0 3 * * *");
    }

    #[test]
    fn lone_default_repository_webhook_can_be_skipped() {
        let mut root = pipeline("a", Conditions::default());
        root.hooks.push(Hook {
            model: REPOSITORY_WEBHOOK_MODEL.into(),
            config: catalog().require_hook_model(REPOSITORY_WEBHOOK_MODEL).unwrap().default_config.clone(),
            conditions: Conditions::default(),
        });
        if let NodeKind::Pipeline { context } = &mut root.kind {
            context.default_payload.insert("git.branch".into(), "master".into());
        }
        let wf = Workflow::new("wf", root);

        let kept = export(&wf, &ExportOptions::default());
        assert_eq!(kept.hooks["a"].len(), 1);
        assert!(!kept.workflow["a"].payload.is_empty());

        let skipped = export(
            &wf,
            &ExportOptions {
                skip_if_only_one_repo_webhook: true,
                ..Default::default()
            },
        );
        assert!(skipped.hooks.is_empty());
        assert!(skipped.workflow["a"].payload.is_empty());
    }

    #[test]
    fn permissions_only_with_the_option() {
        let mut wf = Workflow::new("wf", pipeline("a", Conditions::default()));
        wf.nodes.push(pipeline("b", Conditions::default()));
        wf.nodes[0].triggers.push(NodeId(1));
        wf.nodes[1].permissions.insert("devs".into(), 7);
        wf.permissions.insert("devs".into(), 7);

        let plain = export(&wf, &ExportOptions::default());
        assert!(plain.permissions.is_empty());
        assert!(plain.workflow["b"].permissions.is_empty());

        let with = export(
            &wf,
            &ExportOptions {
                with_permissions: true,
                ..Default::default()
            },
        );
        assert_eq!(with.permissions["devs"], 7);
        assert_eq!(with.workflow["b"].permissions["devs"], 7);
    }

    #[test]
    fn metadata_and_history_are_elided_when_default() {
        let mut wf = Workflow::new("wf", pipeline("a", Conditions::default()));
        wf.metadata.insert("default_tags".into(), "git.branch".into());
        wf.metadata.insert("empty".into(), String::new());

        let doc = export(&wf, &ExportOptions::default());
        assert_eq!(doc.metadata.len(), 1);
        assert_eq!(doc.history_length, None);
        assert_eq!(doc.version.as_deref(), Some(DOCUMENT_VERSION));

        wf.history_length = 50;
        assert_eq!(export(&wf, &ExportOptions::default()).history_length, Some(50));
    }

    #[test]
    fn named_join_without_conditions_keeps_its_entry_and_hooks() {
        let mut wf = Workflow::new("wf", pipeline("a", Conditions::default()));
        wf.nodes.push(pipeline("b", Conditions::default()));
        let mut gate = Node::new(
            "gate",
            "gate",
            NodeKind::Join {
                parents: vec!["a".into(), "b".into()],
                conditions: Conditions::default(),
            },
        );
        gate.hooks.push(Hook {
            model: "Scheduler".into(),
            config: catalog().require_hook_model("Scheduler").unwrap().default_config.clone(),
            conditions: Conditions::default(),
        });
        wf.nodes.push(gate);
        wf.nodes.push(pipeline("c", Conditions::default()));
        wf.nodes[0].triggers = vec![NodeId(1)];
        wf.nodes[2].triggers = vec![NodeId(3)];
        wf.joins = vec![NodeId(2)];

        let doc = export(&wf, &ExportOptions::default());
        assert_eq!(doc.workflow["gate"].depends_on, vec!["a", "b"]);
        assert!(doc.workflow["gate"].when.is_empty());
        assert_eq!(doc.workflow["c"].depends_on, vec!["gate"]);
        assert_eq!(doc.hooks["gate"].len(), 1);
    }

    #[test]
    fn repeated_reserved_conditions_are_all_kept() {
        let mut wf = Workflow::new("wf", pipeline("a", Conditions::default()));
        wf.nodes.push(pipeline(
            "b",
            Conditions {
                plain: vec![PlainCondition::success(), PlainCondition::manual(), PlainCondition::success()],
                script: None,
            },
        ));
        wf.nodes[0].triggers.push(NodeId(1));

        let doc = export(&wf, &ExportOptions::default());
        assert_eq!(doc.workflow["b"].when, vec!["success", "manual", "success"]);
        assert!(doc.workflow["b"].conditions.is_none());
    }

    #[test]
    fn each_hook_model_is_looked_up_once() {
        let mut wf = Workflow::new("wf", pipeline("a", Conditions::default()));
        for model in [REPOSITORY_WEBHOOK_MODEL, "Scheduler"] {
            wf.nodes[0].hooks.push(Hook {
                model: model.into(),
                config: Default::default(),
                conditions: Conditions::default(),
            });
        }

        let catalog = catalog();
        Exporter::new(&catalog, &catalog).export(&wf, &ExportOptions::default()).unwrap();
        assert_eq!(catalog.lookup_count(), 2);
        assert_eq!(*catalog.calls.lock().unwrap(), vec![REPOSITORY_WEBHOOK_MODEL, "Scheduler"]);
    }

    #[test]
    fn outgoing_hook_config_is_diffed_against_its_model() {
        let catalog = catalog().with_outgoing_hook_model("WebHook", [("URL", ""), ("method", "POST")]);
        let mut wf = Workflow::new("wf", pipeline("a", Conditions::default()));
        wf.nodes.push(Node::new(
            "call",
            "call",
            NodeKind::OutgoingHook {
                context: NodeContext::default(),
                hook: Hook {
                    model: "WebHook".into(),
                    config: [
                        ("URL", HookConfigValue::string("https://example.com")),
                        ("method", HookConfigValue::string("POST")),
                    ]
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
                    conditions: Conditions::default(),
                },
            },
        ));
        wf.nodes[0].triggers.push(NodeId(1));

        let doc = Exporter::new(&catalog, &catalog).export(&wf, &ExportOptions::default()).unwrap();
        let call = &doc.workflow["call"];
        assert_eq!(call.trigger.as_deref(), Some("WebHook"));
        assert_eq!(call.config.len(), 1);
        assert_eq!(call.config["URL"], "https://example.com");
        assert_eq!(*catalog.calls.lock().unwrap(), vec!["WebHook"]);
    }

    #[test]
    fn node_names_must_be_unique() {
        let mut wf = Workflow::new("wf", pipeline("join-1", Conditions::default()));
        wf.nodes.push(pipeline("b", Conditions::default()));
        wf.nodes.push(pipeline("c", Conditions::default()));
        wf.nodes.push(Node::new(
            "",
            "join-1",
            NodeKind::Join {
                parents: vec!["b".into(), "c".into()],
                conditions: Conditions {
                    plain: vec![PlainCondition::manual()],
                    script: None,
                },
            },
        ));
        wf.nodes[0].triggers = vec![NodeId(1), NodeId(2)];
        wf.joins = vec![NodeId(3)];

        let catalog = catalog();
        let err = Exporter::new(&catalog, &catalog)
            .export(&wf, &ExportOptions::default())
            .unwrap_err();
        assert!(matches!(err, CompileError::Invalid { ref entity, .. } if entity == "join-1"));
    }
}
