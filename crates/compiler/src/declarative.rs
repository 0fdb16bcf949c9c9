//! Declarative workflow document: the flat form users write.
//!
//! Nodes are keyed by name and point at their parents through `depends_on`.
//! Every keyed collection is a `BTreeMap` so iteration order never depends
//! on how a document was decoded.

use std::collections::{BTreeMap, BTreeSet};

use catalog::NotificationTemplate;
use serde::{Deserialize, Serialize};

use crate::error::{CompileError, EntityKind, Result};
use crate::graph::{Graph, Node};
use crate::models::{Conditions, PlainCondition};

/// Value written to the `version` field of exported documents.
pub const DOCUMENT_VERSION: &str = "v2.0";

pub const WHEN_SUCCESS: &str = "success";
pub const WHEN_MANUAL: &str = "manual";
pub const WHEN_ACCEPTED: [&str; 2] = [WHEN_SUCCESS, WHEN_MANUAL];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlainConditionEntry {
    pub variable: String,
    pub operator: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionEntry {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub check: Vec<PlainConditionEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

impl ConditionEntry {
    pub fn to_conditions(&self) -> Conditions {
        Conditions {
            plain: self
                .check
                .iter()
                .map(|c| PlainCondition::new(&c.variable, &c.operator, &c.value))
                .collect(),
            script: self.script.clone().filter(|s| !s.is_empty()),
        }
    }

    /// `None` when `conditions` is empty, so documents stay minimal.
    pub fn from_conditions(conditions: &Conditions) -> Option<Self> {
        if conditions.is_empty() {
            return None;
        }
        Some(Self {
            check: conditions
                .plain
                .iter()
                .map(|c| PlainConditionEntry {
                    variable: c.variable.clone(),
                    operator: c.operator.clone(),
                    value: c.value.clone(),
                })
                .collect(),
            script: conditions.script.clone(),
        })
    }
}

/// One named node of a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeEntry {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<ConditionEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub when: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_at_a_time: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub payload: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
    /// Outgoing hook model this node calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub permissions: BTreeMap<String, i32>,
}

impl NodeEntry {
    /// Distinct parent names, sorted.
    pub fn parents(&self) -> BTreeSet<&str> {
        self.depends_on.iter().map(String::as_str).collect()
    }

    /// An entry that only gathers several parents under a name.
    pub fn is_join(&self) -> bool {
        self.pipeline.is_none() && self.trigger.is_none() && self.parents().len() > 1
    }

    /// A join only carries its parents, conditions, permissions and hooks.
    pub fn check_join(&self, name: &str) -> Result<()> {
        let mut fields = Vec::new();
        if self.application.is_some() {
            fields.push("application");
        }
        if self.environment.is_some() {
            fields.push("environment");
        }
        if self.integration.is_some() {
            fields.push("integration");
        }
        if self.one_at_a_time == Some(true) {
            fields.push("one_at_a_time");
        }
        if !self.parameters.is_empty() {
            fields.push("parameters");
        }
        if !self.config.is_empty() {
            fields.push("config");
        }
        if fields.is_empty() {
            return Ok(());
        }
        Err(CompileError::Invalid {
            kind: EntityKind::Node,
            entity: name.to_string(),
            reason: format!("a join without pipeline cannot set {}", fields.join(", ")),
        })
    }

    /// Explicit conditions followed by the `when` shortcuts they expand to.
    pub fn conditions(&self) -> Result<Conditions> {
        let mut conditions = self
            .conditions
            .as_ref()
            .map(ConditionEntry::to_conditions)
            .unwrap_or_default();
        for token in &self.when {
            let condition = match token.as_str() {
                WHEN_SUCCESS => PlainCondition::success(),
                WHEN_MANUAL => PlainCondition::manual(),
                _ => {
                    return Err(CompileError::InvalidToken {
                        field: "when",
                        token: token.clone(),
                        accepted: WHEN_ACCEPTED.to_vec(),
                    })
                }
            };
            conditions.plain.push(condition);
        }
        Ok(conditions)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookEntry {
    /// Hook model name.
    #[serde(rename = "type")]
    pub model: String,
    /// Keys that differ from the model defaults.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<ConditionEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettingsEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_start: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_to_groups: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_to_author: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<NotificationTemplate>,
}

impl NotificationSettingsEntry {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEntry {
    #[serde(rename = "type")]
    pub kind: String,
    /// Node names. Empty means every node of the workflow.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pipelines: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<NotificationSettingsEntry>,
}

/// A declarative workflow document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub workflow: BTreeMap<String, NodeEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hooks: BTreeMap<String, Vec<HookEntry>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notifications: Vec<NotificationEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub permissions: BTreeMap<String, i32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub purge_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_length: Option<i64>,
}

/// `[a-zA-Z0-9._-]+`
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

impl Workflow {
    /// Document-level checks: workflow and node names, join fields, hooks
    /// attached to existing nodes.
    pub fn check_validity(&self) -> Result<()> {
        if !is_valid_name(&self.name) {
            return Err(CompileError::InvalidName {
                kind: EntityKind::Workflow,
                name: self.name.clone(),
            });
        }

        let mut errors = Vec::new();
        for (name, entry) in &self.workflow {
            if !is_valid_name(name) {
                errors.push(CompileError::InvalidName {
                    kind: EntityKind::Node,
                    name: name.clone(),
                });
            }
            if entry.is_join() {
                if let Err(e) = entry.check_join(name) {
                    errors.push(e);
                }
            }
        }
        for node in self.hooks.keys() {
            if !self.workflow.contains_key(node) {
                errors.push(CompileError::UnknownReference {
                    kind: EntityKind::Hook,
                    entity: node.clone(),
                    target: EntityKind::Node,
                    reference: node.clone(),
                });
            }
        }
        CompileError::from_phase(errors)
    }

    /// Every `depends_on` names another entry of the document.
    pub fn check_dependencies(&self) -> Result<()> {
        let mut errors = Vec::new();
        for (name, entry) in &self.workflow {
            for parent in &entry.depends_on {
                if !self.workflow.contains_key(parent) {
                    errors.push(CompileError::UnknownReference {
                        kind: EntityKind::Node,
                        entity: name.clone(),
                        target: EntityKind::Node,
                        reference: parent.clone(),
                    });
                }
            }
        }
        CompileError::from_phase(errors)
    }

    /// The `depends_on` relation as a [`Graph`].
    pub fn dependency_graph(&self) -> Graph {
        Graph::with_nodes(
            "workflow nodes",
            self.workflow
                .iter()
                .map(|(name, entry)| Node::new(name.as_str(), entry.depends_on.iter().map(String::as_str)))
                .collect(),
        )
    }
}

/// A default payload is only allowed on an entry without dependencies.
pub fn check_payload_placement<'e, N: AsRef<str>>(
    entries: impl IntoIterator<Item = (N, &'e NodeEntry)>,
) -> Result<()> {
    let offending = entries
        .into_iter()
        .filter(|(_, e)| !e.payload.is_empty() && !e.depends_on.is_empty())
        .map(|(name, _)| name.as_ref().to_string())
        .min();
    match offending {
        Some(node) => Err(CompileError::PayloadOnNonRoot { node }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(yaml: &str) -> Workflow {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn names_follow_the_allowed_pattern() {
        assert!(is_valid_name("build-1.0_x"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("build app"));
        assert!(!is_valid_name("déploiement"));
    }

    #[test]
    fn hook_on_unknown_node_is_rejected() {
        let wf = doc(
            r#"
name: wf
workflow:
  build:
    pipeline: build
hooks:
  deploy:
    - type: WebHook
"#,
        );
        assert!(matches!(
            wf.check_validity(),
            Err(CompileError::UnknownReference { target: EntityKind::Node, .. })
        ));
    }

    #[test]
    fn missing_dependency_is_reported_per_entry() {
        let wf = doc(
            r#"
name: wf
workflow:
  build:
    pipeline: build
  test:
    pipeline: test
    depends_on: [biuld]
  deploy:
    pipeline: deploy
    depends_on: [tset]
"#,
        );
        let err = wf.check_dependencies().unwrap_err();
        assert_eq!(err.errors().len(), 2);
    }

    #[test]
    fn when_tokens_expand_after_explicit_checks() {
        let entry: NodeEntry = serde_yaml::from_str(
            r#"
conditions:
  check:
    - variable: git.branch
      operator: eq
      value: master
when: [success]
"#,
        )
        .unwrap();
        let conditions = entry.conditions().unwrap();
        assert_eq!(conditions.plain.len(), 2);
        assert_eq!(conditions.plain[1], PlainCondition::success());
    }

    #[test]
    fn unknown_when_token_is_a_schema_error() {
        let entry = NodeEntry {
            when: vec!["always".into()],
            ..Default::default()
        };
        match entry.conditions() {
            Err(CompileError::InvalidToken { field, token, accepted }) => {
                assert_eq!(field, "when");
                assert_eq!(token, "always");
                assert_eq!(accepted, vec!["success", "manual"]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn payload_on_child_is_rejected() {
        let wf = doc(
            r#"
name: wf
workflow:
  root:
    pipeline: root
  child:
    pipeline: child
    depends_on: [root]
    payload:
      git.branch: master
"#,
        );
        assert_eq!(
            check_payload_placement(&wf.workflow),
            Err(CompileError::PayloadOnNonRoot { node: "child".into() })
        );
    }

    #[test]
    fn entry_without_pipeline_and_several_parents_is_a_join() {
        let entry = NodeEntry {
            depends_on: vec!["a".into(), "b".into(), "a".into()],
            ..Default::default()
        };
        assert!(entry.is_join());
        assert_eq!(entry.parents().len(), 2);
    }

    #[test]
    fn join_rejects_pipeline_context() {
        let wf = doc(
            r#"
name: wf
workflow:
  a: {pipeline: a}
  b: {pipeline: b, depends_on: [a]}
  gate:
    depends_on: [a, b]
    environment: production
    parameters: {target: linux}
"#,
        );
        match wf.check_validity() {
            Err(CompileError::Invalid { kind, entity, reason }) => {
                assert_eq!(kind, EntityKind::Node);
                assert_eq!(entity, "gate");
                assert!(reason.contains("environment, parameters"), "{reason}");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn join_keeps_conditions_and_permissions() {
        let entry: NodeEntry = serde_yaml::from_str(
            "depends_on: [a, b]\nwhen: [manual]\none_at_a_time: false\npermissions: {devs: 7}",
        )
        .unwrap();
        assert!(entry.is_join());
        assert!(entry.check_join("gate").is_ok());
    }
}
