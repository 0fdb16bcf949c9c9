//! The as-code workflow schema.
//!
//! Every entity checks itself against its siblings in the enclosing
//! [`Workflow`] and returns the externally scoped names it uses. A name
//! starting with `@` is never looked up locally.

use std::collections::BTreeMap;
use std::str::FromStr;

use catalog::NotificationType;
use serde::{Deserialize, Serialize};

use super::dependencies::{external, ExternalDependencies};
use crate::error::{CompileError, EntityKind, Result};

// ---------------------------------------------------------------------------
// Closed token sets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookType {
    RepositoryWebhook,
    Scheduler,
    Webhook,
}

impl HookType {
    pub const ACCEPTED: [&'static str; 3] = ["repository_webhook", "scheduler", "webhook"];
}

impl FromStr for HookType {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "repository_webhook" => Ok(Self::RepositoryWebhook),
            "scheduler" => Ok(Self::Scheduler),
            "webhook" => Ok(Self::Webhook),
            _ => Err(CompileError::InvalidToken {
                field: "hook type",
                token: s.to_string(),
                accepted: Self::ACCEPTED.to_vec(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Ssh,
    Pgp,
}

impl KeyType {
    pub const ACCEPTED: [&'static str; 2] = ["ssh", "pgp"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ssh => "ssh",
            Self::Pgp => "pgp",
        }
    }
}

impl FromStr for KeyType {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ssh" => Ok(Self::Ssh),
            "pgp" => Ok(Self::Pgp),
            _ => Err(CompileError::InvalidToken {
                field: "key type",
                token: s.to_string(),
                accepted: Self::ACCEPTED.to_vec(),
            }),
        }
    }
}

/// The collection a job context item points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextType {
    Repository,
    Variable,
    Secret,
}

impl ContextType {
    pub const ACCEPTED: [&'static str; 3] = ["repository", "var", "secret"];
}

/// Split a job context item `"<type>.<name>"`.
pub fn parse_context_item(item: &str) -> Result<(ContextType, &str)> {
    let invalid = |token: &str| CompileError::InvalidToken {
        field: "context type",
        token: token.to_string(),
        accepted: ContextType::ACCEPTED.to_vec(),
    };
    let (kind, name) = item.split_once('.').ok_or_else(|| invalid(item))?;
    let kind = match kind {
        "repository" => ContextType::Repository,
        "var" => ContextType::Variable,
        "secret" => ContextType::Secret,
        other => return Err(invalid(other)),
    };
    if name.is_empty() {
        return Err(invalid(item));
    }
    Ok((kind, name))
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub vcs_server: String,
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pgp_key: Option<String>,
}

impl Repository {
    pub fn validate(&self, name: &str, scope: &Workflow) -> Result<ExternalDependencies> {
        let mut deps = ExternalDependencies::default();
        let missing = |field| CompileError::MissingField {
            kind: EntityKind::Repository,
            entity: name.to_string(),
            field,
        };

        // VCS servers always belong to the project.
        let server = external(&self.vcs_server).unwrap_or(&self.vcs_server);
        if server.is_empty() {
            return Err(missing("vcs_server"));
        }
        deps.vcs_servers.insert(server.to_string());

        if self.slug.is_empty() {
            return Err(missing("slug"));
        }

        if let Some(key) = &self.ssh_key {
            match external(key) {
                Some(key) => {
                    deps.ssh_keys.insert(key.to_string());
                }
                None => scope.require_key(EntityKind::Repository, name, key, KeyType::Ssh)?,
            }
        }
        if let Some(key) = &self.pgp_key {
            match external(key) {
                Some(key) => {
                    deps.pgp_keys.insert(key.to_string());
                }
                None => scope.require_key(EntityKind::Repository, name, key, KeyType::Pgp)?,
            }
        }
        Ok(deps)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
}

impl Hook {
    pub fn validate(&self, name: &str, scope: &Workflow) -> Result<ExternalDependencies> {
        let mut deps = ExternalDependencies::default();
        let kind: HookType = self.kind.parse()?;

        match &self.repository {
            Some(repository) => scope.resolve_repository(EntityKind::Hook, name, repository, &mut deps)?,
            None if kind == HookType::RepositoryWebhook => {
                return Err(CompileError::MissingField {
                    kind: EntityKind::Hook,
                    entity: name.to_string(),
                    field: "repository",
                })
            }
            None => {}
        }

        if kind == HookType::Scheduler && self.cron.as_deref().map_or(true, str::is_empty) {
            return Err(CompileError::MissingField {
                kind: EntityKind::Hook,
                entity: name.to_string(),
                field: "cron",
            });
        }
        Ok(deps)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub integration: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
}

impl Deployment {
    pub fn validate(&self, name: &str, _scope: &Workflow) -> Result<ExternalDependencies> {
        let mut deps = ExternalDependencies::default();
        let integration = external(&self.integration).unwrap_or(&self.integration);
        if integration.is_empty() {
            return Err(CompileError::MissingField {
                kind: EntityKind::Deployment,
                entity: name.to_string(),
                field: "integration",
            });
        }
        deps.integrations.insert(integration.to_string());
        Ok(deps)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<String>,
}

impl Notification {
    pub fn validate(&self, name: &str, _scope: &Workflow) -> Result<ExternalDependencies> {
        let mut deps = ExternalDependencies::default();
        let kind: NotificationType = self.kind.parse()?;
        let integration = self
            .integration
            .as_deref()
            .map(|i| external(i).unwrap_or(i))
            .filter(|i| !i.is_empty());

        match integration {
            Some(integration) => {
                deps.integrations.insert(integration.to_string());
            }
            None if kind.requires_integration() => {
                return Err(CompileError::MissingField {
                    kind: EntityKind::Notification,
                    entity: name.to_string(),
                    field: "integration",
                })
            }
            None => {}
        }
        Ok(deps)
    }
}

/// One step of an action or a job: either a call to an action or a script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub with: BTreeMap<String, String>,
}

impl Step {
    fn validate(&self, kind: EntityKind, owner: &str, scope: &Workflow, deps: &mut ExternalDependencies) -> Result<()> {
        match (&self.uses, &self.script) {
            (Some(action), None) => match external(action) {
                Some(action) => {
                    deps.actions.insert(action.to_string());
                    Ok(())
                }
                None if scope.actions.contains_key(action) => Ok(()),
                None => Err(CompileError::UnknownReference {
                    kind,
                    entity: owner.to_string(),
                    target: EntityKind::Action,
                    reference: action.clone(),
                }),
            },
            (None, Some(_)) => Ok(()),
            _ => Err(CompileError::Invalid {
                kind,
                entity: owner.to_string(),
                reason: "a step must set exactly one of 'uses' or 'script'".to_string(),
            }),
        }
    }

    /// The local action this step calls, if any.
    pub fn local_action(&self) -> Option<&str> {
        self.uses.as_deref().filter(|a| external(a).is_none())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Action {
    pub fn validate(&self, name: &str, scope: &Workflow) -> Result<ExternalDependencies> {
        let mut deps = ExternalDependencies::default();
        for step in &self.steps {
            step.validate(EntityKind::Action, name, scope, &mut deps)?;
        }
        Ok(deps)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    #[serde(rename = "type")]
    pub kind: String,
}

impl Key {
    pub fn validate(&self, _name: &str, _scope: &Workflow) -> Result<ExternalDependencies> {
        self.kind.parse::<KeyType>()?;
        Ok(ExternalDependencies::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl Stage {
    pub fn validate(&self, name: &str, scope: &Workflow) -> Result<ExternalDependencies> {
        for needed in &self.depends_on {
            if !scope.stages.contains_key(needed) {
                return Err(CompileError::UnknownReference {
                    kind: EntityKind::Stage,
                    entity: name.to_string(),
                    target: EntityKind::Stage,
                    reference: needed.clone(),
                });
            }
        }
        Ok(ExternalDependencies::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<String>,
}

impl Job {
    pub fn validate(&self, name: &str, scope: &Workflow) -> Result<ExternalDependencies> {
        let mut deps = ExternalDependencies::default();
        let invalid = |reason: String| CompileError::Invalid {
            kind: EntityKind::Job,
            entity: name.to_string(),
            reason,
        };

        match (&self.stage, scope.stages.is_empty()) {
            (Some(stage), false) if !scope.stages.contains_key(stage) => {
                return Err(CompileError::UnknownReference {
                    kind: EntityKind::Job,
                    entity: name.to_string(),
                    target: EntityKind::Stage,
                    reference: stage.clone(),
                })
            }
            (Some(stage), true) => {
                return Err(invalid(format!("stage '{stage}' is set but the workflow declares no stages")))
            }
            (None, false) => return Err(invalid("a stage is required when the workflow declares stages".to_string())),
            _ => {}
        }

        for needed in &self.depends_on {
            if needed == name {
                return Err(invalid("a job cannot depend on itself".to_string()));
            }
            let Some(other) = scope.jobs.get(needed) else {
                return Err(CompileError::UnknownReference {
                    kind: EntityKind::Job,
                    entity: name.to_string(),
                    target: EntityKind::Job,
                    reference: needed.clone(),
                });
            };
            if other.stage != self.stage {
                return Err(invalid(format!("depends on job '{needed}' from another stage")));
            }
        }

        for item in &self.context {
            let (kind, reference) = parse_context_item(item)?;
            match (kind, external(reference)) {
                (ContextType::Repository, Some(r)) => {
                    deps.repositories.insert(r.to_string());
                }
                (ContextType::Variable, Some(v)) => {
                    deps.variables.insert(v.to_string());
                }
                (ContextType::Secret, Some(s)) => {
                    deps.secrets.insert(s.to_string());
                }
                (kind, None) => {
                    let (known, target) = match kind {
                        ContextType::Repository => (scope.repositories.contains_key(reference), EntityKind::Repository),
                        ContextType::Variable => (scope.variables.contains_key(reference), EntityKind::Variable),
                        ContextType::Secret => (scope.secrets.contains_key(reference), EntityKind::Secret),
                    };
                    if !known {
                        return Err(CompileError::UnknownReference {
                            kind: EntityKind::Job,
                            entity: name.to_string(),
                            target,
                            reference: reference.to_string(),
                        });
                    }
                }
            }
        }

        for step in &self.steps {
            step.validate(EntityKind::Job, name, scope, &mut deps)?;
        }

        if let Some(deployment) = &self.deployment {
            match external(deployment) {
                Some(d) => {
                    deps.deployments.insert(d.to_string());
                }
                None if scope.deployments.contains_key(deployment) => {}
                None => {
                    return Err(CompileError::UnknownReference {
                        kind: EntityKind::Job,
                        entity: name.to_string(),
                        target: EntityKind::Deployment,
                        reference: deployment.clone(),
                    })
                }
            }
        }

        Ok(deps)
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// An as-code workflow document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub repositories: BTreeMap<String, Repository>,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
    #[serde(default)]
    pub hooks: BTreeMap<String, Hook>,
    #[serde(default)]
    pub deployments: BTreeMap<String, Deployment>,
    #[serde(default)]
    pub notifications: BTreeMap<String, Notification>,
    #[serde(default)]
    pub actions: BTreeMap<String, Action>,
    #[serde(default)]
    pub keys: BTreeMap<String, Key>,
    #[serde(default)]
    pub stages: BTreeMap<String, Stage>,
    #[serde(default)]
    pub jobs: BTreeMap<String, Job>,
}

impl Workflow {
    fn require_key(&self, kind: EntityKind, entity: &str, key: &str, wanted: KeyType) -> Result<()> {
        let Some(found) = self.keys.get(key) else {
            return Err(CompileError::UnknownReference {
                kind,
                entity: entity.to_string(),
                target: EntityKind::Key,
                reference: key.to_string(),
            });
        };
        if found.kind.parse::<KeyType>().ok() != Some(wanted) {
            return Err(CompileError::Invalid {
                kind,
                entity: entity.to_string(),
                reason: format!("key '{key}' is not a {} key", wanted.as_str()),
            });
        }
        Ok(())
    }

    fn resolve_repository(
        &self,
        kind: EntityKind,
        entity: &str,
        repository: &str,
        deps: &mut ExternalDependencies,
    ) -> Result<()> {
        match external(repository) {
            Some(r) => {
                deps.repositories.insert(r.to_string());
                Ok(())
            }
            None if self.repositories.contains_key(repository) => Ok(()),
            None => Err(CompileError::UnknownReference {
                kind,
                entity: entity.to_string(),
                target: EntityKind::Repository,
                reference: repository.to_string(),
            }),
        }
    }
}
