//! Phase-ordered validation of an as-code workflow.
//!
//! Phases run in a fixed order; inside a phase every entity is checked and
//! the errors are gathered, but the first failing phase ends validation.

use std::collections::BTreeMap;

use tracing::{debug, info, instrument};

use super::dependencies::ExternalDependencies;
use super::schema::Workflow;
use crate::error::{CompileError, Result};
use crate::graph::{Graph, Node};

/// Validate `workflow` and return every externally scoped name it uses.
#[instrument(skip_all, fields(workflow = %workflow.name))]
pub fn validate(workflow: &Workflow) -> Result<ExternalDependencies> {
    let mut deps = ExternalDependencies::default();

    phase(&mut deps, "repositories", workflow.repositories.iter().map(|(n, e)| e.validate(n, workflow)))?;
    phase(&mut deps, "hooks", workflow.hooks.iter().map(|(n, e)| e.validate(n, workflow)))?;
    phase(&mut deps, "deployments", workflow.deployments.iter().map(|(n, e)| e.validate(n, workflow)))?;
    phase(&mut deps, "notifications", workflow.notifications.iter().map(|(n, e)| e.validate(n, workflow)))?;

    phase(&mut deps, "actions", workflow.actions.iter().map(|(n, e)| e.validate(n, workflow)))?;
    action_graph(workflow).detect_loops()?;

    phase(&mut deps, "keys", workflow.keys.iter().map(|(n, e)| e.validate(n, workflow)))?;

    phase(&mut deps, "stages", workflow.stages.iter().map(|(n, e)| e.validate(n, workflow)))?;
    Graph::with_nodes(
        "stages",
        workflow
            .stages
            .iter()
            .map(|(name, stage)| Node::new(name.as_str(), stage.depends_on.iter().map(String::as_str)))
            .collect(),
    )
    .detect_loops()?;

    phase(&mut deps, "jobs", workflow.jobs.iter().map(|(n, e)| e.validate(n, workflow)))?;
    for graph in job_graphs(workflow) {
        graph.detect_loops()?;
    }

    info!(external = deps.len(), "workflow validated");
    Ok(deps)
}

fn phase(
    deps: &mut ExternalDependencies,
    label: &str,
    results: impl Iterator<Item = Result<ExternalDependencies>>,
) -> Result<()> {
    let mut found = ExternalDependencies::default();
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(d) => found.merge(d),
            Err(e) => errors.push(e),
        }
    }
    debug!(phase = label, errors = errors.len(), external = found.len(), "validation phase done");
    CompileError::from_phase(errors)?;
    deps.merge(found);
    Ok(())
}

/// Actions calling local actions.
fn action_graph(workflow: &Workflow) -> Graph {
    Graph::with_nodes(
        "actions",
        workflow
            .actions
            .iter()
            .map(|(name, action)| Node::new(name.as_str(), action.steps.iter().filter_map(|s| s.local_action())))
            .collect(),
    )
}

/// One graph of `depends_on` edges per stage.
fn job_graphs(workflow: &Workflow) -> Vec<Graph> {
    let mut by_stage: BTreeMap<Option<&str>, Vec<Node>> = BTreeMap::new();
    for (name, job) in &workflow.jobs {
        by_stage
            .entry(job.stage.as_deref())
            .or_default()
            .push(Node::new(name.as_str(), job.depends_on.iter().map(String::as_str)));
    }
    by_stage
        .into_iter()
        .map(|(stage, nodes)| {
            let label = match stage {
                Some(stage) => format!("jobs of stage {stage}"),
                None => "jobs".to_string(),
            };
            Graph::with_nodes(label, nodes)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EntityKind, ErrorKind};

    fn workflow(yaml: &str) -> Workflow {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn external_dependencies_are_aggregated() {
        let deps = validate(&workflow(
            r#"
name: release
repositories:
  app: {vcs_server: github, slug: org/app, ssh_key: '@deploy'}
variables: {region: eu-west}
hooks:
  on-push: {type: repository_webhook, repository: app}
  nightly: {type: scheduler, cron: '0 2 * * *', repository: '@infra'}
deployments:
  prod: {integration: '@kubernetes'}
notifications:
  chat: {type: event, integration: kafka}
actions:
  build: {steps: [{uses: '@checkout'}, {script: make}]}
  release: {steps: [{uses: build}, {uses: '@upload'}]}
keys:
  signing: {type: pgp}
stages:
  build: {}
  ship: {depends_on: [build]}
jobs:
  compile: {stage: build, context: [repository.app, var.region], steps: [{uses: release}]}
  package: {stage: build, depends_on: [compile], context: [secret.@registry], steps: [{uses: '@checkout'}]}
  deploy: {stage: ship, deployment: prod, steps: [{script: deploy}]}
"#,
        ))
        .unwrap();

        assert_eq!(deps.vcs_servers.iter().collect::<Vec<_>>(), vec!["github"]);
        assert_eq!(deps.ssh_keys.iter().collect::<Vec<_>>(), vec!["deploy"]);
        assert_eq!(deps.repositories.iter().collect::<Vec<_>>(), vec!["infra"]);
        assert_eq!(deps.integrations.iter().collect::<Vec<_>>(), vec!["kafka", "kubernetes"]);
        assert_eq!(deps.actions.iter().collect::<Vec<_>>(), vec!["checkout", "upload"]);
        assert_eq!(deps.secrets.iter().collect::<Vec<_>>(), vec!["registry"]);
        assert!(deps.variables.is_empty());
        assert!(deps.deployments.is_empty());
        assert!(deps.pgp_keys.is_empty());
    }

    #[test]
    fn errors_of_one_phase_are_aggregated() {
        let err = validate(&workflow(
            r#"
name: wf
deployments:
  a: {integration: ''}
  b: {integration: ''}
"#,
        ))
        .unwrap_err();
        assert_eq!(err.errors().len(), 2);
        assert_eq!(err.kind(), ErrorKind::Reference);
    }

    #[test]
    fn first_failing_phase_stops_validation() {
        // Both the hook and the job are broken; only the hook is reported.
        let err = validate(&workflow(
            r#"
name: wf
hooks:
  h: {type: repository_webhook, repository: missing}
jobs:
  j: {context: [var.nope], steps: [{script: x}]}
"#,
        ))
        .unwrap_err();
        assert!(matches!(
            err,
            CompileError::UnknownReference { kind: EntityKind::Hook, .. }
        ));
    }

    #[test]
    fn action_loop_is_detected() {
        let err = validate(&workflow(
            r#"
name: wf
actions:
  a: {steps: [{uses: b}]}
  b: {steps: [{uses: c}]}
  c: {steps: [{uses: a}]}
"#,
        ))
        .unwrap_err();
        assert_eq!(
            err,
            CompileError::DependencyLoop {
                graph: "actions".into(),
                nodes: vec!["a".into(), "b".into(), "c".into()]
            }
        );
    }

    #[test]
    fn stage_loop_is_detected() {
        let err = validate(&workflow(
            r#"
name: wf
stages:
  a: {depends_on: [b]}
  b: {depends_on: [a]}
"#,
        ))
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cycle);
    }

    #[test]
    fn job_loop_is_detected_per_stage() {
        let err = validate(&workflow(
            r#"
name: wf
stages:
  build: {}
jobs:
  a: {stage: build, depends_on: [b], steps: [{script: x}]}
  b: {stage: build, depends_on: [a], steps: [{script: x}]}
"#,
        ))
        .unwrap_err();
        assert!(matches!(err, CompileError::DependencyLoop { ref graph, .. } if graph == "jobs of stage build"));
    }

    #[test]
    fn unknown_context_type_is_a_schema_error() {
        let err = validate(&workflow("name: wf\njobs:\n  j: {context: [env.x], steps: [{script: x}]}")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
    }
}
