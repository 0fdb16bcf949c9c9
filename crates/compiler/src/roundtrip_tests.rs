//! End-to-end tests: documents written as YAML, materialized with the
//! built-in catalogue and exported back.

use std::collections::BTreeMap;

use catalog::BuiltinCatalog;

use crate::declarative::{self, NodeEntry};
use crate::error::{CompileError, ErrorKind};
use crate::export::ExportOptions;
use crate::materialize::Materializer;
use crate::models::{NodeKind, Workflow};

fn doc(yaml: &str) -> declarative::Workflow {
    serde_yaml::from_str(yaml).expect("test document should decode")
}

fn materialize(doc: &declarative::Workflow) -> Result<Workflow, CompileError> {
    crate::materialize(doc, &BuiltinCatalog::new())
}

fn export(wf: &Workflow) -> declarative::Workflow {
    crate::export(wf, &BuiltinCatalog::new(), &ExportOptions::default()).expect("export should succeed")
}

fn roundtrip(yaml: &str) -> (declarative::Workflow, declarative::Workflow) {
    let original = doc(yaml);
    let wf = materialize(&original).expect("document should materialize");
    (original, export(&wf))
}

// ============================================================
// Scenarios
// ============================================================

#[test]
fn linear_chain_roundtrips() {
    let (original, exported) = roundtrip(
        r#"
name: chain
version: v2.0
workflow:
  root:
    pipeline: build
  child:
    pipeline: deploy
    depends_on: [root]
"#,
    );
    assert_eq!(exported, original);
}

#[test]
fn linear_chain_has_one_trigger() {
    let wf = materialize(&doc(
        "name: chain\nworkflow:\n  root: {pipeline: build}\n  child: {pipeline: deploy, depends_on: [root]}",
    ))
    .unwrap();
    assert_eq!(wf.nodes.len(), 2);
    let root = wf.root_node().unwrap();
    assert_eq!(root.name, "root");
    assert_eq!(root.triggers.len(), 1);
    assert_eq!(wf.nodes[root.triggers[0].0].name, "child");
}

#[test]
fn entries_with_the_same_parents_share_one_join() {
    let yaml = r#"
name: fan-in
version: v2.0
workflow:
  A: {pipeline: a}
  B: {pipeline: b, depends_on: [A]}
  C: {pipeline: c, depends_on: [A]}
  D: {pipeline: d, depends_on: [B, C]}
  E: {pipeline: e, depends_on: [B, C]}
"#;
    let wf = materialize(&doc(yaml)).unwrap();
    assert_eq!(wf.joins.len(), 1);

    let join = &wf.nodes[wf.joins[0].0];
    let children: Vec<&str> = join.triggers.iter().map(|id| wf.nodes[id.0].name.as_str()).collect();
    assert_eq!(children, vec!["D", "E"]);
    for child in ["D", "E"] {
        assert_eq!(wf.parents_of(wf.node_by_name(child).unwrap()), vec![wf.joins[0]]);
    }

    let (original, exported) = roundtrip(yaml);
    assert_eq!(exported, original);
}

#[test]
fn diamond_has_exactly_one_join() {
    let wf = materialize(&doc(
        r#"
name: diamond
workflow:
  A: {pipeline: a}
  B: {pipeline: b, depends_on: [A]}
  C: {pipeline: c, depends_on: [A]}
  D: {pipeline: d, depends_on: [B, C]}
"#,
    ))
    .unwrap();
    assert_eq!(wf.joins.len(), 1);
    assert_eq!(wf.nodes.iter().filter(|n| n.is_join()).count(), 1);
}

#[test]
fn when_success_exports_as_when_success() {
    let (original, exported) = roundtrip(
        r#"
name: gated
version: v2.0
workflow:
  build: {pipeline: build}
  deploy:
    pipeline: deploy
    depends_on: [build]
    when: [success]
"#,
    );
    let deploy = &exported.workflow["deploy"];
    assert_eq!(deploy.when, vec!["success"]);
    assert!(deploy.conditions.is_none());
    assert_eq!(exported, original);
}

#[test]
fn full_document_roundtrips() {
    let (original, exported) = roundtrip(
        r#"
name: release
description: build, test and ship
version: v2.0
workflow:
  build:
    pipeline: build
    application: app
    payload:
      git.branch: master
      git.author: ""
    parameters:
      target: linux
  test:
    pipeline: test
    depends_on: [build]
    environment: staging
    one_at_a_time: true
    conditions:
      check:
        - variable: git.branch
          operator: eq
          value: master
    when: [success]
  lint:
    pipeline: lint
    depends_on: [build]
    conditions:
      script: return cds_status == "Success"
  gate:
    depends_on: [lint, test]
    when: [manual]
  deploy:
    pipeline: deploy
    depends_on: [gate]
    environment: production
    integration: my-cloud
  notify:
    depends_on: [deploy]
    trigger: WebHook
    config:
      URL: https://chat.example.com/hook
hooks:
  build:
    - type: RepositoryWebHook
    - type: Scheduler
      config:
        cron: 0 3 * * *
      conditions:
        check:
          - variable: git.branch
            operator: eq
            value: master
notifications:
  - type: email
    pipelines: [deploy, test]
    settings:
      on_success: always
      recipients: [ops@example.com]
  - type: jabber
metadata:
  default_tags: git.branch
purge_tags: [git.branch]
retention_policy: return run_days_before < 365
history_length: 30
"#,
    );
    assert_eq!(exported, original);
}

#[test]
fn default_hook_is_exported_without_config_and_expands_again() {
    let original = doc(
        r#"
name: hooked
workflow:
  build: {pipeline: build}
hooks:
  build:
    - type: Scheduler
"#,
    );
    let wf = materialize(&original).unwrap();
    let hook = &wf.root_node().unwrap().hooks[0];
    assert_eq!(hook.config["cron"].value, "10 * * * *");
    assert_eq!(hook.config["timezone"].value, "UTC");

    let exported = export(&wf);
    let entry = &exported.hooks["build"][0];
    assert!(entry.config.is_empty());
    assert!(entry.conditions.is_none());

    assert_eq!(materialize(&exported).unwrap(), wf);
}

#[test]
fn export_then_materialize_is_stable() {
    let wf = materialize(&doc(
        r#"
name: stable
workflow:
  a: {pipeline: a}
  b: {pipeline: b, depends_on: [a]}
  c: {pipeline: c, depends_on: [a]}
  d: {pipeline: d, depends_on: [b, c]}
  e: {pipeline: e, depends_on: [a, b]}
  f: {pipeline: f, depends_on: [d, e]}
notifications:
  - type: vcs
    pipelines: [f]
"#,
    ))
    .unwrap();
    assert_eq!(wf.joins.len(), 3);
    assert_eq!(materialize(&export(&wf)).unwrap(), wf);
}

#[test]
fn named_join_without_conditions_roundtrips_with_its_hooks() {
    let yaml = r#"
name: gated
version: v2.0
workflow:
  a: {pipeline: a}
  b: {pipeline: b, depends_on: [a]}
  c: {pipeline: c, depends_on: [a]}
  gate: {depends_on: [b, c]}
  d: {pipeline: d, depends_on: [gate]}
hooks:
  gate:
    - type: WebHook
notifications:
  - type: email
    pipelines: [gate]
"#;
    let (original, exported) = roundtrip(yaml);
    assert_eq!(exported.hooks["gate"].len(), 1);
    assert_eq!(exported.notifications[0].pipelines, vec!["gate"]);
    assert_eq!(exported, original);

    let wf = materialize(&original).unwrap();
    assert_eq!(materialize(&exported).unwrap(), wf);
}

#[test]
fn repeated_when_tokens_roundtrip() {
    let (original, exported) = roundtrip(
        r#"
name: gated
version: v2.0
workflow:
  build: {pipeline: build}
  deploy:
    pipeline: deploy
    depends_on: [build]
    when: [success, manual, success]
"#,
    );
    assert_eq!(exported.workflow["deploy"].when, vec!["success", "manual", "success"]);
    assert_eq!(exported, original);
}

// ============================================================
// Order independence
// ============================================================

#[test]
fn any_visiting_order_gives_the_same_graph() {
    let original = doc(
        r#"
name: shuffled
workflow:
  a: {pipeline: a}
  b: {pipeline: b, depends_on: [a]}
  c: {pipeline: c, depends_on: [a]}
  d: {pipeline: d, depends_on: [b, c]}
  e: {pipeline: e, depends_on: [c, b]}
  f: {pipeline: f, depends_on: [a, d]}
  g: {depends_on: [e, f], when: [manual]}
  h: {pipeline: h, depends_on: [g]}
  i: {depends_on: [h]}
"#,
    );
    let catalog = BuiltinCatalog::new();
    let materializer = Materializer::new(&catalog, &catalog);
    let entries: Vec<(&String, &NodeEntry)> = original.workflow.iter().collect();
    let expected = materializer
        .materialize_entries(&original.name, entries.iter().copied())
        .unwrap();

    for shift in 0..entries.len() {
        let mut rotated = entries.clone();
        rotated.rotate_left(shift);
        let forward = materializer
            .materialize_entries(&original.name, rotated.iter().copied())
            .unwrap();
        let backward = materializer
            .materialize_entries(&original.name, rotated.iter().rev().copied())
            .unwrap();
        assert_eq!(forward, expected, "rotation {shift}");
        assert_eq!(backward, expected, "reversed rotation {shift}");
    }

    // the canonical arena starts with the root and names joins in order
    assert_eq!(expected.root.0, 0);
    let join_refs: Vec<&str> = expected
        .joins
        .iter()
        .map(|id| expected.nodes[id.0].reference.as_str())
        .collect();
    assert_eq!(join_refs, vec!["join-1", "join-2", "g"]);
}

// ============================================================
// Rejections
// ============================================================

#[test]
fn two_roots_are_rejected() {
    let err = materialize(&doc("name: wf\nworkflow:\n  a: {pipeline: a}\n  b: {pipeline: b}")).unwrap_err();
    assert!(matches!(err, CompileError::SecondRoot { .. }));
    assert_eq!(err.kind(), ErrorKind::Structural);
}

#[test]
fn payload_on_non_root_is_rejected() {
    let err = materialize(&doc(
        r#"
name: wf
workflow:
  a: {pipeline: a}
  b:
    pipeline: b
    depends_on: [a]
    payload: {git.branch: master}
"#,
    ))
    .unwrap_err();
    assert_eq!(err, CompileError::PayloadOnNonRoot { node: "b".into() });
    assert_eq!(err.kind(), ErrorKind::Structural);
}

#[test]
fn dependency_loop_in_entries_is_rejected() {
    let err = materialize(&doc(
        r#"
name: wf
workflow:
  root: {pipeline: root}
  a: {pipeline: a, depends_on: [root, c]}
  b: {pipeline: b, depends_on: [a]}
  c: {pipeline: c, depends_on: [b]}
"#,
    ))
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cycle);
    assert!(matches!(err, CompileError::DependencyLoop { ref nodes, .. } if nodes.len() == 3));
}

#[test]
fn unknown_dependency_is_a_reference_error() {
    let err = materialize(&doc(
        "name: wf\nworkflow:\n  a: {pipeline: a}\n  b: {pipeline: b, depends_on: [z]}",
    ))
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Reference);
}

#[test]
fn unknown_hook_model_is_a_reference_error() {
    let err = materialize(&doc(
        "name: wf\nworkflow:\n  a: {pipeline: a}\nhooks:\n  a:\n    - type: Gerrit",
    ))
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Reference);
    assert_eq!(err.code(), "UNKNOWN_HOOK_MODEL");
}

#[test]
fn invalid_workflow_name_is_rejected() {
    let err = materialize(&doc("name: my workflow\nworkflow:\n  a: {pipeline: a}")).unwrap_err();
    assert_eq!(err.code(), "INVALID_NAME");
}

#[test]
fn notification_on_unknown_node_fails_before_placement() {
    let err = materialize(&doc(
        r#"
name: wf
workflow:
  a: {pipeline: a}
  b: {pipeline: b}
notifications:
  - type: email
    pipelines: [c]
"#,
    ))
    .unwrap_err();
    // reported before the second root is found
    assert!(matches!(err, CompileError::UnknownReference { .. }));
}

#[test]
fn outgoing_hook_node_keeps_its_kind() {
    let wf = materialize(&doc(
        r#"
name: wf
workflow:
  a: {pipeline: a}
  next:
    depends_on: [a]
    trigger: Workflow
    config: {target_project: PROJ, target_workflow: other}
"#,
    ))
    .unwrap();
    let next = &wf.nodes[wf.node_by_name("next").unwrap().0];
    assert!(matches!(next.kind, NodeKind::OutgoingHook { .. }));

    let exported = export(&wf);
    let expected: BTreeMap<String, String> = [("target_project", "PROJ"), ("target_workflow", "other")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    assert_eq!(exported.workflow["next"].config, expected);
}
