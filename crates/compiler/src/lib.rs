//! `compiler` crate — workflow as-code validation and the declarative ⇄
//! execution graph compiler.
//!
//! All operations are synchronous pure functions of their input. Hook models
//! and notification templates are queried through the `catalog` traits.

pub mod ascode;
pub mod declarative;
pub mod defaults;
pub mod error;
pub mod export;
pub mod graph;
pub mod materialize;
pub mod models;
pub mod notifications;

pub use ascode::ExternalDependencies;
pub use defaults::{diff_against_default, expand_defaults};
pub use error::{CompileError, EntityKind, ErrorKind, Result};
pub use export::{ExportOptions, Exporter};
pub use graph::Graph;
pub use materialize::{MaterializeConfig, Materializer};
pub use models::{Node, NodeId, NodeKind, Workflow};

use catalog::{HookModelCatalog, TemplateCatalog};

/// Check an as-code workflow and collect its external dependencies.
pub fn validate(workflow: &ascode::Workflow) -> Result<ExternalDependencies> {
    ascode::validate(workflow)
}

/// Declarative document → execution graph, with default settings.
pub fn materialize<C>(doc: &declarative::Workflow, catalog: &C) -> Result<Workflow>
where
    C: HookModelCatalog + TemplateCatalog,
{
    Materializer::new(catalog, catalog).materialize(doc)
}

/// Execution graph → declarative document.
pub fn export<C>(workflow: &Workflow, catalog: &C, options: &ExportOptions) -> Result<declarative::Workflow>
where
    C: HookModelCatalog + TemplateCatalog,
{
    Exporter::new(catalog, catalog).export(workflow, options)
}

pub fn craft_notifications(
    workflow: &Workflow,
    templates: &dyn TemplateCatalog,
) -> Result<Vec<declarative::NotificationEntry>> {
    notifications::craft(workflow, templates)
}

pub fn resolve_notifications(
    entries: &[declarative::NotificationEntry],
    workflow: &Workflow,
    templates: &dyn TemplateCatalog,
) -> Result<Vec<models::Notification>> {
    notifications::resolve(entries, workflow, templates)
}

#[cfg(test)]
mod roundtrip_tests;
