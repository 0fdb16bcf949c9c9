//! As-code workflow schema and its reference resolver.

pub mod dependencies;
pub mod resolver;
pub mod schema;

pub use dependencies::{ExternalDependencies, EXTERNAL_SIGIL};
pub use resolver::validate;
pub use schema::{Action, Deployment, Hook, Job, Key, Notification, Repository, Stage, Step, Workflow};
