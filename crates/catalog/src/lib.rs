//! `catalog` crate — read-only catalogues consumed by the workflow compiler.
//!
//! The compiler never hard-codes hook models or notification templates; it
//! queries them by name through [`HookModelCatalog`] and [`TemplateCatalog`].
//! [`BuiltinCatalog`] ships the platform defaults, [`mock::MockCatalog`] is the
//! test double.

pub mod builtin;
pub mod error;
pub mod mock;
pub mod model;
pub mod traits;

pub use builtin::BuiltinCatalog;
pub use error::CatalogError;
pub use model::{HookConfig, HookConfigValue, HookModel, NotificationTemplate, NotificationType};
pub use traits::{HookModelCatalog, TemplateCatalog};
