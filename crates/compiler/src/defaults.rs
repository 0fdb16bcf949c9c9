//! Hook configuration against model defaults.
//!
//! A declarative document only carries the keys a user changed; the execution
//! graph carries the full configuration. These two functions convert between
//! the two forms and are inverses for every configurable key.

use std::collections::BTreeMap;

use catalog::{HookConfig, HookConfigValue};

/// Keep only the keys of `config` a user would have to write down.
///
/// A key is dropped when the model declares it and either its value equals
/// the model default or the model does not let users change it. Keys the
/// model does not know are always kept.
pub fn diff_against_default(config: &HookConfig, defaults: &HookConfig) -> BTreeMap<String, String> {
    config
        .iter()
        .filter(|(key, value)| match defaults.get(*key) {
            Some(default) => default.configurable && default.value != value.value,
            None => true,
        })
        .map(|(key, value)| (key.clone(), value.value.clone()))
        .collect()
}

/// Rebuild a full configuration from user overrides and the model defaults.
///
/// Overrides of keys the model marks as not configurable are ignored.
pub fn expand_defaults(overrides: &BTreeMap<String, String>, defaults: &HookConfig) -> HookConfig {
    let mut config = defaults.clone();
    for (key, value) in overrides {
        match config.get_mut(key) {
            Some(existing) if existing.configurable => existing.value = value.clone(),
            Some(_) => {}
            None => {
                config.insert(key.clone(), HookConfigValue::string(value.clone()));
            }
        }
    }
    config
}
