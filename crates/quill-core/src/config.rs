//! Configuration layering for modules.
//!
//! A module's effective configuration is built from up to four layers,
//! lowest precedence first:
//!
//! | Layer | Source |
//! |-------|--------|
//! | defaults | the module's [`ConfigSpec::public`] |
//! | imports | `public` defaults of each imported module, in import order |
//! | preset | the [`ConfigSpec::presets`] entry named by the `preset` key |
//! | custom | the user's section for this module |
//!
//! Two objects at the same key merge recursively; anything else is replaced
//! wholesale by the higher layer. Arrays are never merged element-wise.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{KernelError, KernelResult};

/// Key whose string value selects a preset.
pub const PRESET_KEY: &str = "preset";

/// Declared configuration of a module.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSpec {
    /// Defaults visible to the user and to dependents.
    pub public: Value,
    /// Module-only settings; never merged with user overrides.
    pub private: Value,
    /// Named configuration fragments selectable through [`PRESET_KEY`].
    pub presets: BTreeMap<String, Value>,
}

impl Default for ConfigSpec {
    fn default() -> Self {
        Self {
            public: Value::Object(Map::new()),
            private: Value::Object(Map::new()),
            presets: BTreeMap::new(),
        }
    }
}

impl ConfigSpec {
    /// A spec with the given public defaults.
    pub fn with_defaults(public: Value) -> Self {
        Self {
            public,
            ..Default::default()
        }
    }

    /// Adds a preset.
    pub fn preset(mut self, name: impl Into<String>, fragment: Value) -> Self {
        self.presets.insert(name.into(), fragment);
        self
    }

    /// Sets the private config.
    pub fn private(mut self, private: Value) -> Self {
        self.private = private;
        self
    }
}

/// Deep-merges `overlay` onto `base`, returning a new value.
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    let mut merged = base.clone();
    merge_into(&mut merged, overlay);
    merged
}

/// Deep-merges `overlay` onto `target` in place.
pub fn merge_into(target: &mut Value, overlay: &Value) {
    match (target, overlay) {
        (Value::Object(target), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match target.get_mut(key) {
                    Some(existing) => merge_into(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, overlay) => *target = overlay.clone(),
    }
}

/// Returns the preset fragment selected by `custom` (or, failing that, by the
/// defaults).
///
/// `Ok(None)` when nothing selects a preset; [`KernelError::UnknownPreset`]
/// when the selected name is not declared.
pub fn select_preset<'a>(
    module: &str,
    spec: &'a ConfigSpec,
    custom: &Value,
) -> KernelResult<Option<&'a Value>> {
    let selected = custom
        .get(PRESET_KEY)
        .or_else(|| spec.public.get(PRESET_KEY))
        .and_then(Value::as_str);

    match selected {
        None => Ok(None),
        Some(name) => spec
            .presets
            .get(name)
            .map(Some)
            .ok_or_else(|| KernelError::UnknownPreset {
                module: module.to_string(),
                preset: name.to_string(),
            }),
    }
}

/// Computes the effective configuration of `module`.
///
/// Pure and deterministic: identical inputs always produce identical output.
/// An unknown preset is logged and skipped.
pub fn effective_config(
    module: &str,
    spec: &ConfigSpec,
    imports: &[&Value],
    custom: &Value,
) -> Value {
    let mut merged = spec.public.clone();

    for imported in imports {
        merge_into(&mut merged, imported);
    }

    match select_preset(module, spec, custom) {
        Ok(Some(preset)) => merge_into(&mut merged, preset),
        Ok(None) => {}
        Err(e) => warn!(module = %module, error = %e, "Falling back to defaults"),
    }

    if !custom.is_null() {
        merge_into(&mut merged, custom);
    }

    merged
}

/// Merges two partial configurations, rejecting leaves both sides set to
/// different values.
///
/// Used when composing one logical module out of several definitions.
pub fn merge_disjoint(module: &str, left: &Value, right: &Value) -> KernelResult<Value> {
    let mut merged = left.clone();
    merge_disjoint_at(module, &mut merged, right, "")?;
    Ok(merged)
}

fn merge_disjoint_at(
    module: &str,
    target: &mut Value,
    overlay: &Value,
    path: &str,
) -> KernelResult<()> {
    match (target, overlay) {
        (Value::Object(target), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                match target.get_mut(key) {
                    Some(existing) => merge_disjoint_at(module, existing, value, &child)?,
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
            Ok(())
        }
        (target, overlay) if *target == *overlay => Ok(()),
        _ => Err(KernelError::conflict(
            module,
            if path.is_empty() { "config" } else { path },
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec() -> ConfigSpec {
        ConfigSpec::with_defaults(json!({
            "icons": { "heading": "*", "list": "-" },
            "width": 80,
            "folds": [1, 2],
        }))
        .preset("varied", json!({ "icons": { "heading": "◉" }, "width": 100 }))
    }

    #[test]
    fn test_defaults_only() {
        let merged = effective_config("m", &spec(), &[], &Value::Null);
        assert_eq!(merged, spec().public);
    }

    #[test]
    fn test_precedence() {
        let custom = json!({ "preset": "varied", "width": 120 });
        let merged = effective_config("m", &spec(), &[], &custom);
        assert_eq!(merged["icons"]["heading"], "◉");
        assert_eq!(merged["icons"]["list"], "-");
        assert_eq!(merged["width"], 120);
    }

    #[test]
    fn test_imports_sit_below_presets() {
        let imported = json!({ "width": 60, "extra": true });
        let custom = json!({ "preset": "varied" });
        let merged = effective_config("m", &spec(), &[&imported], &custom);
        assert_eq!(merged["width"], 100);
        assert_eq!(merged["extra"], true);
    }

    #[test]
    fn test_arrays_replace_wholesale() {
        let merged = effective_config("m", &spec(), &[], &json!({ "folds": [9] }));
        assert_eq!(merged["folds"], json!([9]));
    }

    #[test]
    fn test_unknown_preset_falls_back() {
        let custom = json!({ "preset": "missing" });
        assert!(matches!(
            select_preset("m", &spec(), &custom),
            Err(KernelError::UnknownPreset { .. })
        ));
        let merged = effective_config("m", &spec(), &[], &custom);
        assert_eq!(merged["icons"]["heading"], "*");
        assert_eq!(merged["preset"], "missing");
    }

    #[test]
    fn test_default_preset_key() {
        let mut s = spec();
        s.public["preset"] = json!("varied");
        let merged = effective_config("m", &s, &[], &Value::Null);
        assert_eq!(merged["width"], 100);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let custom = json!({ "preset": "varied", "icons": { "list": "+" } });
        let a = effective_config("m", &spec(), &[], &custom);
        let b = effective_config("m", &spec(), &[], &custom);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
        assert_eq!(deep_merge(&a, &custom), a);
    }

    #[test]
    fn test_override_associative_at_leaves() {
        let defaults = json!({ "a": { "b": 1, "c": 2 }, "d": 3 });
        let preset = json!({ "a": { "b": 10 }, "d": 30 });
        let custom = json!({ "a": { "b": 100, "c": 200 }, "d": 300 });
        let left = deep_merge(&deep_merge(&defaults, &preset), &custom);
        let right = deep_merge(&defaults, &deep_merge(&preset, &custom));
        assert_eq!(left, right);
    }

    #[test]
    fn test_merge_disjoint_rejects_conflicts() {
        let left = json!({ "a": { "b": 1 } });
        assert_eq!(
            merge_disjoint("m", &left, &json!({ "a": { "c": 2 } })).unwrap(),
            json!({ "a": { "b": 1, "c": 2 } })
        );
        assert_eq!(
            merge_disjoint("m", &left, &json!({ "a": { "b": 2 } })),
            Err(KernelError::conflict("m", "a.b"))
        );
        assert!(merge_disjoint("m", &left, &json!({ "a": { "b": 1 } })).is_ok());
    }
}
