//! Interactive widgets: detection, content-hash identity, and value
//! coercion/auto-repair.
//!
//! A widget object implements a small explicit interface — `kind()`,
//! `properties()`, `value()` — rather than being recognised by duck-typed
//! attribute shape or class-name substring matching. [`WidgetHandle`] is
//! that interface's concrete Rust representation, registered on the
//! embedded engine so cells can construct one directly (`slider(0, 100, 1)`).

use std::collections::HashMap;

use rhai::{Dynamic, Engine};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// The recognised widget kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetKind {
    Slider,
    RangeSlider,
    Number,
    Text,
    Checkbox,
    Dropdown,
    Radio,
    Multiselect,
    Button,
}

impl WidgetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WidgetKind::Slider => "slider",
            WidgetKind::RangeSlider => "range_slider",
            WidgetKind::Number => "number",
            WidgetKind::Text => "text",
            WidgetKind::Checkbox => "checkbox",
            WidgetKind::Dropdown => "dropdown",
            WidgetKind::Radio => "radio",
            WidgetKind::Multiselect => "multiselect",
            WidgetKind::Button => "button",
        }
    }

    /// The value a widget of this kind takes before any value is known.
    fn default_value(&self) -> serde_json::Value {
        match self {
            WidgetKind::Slider | WidgetKind::Number => serde_json::json!(0),
            WidgetKind::RangeSlider => serde_json::json!([0, 100]),
            WidgetKind::Text => serde_json::json!(""),
            WidgetKind::Checkbox => serde_json::json!(false),
            WidgetKind::Multiselect => serde_json::json!([]),
            WidgetKind::Dropdown | WidgetKind::Radio | WidgetKind::Button => serde_json::Value::Null,
        }
    }
}

/// Declared constraints for a widget, keyed by the canonical property
/// names used throughout coercion/validation/auto-repair: `min`/`max`/
/// `step` for numeric bounds, `options` for enumerations, `max_length`
/// for text, plus free-form `label`/`placeholder`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WidgetProperties {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
    pub options: Option<Vec<String>>,
    pub max_length: Option<usize>,
    pub label: Option<String>,
    pub placeholder: Option<String>,
}

/// The value a notebook cell constructs and binds to a name. This is the
/// explicit widget interface the marshaller and registry recognise via
/// `Dynamic::try_cast::<WidgetHandle>()` — no duck typing required.
#[derive(Debug, Clone)]
pub struct WidgetHandle {
    pub kind: WidgetKind,
    pub properties: WidgetProperties,
    pub value: serde_json::Value,
}

/// A registry-owned widget record (see [`WidgetRegistry`]).
#[derive(Debug, Clone, Serialize)]
pub struct Widget {
    pub id: String,
    pub kind: WidgetKind,
    pub properties: WidgetProperties,
    pub value: serde_json::Value,
    /// Widgets whose value should be marked `needs_update` when this
    /// widget's value changes. Declared explicitly, never inferred.
    pub dependents: Vec<String>,
}

/// Whether an auto-repair was applied while coercing an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoRepaired(pub bool);

/// Assigns stable content-hash identifiers to widgets and mediates value
/// updates, coercion, and auto-repair.
#[derive(Debug, Default)]
pub struct WidgetRegistry {
    widgets: HashMap<String, Widget>,
    /// widget_id -> widgets that depend on it.
    dependencies: HashMap<String, Vec<String>>,
}

impl WidgetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or reuse) the widget described by `handle`, returning the
    /// resulting registry record.
    pub fn register(&mut self, handle: &WidgetHandle) -> Widget {
        let id = content_hash_id(handle);

        if let Some(existing) = self.widgets.get(&id) {
            return existing.clone();
        }

        let widget = Widget {
            id: id.clone(),
            kind: handle.kind,
            properties: handle.properties.clone(),
            value: handle.value.clone(),
            dependents: self.dependencies.get(&id).cloned().unwrap_or_default(),
        };
        self.widgets.insert(id, widget.clone());
        widget
    }

    pub fn get(&self, widget_id: &str) -> Option<&Widget> {
        self.widgets.get(widget_id)
    }

    /// Drop `widget_id` and scrub it from every dependency list, including
    /// its own. Call once no tracked cell still owns it.
    pub fn remove(&mut self, widget_id: &str) {
        self.widgets.remove(widget_id);
        self.dependencies.remove(widget_id);
        for widget in self.widgets.values_mut() {
            widget.dependents.retain(|dependent| dependent != widget_id);
        }
        for dependents in self.dependencies.values_mut() {
            dependents.retain(|dependent| dependent != widget_id);
        }
    }

    /// Declare that `dependent` should be marked `needs_update` whenever
    /// `widget_id`'s value changes.
    pub fn add_dependency(&mut self, widget_id: &str, dependent: &str) {
        self.dependencies
            .entry(widget_id.to_string())
            .or_default()
            .push(dependent.to_string());
        if let Some(widget) = self.widgets.get_mut(widget_id) {
            widget.dependents.push(dependent.to_string());
        }
    }

    /// Parse, coerce, validate, and (if necessary) auto-repair `raw`
    /// against `widget_id`'s declared type and constraints, writing the
    /// result back into the registry. Returns the widgets that should be
    /// marked `needs_update` as a result.
    pub fn update_value(&mut self, widget_id: &str, raw: &str) -> Result<(AutoRepaired, Vec<String>)> {
        let widget = self
            .widgets
            .get(widget_id)
            .ok_or_else(|| Error::Widget(format!("unknown widget: {widget_id}")))?
            .clone();

        let parsed: serde_json::Value =
            serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));

        let (coerced, repaired) = coerce_and_validate(widget.kind, &widget.properties, &widget.value, &parsed);

        if let Some(existing) = self.widgets.get_mut(widget_id) {
            existing.value = coerced;
        }

        let dependents = self.dependencies.get(widget_id).cloned().unwrap_or_default();
        Ok((AutoRepaired(repaired), dependents))
    }
}

/// Coerce `raw` per `kind`'s rules, validate against `properties`, and
/// auto-repair out-of-range values. Returns `(value, was_repaired)`.
fn coerce_and_validate(
    kind: WidgetKind,
    properties: &WidgetProperties,
    previous: &serde_json::Value,
    raw: &serde_json::Value,
) -> (serde_json::Value, bool) {
    match kind {
        WidgetKind::Number | WidgetKind::Slider => {
            let number = raw
                .as_f64()
                .or_else(|| raw.as_str().and_then(|s| s.parse::<f64>().ok()))
                .unwrap_or_else(|| previous.as_f64().unwrap_or(0.0));

            let min = properties.min.unwrap_or(f64::MIN);
            let max = properties.max.unwrap_or(f64::MAX);
            let clamped = number.clamp(min, max);

            let snapped = match properties.step {
                Some(step) if step > 0.0 => min + ((clamped - min) / step).round() * step,
                _ => clamped,
            };

            let repaired = (snapped - number).abs() > f64::EPSILON;
            (serde_json::json!(snapped), repaired)
        }
        WidgetKind::Checkbox => {
            let value = raw
                .as_bool()
                .or_else(|| raw.as_str().map(|s| matches!(s, "true" | "1")))
                .unwrap_or(false);
            (serde_json::json!(value), false)
        }
        WidgetKind::Dropdown | WidgetKind::Radio => {
            let candidate = raw.as_str().map(str::to_string).unwrap_or_else(|| raw.to_string());
            match &properties.options {
                Some(options) if !options.contains(&candidate) => {
                    let fallback = options.first().cloned().unwrap_or_default();
                    (serde_json::json!(fallback), true)
                }
                _ => (serde_json::json!(candidate), false),
            }
        }
        WidgetKind::Multiselect => {
            let list: Vec<String> = match raw {
                serde_json::Value::Array(items) => {
                    items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()
                }
                serde_json::Value::String(s) => vec![s.clone()],
                other => vec![other.to_string()],
            };
            match &properties.options {
                Some(options) => {
                    let filtered: Vec<String> = list.into_iter().filter(|v| options.contains(v)).collect();
                    let repaired = filtered.is_empty();
                    (serde_json::json!(filtered), repaired)
                }
                None => (serde_json::json!(list), false),
            }
        }
        WidgetKind::RangeSlider => {
            let pair = raw
                .as_array()
                .and_then(|a| {
                    if a.len() == 2 {
                        Some((a[0].as_f64()?, a[1].as_f64()?))
                    } else {
                        None
                    }
                })
                .unwrap_or((0.0, 100.0));
            let repaired = raw.as_array().map(|a| a.len() != 2).unwrap_or(true);
            (serde_json::json!([pair.0, pair.1]), repaired)
        }
        WidgetKind::Text => {
            let text = raw.as_str().map(str::to_string).unwrap_or_else(|| raw.to_string());
            match properties.max_length {
                Some(max_length) if text.chars().count() > max_length => {
                    let truncated: String = text.chars().take(max_length).collect();
                    (serde_json::json!(truncated), true)
                }
                _ => (serde_json::json!(text), false),
            }
        }
        WidgetKind::Button => (previous.clone(), false),
    }
}

/// Canonicalise `(type, properties, value)` into a stable content hash and
/// return `"widget_" + first 8 hex chars`.
fn content_hash_id(handle: &WidgetHandle) -> String {
    let canonical = serde_json::json!({
        "type": handle.kind.as_str(),
        "properties": handle.properties,
        "value": handle.value,
    });
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    format!("widget_{}", hex_prefix(&digest, 8))
}

fn hex_prefix(bytes: &[u8], count: usize) -> String {
    bytes.iter().take((count + 1) / 2).map(|b| format!("{b:02x}")).collect::<String>()[..count].to_string()
}

/// Register widget constructor functions on `engine` so cells can create
/// widgets with `slider(min, max, step)`, `checkbox()`, etc.
pub fn register(engine: &mut Engine) {
    engine.register_type_with_name::<WidgetHandle>("Widget");

    engine.register_fn("slider", |min: f64, max: f64, step: f64| WidgetHandle {
        kind: WidgetKind::Slider,
        properties: WidgetProperties {
            min: Some(min),
            max: Some(max),
            step: Some(step),
            ..Default::default()
        },
        value: WidgetKind::Slider.default_value(),
    });

    engine.register_fn("range_slider", |min: f64, max: f64, step: f64| WidgetHandle {
        kind: WidgetKind::RangeSlider,
        properties: WidgetProperties {
            min: Some(min),
            max: Some(max),
            step: Some(step),
            ..Default::default()
        },
        value: WidgetKind::RangeSlider.default_value(),
    });

    engine.register_fn("number", |min: f64, max: f64, step: f64| WidgetHandle {
        kind: WidgetKind::Number,
        properties: WidgetProperties {
            min: Some(min),
            max: Some(max),
            step: Some(step),
            ..Default::default()
        },
        value: WidgetKind::Number.default_value(),
    });

    engine.register_fn("text_input", |max_length: i64| WidgetHandle {
        kind: WidgetKind::Text,
        properties: WidgetProperties {
            max_length: Some(max_length.max(0) as usize),
            ..Default::default()
        },
        value: WidgetKind::Text.default_value(),
    });

    engine.register_fn("checkbox", || WidgetHandle {
        kind: WidgetKind::Checkbox,
        properties: WidgetProperties::default(),
        value: WidgetKind::Checkbox.default_value(),
    });

    engine.register_fn("dropdown", |options: rhai::Array| WidgetHandle {
        kind: WidgetKind::Dropdown,
        properties: WidgetProperties {
            options: Some(options.iter().map(|o| o.to_string()).collect()),
            ..Default::default()
        },
        value: WidgetKind::Dropdown.default_value(),
    });

    engine.register_fn("radio", |options: rhai::Array| WidgetHandle {
        kind: WidgetKind::Radio,
        properties: WidgetProperties {
            options: Some(options.iter().map(|o| o.to_string()).collect()),
            ..Default::default()
        },
        value: WidgetKind::Radio.default_value(),
    });

    engine.register_fn("multiselect", |options: rhai::Array| WidgetHandle {
        kind: WidgetKind::Multiselect,
        properties: WidgetProperties {
            options: Some(options.iter().map(|o| o.to_string()).collect()),
            ..Default::default()
        },
        value: WidgetKind::Multiselect.default_value(),
    });

    engine.register_fn("button", |label: &str| WidgetHandle {
        kind: WidgetKind::Button,
        properties: WidgetProperties {
            label: Some(label.to_string()),
            ..Default::default()
        },
        value: WidgetKind::Button.default_value(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slider_handle() -> WidgetHandle {
        WidgetHandle {
            kind: WidgetKind::Slider,
            properties: WidgetProperties {
                min: Some(0.0),
                max: Some(10.0),
                step: Some(1.0),
                ..Default::default()
            },
            value: serde_json::json!(0),
        }
    }

    #[test]
    fn test_register_same_shape_twice_reuses_id() {
        let mut registry = WidgetRegistry::new();
        let first = registry.register(&slider_handle());
        let second = registry.register(&slider_handle());
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn test_register_different_value_gets_new_id() {
        let mut registry = WidgetRegistry::new();
        let first = registry.register(&slider_handle());
        let mut other = slider_handle();
        other.value = serde_json::json!(5);
        let second = registry.register(&other);
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_update_value_clamps_over_max() {
        let mut registry = WidgetRegistry::new();
        let widget = registry.register(&slider_handle());
        let (repaired, _) = registry.update_value(&widget.id, "\"15\"").unwrap();
        assert!(repaired.0);
        assert_eq!(registry.get(&widget.id).unwrap().value, serde_json::json!(10.0));
    }

    #[test]
    fn test_update_value_invalid_keeps_previous() {
        let mut registry = WidgetRegistry::new();
        let widget = registry.register(&slider_handle());
        let (_, _) = registry.update_value(&widget.id, "\"15\"").unwrap();
        let before = registry.get(&widget.id).unwrap().value.clone();
        registry.update_value(&widget.id, "\"abc\"").unwrap();
        assert_eq!(registry.get(&widget.id).unwrap().value, before);
    }

    #[test]
    fn test_remove_drops_widget_and_dependency_links() {
        let mut registry = WidgetRegistry::new();
        let widget = registry.register(&slider_handle());
        registry.add_dependency(&widget.id, "dependent_widget");

        registry.remove(&widget.id);
        assert!(registry.get(&widget.id).is_none());
        assert!(registry.update_value(&widget.id, "1").is_err());
    }

    #[test]
    fn test_update_unknown_widget_errors() {
        let mut registry = WidgetRegistry::new();
        assert!(registry.update_value("widget_ffffffff", "1").is_err());
    }

    #[test]
    fn test_dropdown_falls_back_to_first_option_on_invalid() {
        let mut registry = WidgetRegistry::new();
        let handle = WidgetHandle {
            kind: WidgetKind::Dropdown,
            properties: WidgetProperties {
                options: Some(vec!["a".to_string(), "b".to_string()]),
                ..Default::default()
            },
            value: serde_json::json!("a"),
        };
        let widget = registry.register(&handle);
        let (repaired, _) = registry.update_value(&widget.id, "\"z\"").unwrap();
        assert!(repaired.0);
        assert_eq!(registry.get(&widget.id).unwrap().value, serde_json::json!("a"));
    }

    #[test]
    fn test_text_truncates_over_max_length() {
        let mut registry = WidgetRegistry::new();
        let handle = WidgetHandle {
            kind: WidgetKind::Text,
            properties: WidgetProperties {
                max_length: Some(3),
                ..Default::default()
            },
            value: serde_json::json!(""),
        };
        let widget = registry.register(&handle);
        let (repaired, _) = registry.update_value(&widget.id, "\"hello\"").unwrap();
        assert!(repaired.0);
        assert_eq!(registry.get(&widget.id).unwrap().value, serde_json::json!("hel"));
    }
}
