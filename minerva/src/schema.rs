//! Declarative descriptions of each provider's configuration surface.
//!
//! Nothing here is enforced by the adapters; the records exist so a form
//! renderer can build connection and generation-parameter editors.

use serde::Serialize;
use serde_json::{Map, Value, json};

/// Form control used to edit a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Password,
    Url,
    Number,
    Range,
    Select,
    Checkbox,
    Textarea,
}

/// Constraints and default for a generation parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParameterOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<&'static str>,
}

impl ParameterOptions {
    pub fn range(min: f64, max: f64, step: f64, default: impl Into<Value>) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            step: Some(step),
            default: Some(default.into()),
            choices: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationParameter {
    pub name: &'static str,
    pub label: &'static str,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub options: ParameterOptions,
}

impl GenerationParameter {
    pub fn new(
        name: &'static str,
        label: &'static str,
        field_type: FieldType,
        options: ParameterOptions,
    ) -> Self {
        Self {
            name,
            label,
            field_type,
            options,
        }
    }
}

/// One field of a connection form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionField {
    pub name: &'static str,
    pub label: &'static str,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<&'static str>,
}

impl ConnectionField {
    pub fn required(name: &'static str, label: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            label,
            field_type,
            required: true,
            placeholder: None,
        }
    }

    pub fn optional(name: &'static str, label: &'static str, field_type: FieldType) -> Self {
        Self {
            required: false,
            ..Self::required(name, label, field_type)
        }
    }

    pub fn placeholder(mut self, placeholder: &'static str) -> Self {
        self.placeholder = Some(placeholder);
        self
    }
}

/// Connection-config surface of one provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSchema {
    pub provider: &'static str,
    pub label: &'static str,
    pub fields: Vec<ConnectionField>,
}

/// Parameter map filled with every default the schema declares.
pub fn default_parameters(schema: &[GenerationParameter]) -> Map<String, Value> {
    schema
        .iter()
        .filter_map(|p| p.options.default.clone().map(|d| (p.name.to_string(), d)))
        .collect()
}

/// Convert a raw `value` into the JSON type the schema declares for `name`.
///
/// Unknown names are passed through: numbers and booleans are recognised,
/// anything else stays a string.
pub fn coerce_parameter(schema: &[GenerationParameter], name: &str, raw: &str) -> Value {
    let raw = raw.trim();
    match schema.iter().find(|p| p.name == name).map(|p| p.field_type) {
        Some(FieldType::Number | FieldType::Range) => number_value(raw),
        Some(FieldType::Checkbox) => match raw {
            "true" | "1" | "on" | "yes" => Value::Bool(true),
            "false" | "0" | "off" | "no" => Value::Bool(false),
            other => json!(other),
        },
        Some(_) => json!(raw),
        None => match raw {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            other => number_value(other),
        },
    }
}

fn number_value(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return json!(i);
    }
    match raw.parse::<f64>() {
        Ok(f) if f.is_finite() => json!(f),
        _ => json!(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Vec<GenerationParameter> {
        vec![
            GenerationParameter::new(
                "temperature",
                "Temperature",
                FieldType::Range,
                ParameterOptions::range(0.0, 2.0, 0.05, 1.0),
            ),
            GenerationParameter::new(
                "stop",
                "Stop sequence",
                FieldType::Text,
                ParameterOptions::default(),
            ),
            GenerationParameter::new(
                "logprobs",
                "Log probabilities",
                FieldType::Checkbox,
                ParameterOptions::default(),
            ),
        ]
    }

    #[test]
    fn defaults_only_include_declared_values() {
        let defaults = default_parameters(&schema());
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults["temperature"], json!(1.0));
    }

    #[test]
    fn coerce_follows_field_type() {
        let s = schema();
        assert_eq!(coerce_parameter(&s, "temperature", "0.7"), json!(0.7));
        assert_eq!(coerce_parameter(&s, "stop", "42"), json!("42"));
        assert_eq!(coerce_parameter(&s, "logprobs", "on"), json!(true));
    }

    #[test]
    fn coerce_unknown_names_guesses() {
        let s = schema();
        assert_eq!(coerce_parameter(&s, "seed", "7"), json!(7));
        assert_eq!(coerce_parameter(&s, "echo", "false"), json!(false));
        assert_eq!(coerce_parameter(&s, "user", "alice"), json!("alice"));
    }

    #[test]
    fn parameter_serializes_type_field() {
        let p = &schema()[0];
        let v = serde_json::to_value(p).unwrap();
        assert_eq!(v["type"], "range");
        assert_eq!(v["options"]["max"], json!(2.0));
        assert!(v["options"].get("choices").is_none());
    }
}
