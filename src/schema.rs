//! Caller-supplied extraction schema.
//!
//! A schema tells the vision model which fields to look for and lets the
//! pipeline fill required fields with `"N/A"` when no page produced them.
//! It is passed by reference through the whole run and never mutated.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The description of one expected field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Free-form type hint: `string`, `number`, `date`, `boolean`, `array`.
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: String,
    #[serde(default)]
    pub description: String,
}

fn default_field_type() -> String {
    "string".to_string()
}

impl FieldSpec {
    pub fn new(field_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            field_type: field_type.into(),
            description: description.into(),
        }
    }
}

/// Field name → spec, plus the ordered list of required field names.
///
/// `fields` keeps declaration order (serde_json's `preserve_order`), which
/// is also the order the prompt lists them in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub fields: serde_json::Map<String, Value>,
    #[serde(default)]
    pub required_fields: Vec<String>,
}

impl ExtractionSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        // FieldSpec serialisation cannot fail: two plain strings.
        let value = serde_json::to_value(&spec).unwrap_or(Value::Null);
        self.fields.insert(name.into(), value);
        self
    }

    pub fn require(mut self, name: impl Into<String>) -> Self {
        self.required_fields.push(name.into());
        self
    }

    /// Parse a schema from JSON text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Typed view of one field. Loose entries (a bare type string such as
    /// `"invoice_no": "string"`) are accepted as well.
    pub fn field(&self, name: &str) -> Option<FieldSpec> {
        match self.fields.get(name)? {
            Value::String(t) => Some(FieldSpec::new(t.clone(), "")),
            other => serde_json::from_value(other.clone()).ok(),
        }
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Pretty JSON used inside the extraction prompt.
    pub fn to_prompt_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_schema_json() {
        let schema = ExtractionSchema::from_json(
            r#"{
                "name": "Invoice",
                "fields": {
                    "invoice_number": {"type": "string", "description": "Invoice id"},
                    "total": {"type": "number", "description": "Grand total"},
                    "currency": "string"
                },
                "required_fields": ["invoice_number", "total"]
            }"#,
        )
        .expect("valid schema");

        assert_eq!(schema.name.as_deref(), Some("Invoice"));
        assert_eq!(
            schema.field_names().collect::<Vec<_>>(),
            vec!["invoice_number", "total", "currency"]
        );
        assert_eq!(schema.field("total").unwrap().field_type, "number");
        assert_eq!(schema.field("currency").unwrap().field_type, "string");
        assert_eq!(schema.required_fields, vec!["invoice_number", "total"]);
    }

    #[test]
    fn required_fields_default_to_empty() {
        let schema = ExtractionSchema::from_json(r#"{"fields": {}}"#).unwrap();
        assert!(schema.required_fields.is_empty());
    }

    #[test]
    fn builder_keeps_declaration_order() {
        let schema = ExtractionSchema::new()
            .with_field("b", FieldSpec::new("string", "second letter"))
            .with_field("a", FieldSpec::new("string", "first letter"))
            .require("a");
        assert_eq!(schema.field_names().collect::<Vec<_>>(), vec!["b", "a"]);
        assert!(schema.to_prompt_json().contains("first letter"));
    }
}
