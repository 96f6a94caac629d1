//! Prompts for VLM-based field extraction.
//!
//! Every instruction sent to the model lives here so prompt changes touch
//! one file and unit tests can inspect prompts without a live model.

use crate::schema::ExtractionSchema;

/// Instruction used when no schema is supplied: the model identifies the
/// document type and every field it can see.
pub const FREEFORM_EXTRACTION_PROMPT: &str = r#"Analyze this scanned document page and extract all visible information.
Identify the document type and every field present (headers, form fields and their values, table rows, important numbers and dates, key-value pairs).

Return ONLY valid JSON with this structure, no explanations and no code fences:
{
  "document_type": "detected type",
  "fields": {
    "field_name": "value"
  },
  "confidence": {
    "field_name": 0.95
  }
}

Use "N/A" for values that are missing or unreadable. Confidence scores are between 0 and 1."#;

/// Build the schema-conformant extraction instruction.
pub fn schema_extraction_prompt(schema: &ExtractionSchema) -> String {
    format!(
        r#"Analyze this scanned document page and extract data according to this schema:
{schema}

Rules:
1. Extract all visible text and data from the page
2. Match extracted data to the schema fields, using the exact field names
3. For any missing or unreadable field, use "N/A"
4. Include a confidence score between 0 and 1 for each field

Return ONLY valid JSON with this structure, no explanations and no code fences:
{{
  "fields": {{ "field_name": "value" }},
  "confidence": {{ "field_name": 0.95 }}
}}"#,
        schema = schema.to_prompt_json()
    )
}

/// Pick the prompt for a page.
pub fn extraction_prompt(schema: Option<&ExtractionSchema>) -> String {
    match schema {
        Some(s) => schema_extraction_prompt(s),
        None => FREEFORM_EXTRACTION_PROMPT.to_string(),
    }
}

/// Instruction used by schema detection on a sample page.
pub const SCHEMA_DETECTION_PROMPT: &str = r#"Analyze this document image and:
1. Identify the document type (e.g. invoice, receipt, application form, report)
2. List all visible fields and their data types
3. Determine which fields are required and which are optional
4. Provide a sample extraction of the visible data

Return ONLY valid JSON with this structure:
{
  "detected_type": "document type name",
  "description": "brief description of the document",
  "confidence": 0.95,
  "fields": {
    "field_name": {
      "type": "string|number|date|boolean|array",
      "description": "what this field contains"
    }
  },
  "required_fields": ["field1", "field2"],
  "sample_extraction": {
    "field_name": "extracted value"
  }
}"#;

/// Schema detection prompt with optional caller context.
pub fn schema_detection_prompt(hint: Option<&str>) -> String {
    match hint {
        Some(h) if !h.trim().is_empty() => {
            format!("{SCHEMA_DETECTION_PROMPT}\n\nAdditional context: {}", h.trim())
        }
        _ => SCHEMA_DETECTION_PROMPT.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSpec;

    #[test]
    fn freeform_prompt_asks_for_document_type_and_confidence() {
        let p = extraction_prompt(None);
        assert!(p.contains("document_type"));
        assert!(p.contains("confidence"));
        assert!(p.contains("N/A"));
    }

    #[test]
    fn schema_prompt_embeds_fields() {
        let schema = ExtractionSchema::new()
            .with_field("invoice_number", FieldSpec::new("string", "Invoice id"))
            .require("invoice_number");
        let p = extraction_prompt(Some(&schema));
        assert!(p.contains("invoice_number"));
        assert!(p.contains("Invoice id"));
        assert!(p.contains("\"N/A\""));
        assert!(p.contains("{ \"field_name\": \"value\" }"));
    }

    #[test]
    fn detection_prompt_appends_hint() {
        assert_eq!(schema_detection_prompt(None), SCHEMA_DETECTION_PROMPT);
        assert_eq!(schema_detection_prompt(Some("  ")), SCHEMA_DETECTION_PROMPT);
        assert!(schema_detection_prompt(Some("utility bills")).ends_with("utility bills"));
    }
}
