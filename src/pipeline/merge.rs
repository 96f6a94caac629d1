//! Merge per-page fields into one document-level record.
//!
//! One rule: walk pages in page order and keep, for every field, the first
//! non-empty value seen. A field that already holds a non-empty value is
//! never overwritten. An empty value (`null`, `""`, `"N/A"`) only occupies a
//! slot until a later page provides something better.

use crate::output::{is_empty_value, PageResult, NOT_AVAILABLE};
use crate::schema::ExtractionSchema;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Merge page fields. Pages must already be in page order.
///
/// A single page is returned unchanged. Field order follows first appearance.
pub fn merge(pages: &[PageResult]) -> Map<String, Value> {
    match pages {
        [] => Map::new(),
        [only] => only.fields.clone(),
        _ => {
            let mut merged = Map::new();
            for page in pages {
                for (key, value) in &page.fields {
                    match merged.get(key) {
                        None => {
                            merged.insert(key.clone(), value.clone());
                        }
                        Some(existing) if is_empty_value(existing) && !is_empty_value(value) => {
                            merged.insert(key.clone(), value.clone());
                        }
                        Some(_) => {}
                    }
                }
            }
            merged
        }
    }
}

/// Per-field mean of the confidence scores reported across pages.
pub fn average_confidence(pages: &[PageResult]) -> BTreeMap<String, f32> {
    let mut sums: BTreeMap<&str, (f32, u32)> = BTreeMap::new();
    for page in pages {
        for (field, score) in &page.confidence {
            let entry = sums.entry(field.as_str()).or_insert((0.0, 0));
            entry.0 += score;
            entry.1 += 1;
        }
    }
    sums.into_iter()
        .map(|(field, (sum, n))| (field.to_string(), sum / n as f32))
        .collect()
}

/// Set every required field that is missing or empty to `"N/A"`.
pub fn fill_required(record: &mut Map<String, Value>, schema: &ExtractionSchema) {
    for field in &schema.required_fields {
        let missing = record.get(field).is_none_or(is_empty_value);
        if missing {
            record.insert(field.clone(), Value::String(NOT_AVAILABLE.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page(index: usize, fields: Value) -> PageResult {
        let Value::Object(map) = fields else {
            panic!("fields must be an object")
        };
        PageResult::new(index, map)
    }

    #[test]
    fn empty_input_merges_to_empty() {
        assert!(merge(&[]).is_empty());
    }

    #[test]
    fn single_page_is_returned_unchanged() {
        let p = page(1, json!({"a": "N/A", "b": "", "c": 3}));
        assert_eq!(merge(std::slice::from_ref(&p)), p.fields);
    }

    #[test]
    fn first_non_empty_value_wins() {
        let pages = vec![
            page(1, json!({"name": "ACME", "total": "N/A"})),
            page(2, json!({"name": "Other Corp", "total": "", "date": "2024-01-01"})),
            page(3, json!({"total": 99.5, "date": "2025-12-31"})),
        ];
        let merged = merge(&pages);
        assert_eq!(merged["name"], "ACME");
        assert_eq!(merged["total"], json!(99.5));
        assert_eq!(merged["date"], "2024-01-01");
    }

    #[test]
    fn filled_field_is_never_overwritten_even_by_empty() {
        let pages = vec![
            page(1, json!({"x": "kept"})),
            page(2, json!({"x": null})),
            page(3, json!({"x": "N/A"})),
            page(4, json!({"x": "later"})),
        ];
        assert_eq!(merge(&pages)["x"], "kept");
    }

    #[test]
    fn empty_slots_do_not_change_outcome_when_reordered() {
        let a = vec![
            page(1, json!({"x": null})),
            page(2, json!({"x": ""})),
            page(3, json!({"x": "value"})),
        ];
        let b = vec![
            page(1, json!({"x": ""})),
            page(2, json!({"x": null})),
            page(3, json!({"x": "value"})),
        ];
        assert_eq!(merge(&a), merge(&b));
    }

    #[test]
    fn field_order_follows_first_appearance() {
        let pages = vec![page(1, json!({"b": 1, "a": 2})), page(2, json!({"c": 3}))];
        let keys: Vec<_> = merge(&pages).keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn confidence_is_averaged_per_field() {
        let mut p1 = page(1, json!({}));
        p1.confidence.insert("total".into(), 0.5);
        let mut p2 = page(2, json!({}));
        p2.confidence.insert("total".into(), 1.0);
        p2.confidence.insert("date".into(), 0.25);

        let avg = average_confidence(&[p1, p2]);
        assert!((avg["total"] - 0.75).abs() < 1e-6);
        assert!((avg["date"] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn required_fields_are_filled_with_sentinel() {
        let schema = ExtractionSchema::new().require("total").require("date").require("name");
        let Value::Object(mut record) = json!({"total": 10, "date": ""}) else {
            unreachable!()
        };
        fill_required(&mut record, &schema);
        assert_eq!(record["total"], 10);
        assert_eq!(record["date"], NOT_AVAILABLE);
        assert_eq!(record["name"], NOT_AVAILABLE);
    }
}
