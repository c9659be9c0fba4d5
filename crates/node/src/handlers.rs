//! Handlers built into the `jobforge` binary.

use serde_json::{Value as JsonValue, json};

use jobforge_manifest::BatchPayload;
use jobforge_worker::{HandlerRegistry, HandlerResult};

pub fn builtin_registry() -> HandlerRegistry {
    HandlerRegistry::new()
        .with("passthrough", passthrough)
        .with("count_records", count_records)
        .with("uppercase_text", uppercase_text)
}

fn passthrough(batch: &BatchPayload) -> HandlerResult {
    Ok(batch.records.clone())
}

/// One summary record per batch.
fn count_records(batch: &BatchPayload) -> HandlerResult {
    Ok(vec![json!({
        "batch_id": batch.batch_id.as_str(),
        "count": batch.records.len(),
    })])
}

/// Upper-cases every string, including those nested in arrays and objects.
fn uppercase_text(batch: &BatchPayload) -> HandlerResult {
    Ok(batch.records.iter().map(uppercase).collect())
}

fn uppercase(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::String(s) => JsonValue::String(s.to_uppercase()),
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(uppercase).collect()),
        JsonValue::Object(map) => JsonValue::Object(map.iter().map(|(k, v)| (k.clone(), uppercase(v))).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobforge_core::{BatchId, JobId};

    fn batch(records: Vec<JsonValue>) -> BatchPayload {
        let job_id = JobId::new();
        BatchPayload {
            job_id,
            batch_id: BatchId::for_ordinal(job_id, 4),
            records,
        }
    }

    fn run(name: &str, records: Vec<JsonValue>) -> Vec<JsonValue> {
        let handler = builtin_registry().resolve(name).unwrap();
        handler(&batch(records)).unwrap()
    }

    #[test]
    fn passthrough_returns_records_unchanged() {
        let records = vec![json!({ "a": 1 }), json!("x")];
        assert_eq!(run("passthrough", records.clone()), records);
    }

    #[test]
    fn count_records_summarizes_the_batch() {
        let out = run("count_records", vec![json!(1), json!(2), json!(3)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["count"], json!(3));
        assert!(out[0]["batch_id"].as_str().unwrap().ends_with("-batch-00000000000000000004"));
    }

    #[test]
    fn uppercase_text_reaches_nested_strings() {
        let out = run(
            "uppercase_text",
            vec![json!("hello"), json!({ "name": "ada", "tags": ["x", 1] })],
        );
        assert_eq!(out, vec![json!("HELLO"), json!({ "name": "ADA", "tags": ["X", 1] })]);
    }

    #[test]
    fn unknown_names_do_not_resolve() {
        assert!(!builtin_registry().contains("word_count"));
    }
}
