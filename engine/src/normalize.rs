//! Normalization and validation of task data.
//!
//! The remote API is loosely typed: identifiers may be strings or numbers,
//! optional fields may be missing or null, and listings may come wrapped in
//! an `items` envelope. Everything entering the engine passes through here.

use crate::{error::Result, Error, Task, TaskStatus};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Title used when the server sends a task without one.
pub const UNTITLED: &str = "(untitled)";

/// Normalize one task object received from the remote API.
///
/// `now` stands in for a missing or unparseable `createdAt`.
pub fn normalize_task(value: &Value, now: DateTime<Utc>) -> Result<Task> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::InvalidPayload("task must be an object".into()))?;

    let id = identifier(obj.get("_id"))
        .or_else(|| identifier(obj.get("id")))
        .ok_or_else(|| Error::MissingRequiredField("_id".into()))?;

    let client_id = identifier(obj.get("clienteId"))
        .or_else(|| identifier(obj.get("clientId")))
        .unwrap_or_else(|| id.clone());

    let title = optional_string(obj.get("title"), "title")?.unwrap_or_else(|| UNTITLED.into());
    let description = optional_string(obj.get("description"), "description")?.unwrap_or_default();

    let status = obj
        .get("status")
        .and_then(Value::as_str)
        .map(TaskStatus::from_wire)
        .unwrap_or_default();

    let created_at = obj
        .get("createdAt")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now);

    Ok(Task {
        id,
        title,
        description,
        status,
        client_id,
        created_at,
        deleted: truthy(obj.get("deleted")),
    })
}

/// Normalize a task listing: either a bare array or `{"items": [...]}`.
pub fn parse_task_listing(value: &Value, now: DateTime<Utc>) -> Result<Vec<Task>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(obj) => obj
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::InvalidPayload("listing object without 'items' array".into()))?,
        other => {
            return Err(Error::InvalidPayload(format!(
                "listing must be an array, got {}",
                json_type_name(other)
            )))
        }
    };

    items.iter().map(|item| normalize_task(item, now)).collect()
}

/// Trim and require a non-empty title and description.
pub fn validate_text(title: &str, description: &str) -> Result<(String, String)> {
    let title = title.trim();
    if title.is_empty() {
        return Err(Error::MissingRequiredField("title".into()));
    }
    let description = description.trim();
    if description.is_empty() {
        return Err(Error::MissingRequiredField("description".into()));
    }
    Ok((title.to_string(), description.to_string()))
}

fn identifier(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn optional_string(value: Option<&Value>, field: &str) -> Result<Option<String>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(Error::TypeMismatch {
            field: field.to_string(),
            expected: "String".into(),
            got: json_type_name(other).into(),
        }),
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
        None | Some(Value::Null) => false,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        Value::Number(_) => "Float",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn full_task() {
        let task = normalize_task(
            &json!({
                "_id": "srv-1",
                "title": "Buy milk",
                "description": "2 litres",
                "status": "En Progreso",
                "clienteId": "c-1",
                "createdAt": "2024-02-01T10:00:00Z",
                "deleted": false
            }),
            now(),
        )
        .unwrap();

        assert_eq!(task.id, "srv-1");
        assert_eq!(task.client_id, "c-1");
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(
            task.created_at,
            Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn sparse_task_gets_defaults() {
        let task = normalize_task(&json!({"id": 42, "status": "nonsense"}), now()).unwrap();

        assert_eq!(task.id, "42");
        assert_eq!(task.client_id, "42");
        assert_eq!(task.title, UNTITLED);
        assert_eq!(task.description, "");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.created_at, now());
        assert!(!task.deleted);
    }

    #[test]
    fn missing_identifier_is_rejected() {
        let result = normalize_task(&json!({"title": "x"}), now());
        assert!(matches!(result, Err(Error::MissingRequiredField(_))));
    }

    #[test]
    fn non_string_title_is_rejected() {
        let result = normalize_task(&json!({"_id": "a", "title": ["x"]}), now());
        assert!(matches!(result, Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn listing_accepts_array_and_envelope() {
        let bare = parse_task_listing(&json!([{"_id": "a"}, {"_id": "b"}]), now()).unwrap();
        assert_eq!(bare.len(), 2);

        let wrapped = parse_task_listing(&json!({"items": [{"_id": "a"}]}), now()).unwrap();
        assert_eq!(wrapped.len(), 1);
    }

    #[test]
    fn listing_rejects_other_shapes() {
        assert!(parse_task_listing(&json!({"data": []}), now()).is_err());
        assert!(parse_task_listing(&json!("nope"), now()).is_err());
    }

    #[test]
    fn validate_text_trims() {
        let (title, description) = validate_text("  Buy milk ", "\t2 litres\n").unwrap();
        assert_eq!(title, "Buy milk");
        assert_eq!(description, "2 litres");

        assert!(validate_text("   ", "x").is_err());
        assert!(validate_text("x", "").is_err());
    }
}
