//! Query result normalization.
//!
//! Lock firmware renamed several record fields across releases and devices
//! running either generation are in the field. The functions here accept both
//! shapes and always produce the client's canonical names:
//!
//! | record       | legacy / server field | canonical field            |
//! |--------------|-----------------------|----------------------------|
//! | event        | `event_type`          | `event`                    |
//! | event        | `created_at`          | `timestamp`                |
//! | event        | (missing `param`)     | `param: 0`                 |
//! | unlock log   | `user_id`             | `uid`                      |
//! | unlock log   | `result` (1 / 0)      | `status` (success / fail)  |
//! | unlock log   | `created_at`          | `timestamp`                |
//!
//! This is a permanent compatibility shim: both schemas stay supported.
//! Fields not listed above are carried through untouched.

use doorlink_protocol::{QueryResult, SeqId, targets};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Password reported when the device has none configured.
pub const DEFAULT_PASSWORD: &str = "123456";

/// A doorbell / sensor event in canonical form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<Value>,
    /// `0` when the device omits it; otherwise kept as sent.
    #[serde(default = "default_param")]
    pub param: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    /// Fields without a canonical mapping.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Outcome of an unlock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockStatus {
    Success,
    Fail,
}

/// An unlock history entry in canonical form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockLog {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Value>,
    pub status: UnlockStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    /// Fields without a canonical mapping (e.g. `method`).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Normalized payload of a successful query result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TargetData {
    /// `password` target, with the default applied.
    Password { password: String },
    /// `events` target.
    Events(Vec<EventRecord>),
    /// `unlock_logs` target.
    UnlockLogs(Vec<UnlockLog>),
    /// Any other target; `data` as sent by the device.
    Raw(Option<Value>),
}

/// Success or failure of a normalized result.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success {
        data: TargetData,
        total: Option<u64>,
    },
    Failure(String),
}

/// A query result after normalization, as re-dispatched under
/// `<target>_query_result`.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetResult {
    pub target: String,
    pub seq_id: Option<SeqId>,
    pub outcome: Outcome,
}

impl TargetResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    /// The normalized data, if the query succeeded.
    pub fn data(&self) -> Option<&TargetData> {
        match &self.outcome {
            Outcome::Success { data, .. } => Some(data),
            Outcome::Failure(_) => None,
        }
    }

    /// The resolved password for a successful `password` result.
    pub fn password(&self) -> Option<&str> {
        match self.data() {
            Some(TargetData::Password { password }) => Some(password),
            _ => None,
        }
    }
}

/// Normalizes a query result for target-specific dispatch.
pub fn normalize_query_result(result: &QueryResult) -> TargetResult {
    let outcome = if result.is_success() {
        let data = match result.target.as_str() {
            targets::PASSWORD => TargetData::Password {
                password: resolve_password(result.data.as_ref()),
            },
            targets::EVENTS => TargetData::Events(normalize_events(result.records())),
            targets::UNLOCK_LOGS => TargetData::UnlockLogs(normalize_unlock_logs(result.records())),
            _ => TargetData::Raw(result.data.clone()),
        };
        Outcome::Success {
            data,
            total: result.total,
        }
    } else {
        Outcome::Failure(result.error_message().to_string())
    };

    TargetResult {
        target: result.target.clone(),
        seq_id: result.seq_id.clone(),
        outcome,
    }
}

/// Resolves `data.password`, falling back to [`DEFAULT_PASSWORD`] when it is
/// absent, null, empty, zero or `false`.
pub fn resolve_password(data: Option<&Value>) -> String {
    match data.and_then(|d| d.get("password")) {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) if n.as_f64() != Some(0.0) => n.to_string(),
        _ => DEFAULT_PASSWORD.to_string(),
    }
}

/// Normalizes a list of event records. Non-object entries are skipped.
pub fn normalize_events(records: &[Value]) -> Vec<EventRecord> {
    records
        .iter()
        .filter_map(Value::as_object)
        .map(normalize_event)
        .collect()
}

/// Normalizes one event record.
pub fn normalize_event(record: &Map<String, Value>) -> EventRecord {
    const CONSUMED: &[&str] = &["id", "event_type", "event", "created_at", "timestamp", "param"];

    EventRecord {
        id: present(record, "id").cloned(),
        event: present(record, "event_type")
            .or_else(|| present(record, "event"))
            .cloned(),
        param: present(record, "param").cloned().unwrap_or_else(default_param),
        timestamp: timestamp(record),
        extra: remaining(record, CONSUMED),
    }
}

fn default_param() -> Value {
    Value::from(0)
}

/// Normalizes a list of unlock-log records. Non-object entries are skipped.
pub fn normalize_unlock_logs(records: &[Value]) -> Vec<UnlockLog> {
    records
        .iter()
        .filter_map(Value::as_object)
        .map(normalize_unlock_log)
        .collect()
}

/// Normalizes one unlock-log record.
pub fn normalize_unlock_log(record: &Map<String, Value>) -> UnlockLog {
    const CONSUMED: &[&str] = &["id", "user_id", "uid", "result", "status", "created_at", "timestamp"];

    let status = match present(record, "result") {
        Some(result) => {
            if result.as_i64() == Some(1) {
                UnlockStatus::Success
            } else {
                UnlockStatus::Fail
            }
        }
        None => match present(record, "status").and_then(Value::as_str) {
            Some("success") => UnlockStatus::Success,
            _ => UnlockStatus::Fail,
        },
    };

    UnlockLog {
        id: present(record, "id").cloned(),
        uid: present(record, "user_id")
            .or_else(|| present(record, "uid"))
            .cloned(),
        status,
        timestamp: timestamp(record),
        extra: remaining(record, CONSUMED),
    }
}

/// A field that exists and is not null.
fn present<'a>(record: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    record.get(key).filter(|v| !v.is_null())
}

fn timestamp(record: &Map<String, Value>) -> Option<Value> {
    present(record, "created_at")
        .or_else(|| present(record, "timestamp"))
        .cloned()
}

fn remaining(record: &Map<String, Value>, consumed: &[&str]) -> Map<String, Value> {
    record
        .iter()
        .filter(|(k, _)| !consumed.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn password_defaults() {
        assert_eq!(resolve_password(None), "123456");
        assert_eq!(resolve_password(Some(&json!({}))), "123456");
        assert_eq!(resolve_password(Some(&json!({"password": ""}))), "123456");
        assert_eq!(resolve_password(Some(&json!({"password": null}))), "123456");
        assert_eq!(resolve_password(Some(&json!({"password": false}))), "123456");
        assert_eq!(resolve_password(Some(&json!({"password": 0}))), "123456");
        assert_eq!(resolve_password(Some(&json!([]))), "123456");
    }

    #[test]
    fn password_configured() {
        assert_eq!(resolve_password(Some(&json!({"password": "654321"}))), "654321");
        assert_eq!(resolve_password(Some(&json!({"password": 111222}))), "111222");
    }

    #[test]
    fn event_server_schema() {
        let record = normalize_event(&obj(json!({
            "id": 501, "event_type": "bell", "param": 1, "created_at": "T"
        })));
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({"id": 501, "event": "bell", "param": 1, "timestamp": "T"})
        );
    }

    #[test]
    fn event_missing_param_defaults_to_zero() {
        let record = normalize_event(&obj(json!({"id": 502, "event_type": "motion", "created_at": "T"})));
        assert_eq!(record.param, json!(0));
        assert_eq!(record.event, Some(json!("motion")));

        let record = normalize_event(&obj(json!({"event_type": "motion", "param": null})));
        assert_eq!(record.param, json!(0));
    }

    #[test]
    fn event_fields_keep_their_type() {
        let record = normalize_event(&obj(json!({
            "id": 9, "event_type": 3, "param": "2", "created_at": "T"
        })));
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({"id": 9, "event": 3, "param": "2", "timestamp": "T"})
        );

        let record = normalize_event(&obj(json!({"event": {"code": 4}, "param": 1.5})));
        assert_eq!(record.event, Some(json!({"code": 4})));
        assert_eq!(record.param, json!(1.5));
    }

    #[test]
    fn event_client_schema_passthrough() {
        let record = normalize_event(&obj(json!({
            "id": 7, "event": "tamper", "param": 3, "timestamp": 1700000000, "zone": "front"
        })));
        assert_eq!(record.event, Some(json!("tamper")));
        assert_eq!(record.timestamp, Some(json!(1700000000)));
        assert_eq!(record.extra.get("zone"), Some(&json!("front")));
    }

    #[test]
    fn event_server_fields_win() {
        let record = normalize_event(&obj(json!({
            "event_type": "bell", "event": "stale", "created_at": "new", "timestamp": "old"
        })));
        assert_eq!(record.event, Some(json!("bell")));
        assert_eq!(record.timestamp, Some(json!("new")));
        assert!(record.extra.is_empty());
    }

    #[test]
    fn unlock_log_server_schema() {
        let log = normalize_unlock_log(&obj(json!({
            "id": 201, "method": "finger", "user_id": 5, "result": 1, "created_at": "T"
        })));
        assert_eq!(
            serde_json::to_value(&log).unwrap(),
            json!({"id": 201, "method": "finger", "uid": 5, "status": "success", "timestamp": "T"})
        );
    }

    #[test]
    fn unlock_log_failed_result() {
        let log = normalize_unlock_log(&obj(json!({"id": 202, "user_id": 5, "result": 0})));
        assert_eq!(log.status, UnlockStatus::Fail);
        assert!(log.timestamp.is_none());
    }

    #[test]
    fn unlock_log_client_schema() {
        let log = normalize_unlock_log(&obj(json!({
            "id": 203, "uid": 9, "status": "success", "timestamp": "T2"
        })));
        assert_eq!(log.uid, Some(json!(9)));
        assert_eq!(log.status, UnlockStatus::Success);
        assert_eq!(log.timestamp, Some(json!("T2")));
    }

    #[test]
    fn lists_skip_non_objects() {
        let events = normalize_events(&[json!({"event_type": "bell"}), json!(3), json!(null)]);
        assert_eq!(events.len(), 1);
        let logs = normalize_unlock_logs(&[json!("x"), json!({"result": 1})]);
        assert_eq!(logs.len(), 1);
    }

    #[test]
    fn normalize_password_result() {
        let result = QueryResult::success("password", json!({})).with_seq_id(SeqId::new("s"));
        let normalized = normalize_query_result(&result);
        assert_eq!(normalized.password(), Some("123456"));
        assert_eq!(normalized.seq_id, Some(SeqId::new("s")));
        assert_eq!(
            serde_json::to_value(normalized.data().unwrap()).unwrap(),
            json!({"password": "123456"})
        );
    }

    #[test]
    fn normalize_events_result() {
        let result = QueryResult::success(
            "events",
            json!([{"id": 501, "event_type": "bell", "param": 1, "created_at": "T"}]),
        )
        .with_total(40);
        let normalized = normalize_query_result(&result);
        let Outcome::Success { data: TargetData::Events(events), total } = normalized.outcome else {
            panic!("expected events");
        };
        assert_eq!(total, Some(40));
        assert_eq!(events[0].event, Some(json!("bell")));
    }

    #[test]
    fn normalize_other_target_is_raw() {
        let result = QueryResult::success("visitor_intents", json!([{"intent": "delivery"}]));
        let normalized = normalize_query_result(&result);
        assert_eq!(
            normalized.data(),
            Some(&TargetData::Raw(Some(json!([{"intent": "delivery"}]))))
        );
    }

    #[test]
    fn normalize_failure() {
        let result = QueryResult::failure("password", "not authorized");
        let normalized = normalize_query_result(&result);
        assert!(!normalized.is_success());
        assert_eq!(normalized.outcome, Outcome::Failure("not authorized".into()));
        assert!(normalized.password().is_none());
    }

    #[test]
    fn unlock_logs_snapshot() {
        let logs = normalize_unlock_logs(&[
            json!({"id": 1, "user_id": 2, "result": 1, "created_at": "2026-01-01T08:00:00Z"}),
            json!({"id": 2, "uid": 3, "status": "fail", "timestamp": "2026-01-01T09:00:00Z"}),
        ]);
        insta::assert_json_snapshot!(logs, @r#"
        [
          {
            "id": 1,
            "uid": 2,
            "status": "success",
            "timestamp": "2026-01-01T08:00:00Z"
          },
          {
            "id": 2,
            "uid": 3,
            "status": "fail",
            "timestamp": "2026-01-01T09:00:00Z"
          }
        ]
        "#);
    }
}
