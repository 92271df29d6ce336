//! Mock incident-table service.
//!
//! Simulates the subset of the ServiceNow Incident Table API the agent
//! talks to, for local stacks and integration tests:
//!
//!   POST   /api/now/table/incident            create (201, `{result}`)
//!   GET    /api/now/table/incident            list, `sysparm_query` filter
//!   GET    /api/now/table/incident/{sys_id}   fetch (404 envelope)
//!   PATCH  /api/now/table/incident/{sys_id}   merge-update fields
//!   GET    /health                            readiness probe
//!
//! Incident numbers are `INC%07d` from a monotonic counter. All access to
//! the in-memory store goes through one mutex; write visibility is
//! linearizable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

#[derive(Default)]
struct IncidentStore {
    records: HashMap<String, Value>,
    counter: u64,
}

/// Shared state behind the router; cheap to clone.
#[derive(Clone, Default)]
pub struct MockTicketing {
    store: Arc<Mutex<IncidentStore>>,
}

impl MockTicketing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/api/now/table/incident", get(list_incidents).post(create_incident))
            .route(
                "/api/now/table/incident/:sys_id",
                get(get_incident).patch(update_incident),
            )
            .route("/health", get(health))
            .with_state(self)
    }
}

fn now_str() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

fn next_number(counter: &mut u64) -> String {
    *counter += 1;
    format!("INC{:07}", *counter)
}

/// Materialize a full incident record from the request body, carrying any
/// extra fields (control metadata and the like) through transparently.
fn build_record(payload: &Map<String, Value>, counter: &mut u64) -> Value {
    let now = now_str();
    let mut record = Map::new();
    record.insert("sys_id".into(), json!(Uuid::new_v4().to_string()));
    record.insert("number".into(), json!(next_number(counter)));
    record.insert("short_description".into(), field_or(payload, "short_description", json!("")));
    record.insert("description".into(), field_or(payload, "description", json!("")));
    record.insert("state".into(), field_or(payload, "state", json!(1)));
    record.insert("priority".into(), field_or(payload, "priority", json!(3)));
    record.insert("category".into(), field_or(payload, "category", json!("software")));
    record.insert("assignment_group".into(), field_or(payload, "assignment_group", json!("")));
    record.insert("assigned_to".into(), field_or(payload, "assigned_to", json!("")));
    record.insert("caller_id".into(), field_or(payload, "caller_id", json!("")));
    record.insert("sys_created_by".into(), field_or(payload, "sys_created_by", json!("trustagent")));
    record.insert("opened_at".into(), json!(now));
    record.insert("sys_updated_on".into(), json!(now));
    for (key, value) in payload {
        if !record.contains_key(key) {
            record.insert(key.clone(), value.clone());
        }
    }
    Value::Object(record)
}

fn field_or(payload: &Map<String, Value>, key: &str, default: Value) -> Value {
    payload.get(key).cloned().unwrap_or(default)
}

/// Minimal `sysparm_query` evaluation: `field=value` clauses joined by `^`,
/// AND logic only, string comparison on both sides.
fn matches_query(record: &Value, sysparm_query: &str) -> bool {
    if sysparm_query.is_empty() {
        return true;
    }
    for clause in sysparm_query.split('^') {
        let Some((field, value)) = clause.split_once('=') else {
            continue;
        };
        let Some(actual) = record.get(field.trim()) else {
            return false;
        };
        let actual_str = match actual {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if actual_str != value.trim() {
            return false;
        }
    }
    true
}

fn not_found(sys_id: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": "No Record found", "sys_id": sys_id})))
        .into_response()
}

async fn create_incident(
    State(state): State<MockTicketing>,
    Json(body): Json<Value>,
) -> Response {
    let Some(payload) = body.as_object() else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "expected a JSON object"})))
            .into_response();
    };
    if !payload.get("short_description").map(Value::is_string).unwrap_or(false) {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "short_description is required"})))
            .into_response();
    }
    let mut store = state.store.lock().expect("incident store poisoned");
    let record = build_record(payload, &mut store.counter);
    let sys_id = record["sys_id"].as_str().unwrap_or_default().to_string();
    store.records.insert(sys_id, record.clone());
    (StatusCode::CREATED, Json(json!({"result": record}))).into_response()
}

#[derive(Deserialize)]
struct ListParams {
    #[serde(default)]
    sysparm_query: String,
    #[serde(default = "default_limit")]
    sysparm_limit: usize,
    #[serde(default)]
    sysparm_offset: usize,
}

fn default_limit() -> usize {
    100
}

async fn list_incidents(
    State(state): State<MockTicketing>,
    Query(params): Query<ListParams>,
) -> Json<Value> {
    let records: Vec<Value> = {
        let store = state.store.lock().expect("incident store poisoned");
        store.records.values().cloned().collect()
    };
    let mut matched: Vec<Value> =
        records.into_iter().filter(|r| matches_query(r, &params.sysparm_query)).collect();
    matched.sort_by(|a, b| {
        let a_key = a.get("opened_at").and_then(Value::as_str).unwrap_or_default();
        let b_key = b.get("opened_at").and_then(Value::as_str).unwrap_or_default();
        b_key.cmp(a_key)
    });
    // The incident table caps page sizes at 1..=1000.
    let limit = params.sysparm_limit.clamp(1, 1000);
    let page: Vec<Value> =
        matched.into_iter().skip(params.sysparm_offset).take(limit).collect();
    Json(json!({"result": page}))
}

async fn get_incident(
    State(state): State<MockTicketing>,
    Path(sys_id): Path<String>,
) -> Response {
    let store = state.store.lock().expect("incident store poisoned");
    match store.records.get(&sys_id) {
        Some(record) => Json(json!({"result": record})).into_response(),
        None => not_found(&sys_id),
    }
}

async fn update_incident(
    State(state): State<MockTicketing>,
    Path(sys_id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let Some(updates) = body.as_object() else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "expected a JSON object"})))
            .into_response();
    };
    let mut store = state.store.lock().expect("incident store poisoned");
    let Some(record) = store.records.get_mut(&sys_id) else {
        return not_found(&sys_id);
    };
    if let Some(fields) = record.as_object_mut() {
        for (key, value) in updates {
            fields.insert(key.clone(), value.clone());
        }
        fields.insert("sys_updated_on".into(), json!(now_str()));
    }
    Json(json!({"result": record})).into_response()
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok", "service": "trustagent-ticketing"}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incident_numbers_are_sequential() {
        let mut counter = 0;
        assert_eq!(next_number(&mut counter), "INC0000001");
        assert_eq!(next_number(&mut counter), "INC0000002");
        assert_eq!(next_number(&mut counter), "INC0000003");
    }

    #[test]
    fn sysparm_query_conjunctions() {
        let record = json!({"state": 1, "priority": 2, "control_id": "LA.02"});
        assert!(matches_query(&record, ""));
        assert!(matches_query(&record, "state=1"));
        assert!(matches_query(&record, "state=1^priority=2"));
        assert!(matches_query(&record, "control_id=LA.02"));
        assert!(!matches_query(&record, "state=1^priority=3"));
        assert!(!matches_query(&record, "missing_field=x"));
    }

    #[test]
    fn build_record_carries_extra_fields() {
        let mut counter = 0;
        let payload = json!({
            "short_description": "s",
            "priority": 2,
            "control_id": "LA.01",
            "evidence_id": "abc",
        });
        let record = build_record(payload.as_object().unwrap(), &mut counter);
        assert_eq!(record["number"], "INC0000001");
        assert_eq!(record["state"], 1);
        assert_eq!(record["priority"], 2);
        assert_eq!(record["control_id"], "LA.01");
        assert_eq!(record["evidence_id"], "abc");
        assert_eq!(record["category"], "software");
    }
}
