use crate::ipc::error::HandlerErr;
use crate::ipc::types::AppState;
use crate::recurrence::{self, RecurrenceError};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::Value as JsonValue;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn db_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn now_ts() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

pub fn required_str(params: &JsonValue, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_str(params: &JsonValue, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let s = v
                .as_str()
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be string or null", key)))?
                .trim()
                .to_string();
            if s.is_empty() {
                Ok(None)
            } else {
                Ok(Some(s))
            }
        }
    }
}

pub fn required_date(params: &JsonValue, key: &str) -> Result<NaiveDate, HandlerErr> {
    let raw = required_str(params, key)?;
    recurrence::parse_date(&raw).map_err(|e| date_err(key, e))
}

pub fn optional_date(params: &JsonValue, key: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    match optional_str(params, key)? {
        Some(raw) => recurrence::parse_date(&raw)
            .map(Some)
            .map_err(|e| date_err(key, e)),
        None => Ok(None),
    }
}

fn date_err(key: &str, e: RecurrenceError) -> HandlerErr {
    HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key))
        .with_details(serde_json::json!({ "field": key, "error": e.to_string() }))
}
