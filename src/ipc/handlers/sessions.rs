use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{db_conn, now_ts, optional_date, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::recurrence::{SessionStatus, DATE_FORMAT};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension, Row};
use serde_json::{json, Value as JsonValue};
use tracing::info;

pub(crate) const SESSION_COLUMNS: &str = "id, recurring_setup_id, group_id, subject_id, teacher_id,
    session_type, date, start_time, end_time, status, reason";

pub(crate) fn session_row_json(row: &Row<'_>) -> rusqlite::Result<JsonValue> {
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "recurringSetupId": row.get::<_, String>(1)?,
        "groupId": row.get::<_, String>(2)?,
        "subjectId": row.get::<_, String>(3)?,
        "teacherId": row.get::<_, String>(4)?,
        "sessionType": row.get::<_, String>(5)?,
        "date": row.get::<_, String>(6)?,
        "startTime": row.get::<_, String>(7)?,
        "endTime": row.get::<_, Option<String>>(8)?,
        "status": row.get::<_, String>(9)?,
        "reason": row.get::<_, Option<String>>(10)?,
    }))
}

pub(crate) fn load_session(conn: &Connection, session_id: &str) -> Result<JsonValue, HandlerErr> {
    let sql = format!("SELECT {} FROM class_sessions WHERE id = ?", SESSION_COLUMNS);
    conn.query_row(&sql, [session_id], session_row_json)
        .optional()?
        .ok_or_else(|| HandlerErr::new("not_found", "session not found"))
}

fn parse_status(raw: &str) -> Result<SessionStatus, HandlerErr> {
    SessionStatus::parse(raw).ok_or_else(|| {
        HandlerErr::bad_params(
            "status must be one of: Scheduled, Completed, Cancelled, Rescheduled",
        )
    })
}

fn sessions_list(conn: &Connection, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();

    for (key, clause) in [
        ("recurringSetupId", "recurring_setup_id = ?"),
        ("groupId", "group_id = ?"),
        ("teacherId", "teacher_id = ?"),
    ] {
        if let Some(v) = optional_str(params, key)? {
            clauses.push(clause);
            binds.push(Value::Text(v));
        }
    }
    if let Some(from) = optional_date(params, "from")? {
        clauses.push("date >= ?");
        binds.push(Value::Text(from.format(DATE_FORMAT).to_string()));
    }
    if let Some(to) = optional_date(params, "to")? {
        clauses.push("date <= ?");
        binds.push(Value::Text(to.format(DATE_FORMAT).to_string()));
    }
    if let Some(raw) = optional_str(params, "status")? {
        let status = parse_status(&raw)?;
        clauses.push("status = ?");
        binds.push(Value::Text(status.as_str().to_string()));
    }

    let mut sql = format!("SELECT {} FROM class_sessions", SESSION_COLUMNS);
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY date, start_time, group_id");

    let mut stmt = conn.prepare(&sql)?;
    let sessions = stmt
        .query_map(params_from_iter(binds), session_row_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "sessions": sessions }))
}

fn sessions_set_status(conn: &Connection, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let session_id = required_str(params, "sessionId")?;
    let status = parse_status(&required_str(params, "status")?)?;
    let reason = match status {
        SessionStatus::Scheduled => None,
        _ => optional_str(params, "reason")?,
    };

    let changed = conn
        .execute(
            "UPDATE class_sessions SET status = ?, reason = ?, updated_at = ? WHERE id = ?",
            (status.as_str(), &reason, now_ts(), &session_id),
        )
        .map_err(|e| {
            HandlerErr::new("db_update_failed", e.to_string())
                .with_details(json!({ "table": "class_sessions" }))
        })?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "session not found"));
    }
    info!(session_id = %session_id, status = status.as_str(), "session status changed");

    let session = load_session(conn, &session_id)?;
    Ok(json!({ "session": session }))
}

fn handle_sessions_list(state: &mut AppState, req: &Request) -> JsonValue {
    match db_conn(state).and_then(|conn| sessions_list(conn, &req.params)) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_sessions_set_status(state: &mut AppState, req: &Request) -> JsonValue {
    match db_conn(state).and_then(|conn| sessions_set_status(conn, &req.params)) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    match req.method.as_str() {
        "sessions.list" => Some(handle_sessions_list(state, req)),
        "sessions.setStatus" => Some(handle_sessions_set_status(state, req)),
        _ => None,
    }
}
