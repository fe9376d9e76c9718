use crate::db::SqliteSessionSink;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::handlers::setup::{load_session_defaults, DEFAULT_MAX_RANGE_DAYS};
use crate::ipc::helpers::{db_conn, now_ts, optional_str, required_date, required_str};
use crate::ipc::types::{AppState, Request};
use crate::recurrence::{
    self, RecurrenceDescriptor, RecurrenceError, SessionType, WeekdaySet, DATE_FORMAT,
};
use chrono::NaiveDate;
use rusqlite::{types::Type, Connection, OptionalExtension, Row};
use serde_json::{json, Value as JsonValue};
use tracing::info;
use uuid::Uuid;

fn parse_weekdays(params: &JsonValue) -> Result<WeekdaySet, HandlerErr> {
    let Some(arr) = params.get("weekdays").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing weekdays"));
    };
    let mut indices = Vec::with_capacity(arr.len());
    for v in arr {
        let Some(n) = v.as_i64() else {
            return Err(HandlerErr::bad_params("weekdays must be an array of integers"));
        };
        indices.push(n);
    }
    WeekdaySet::from_indices(indices).map_err(|bad| {
        HandlerErr::bad_params("weekdays must be integers in 0..=6")
            .with_details(json!({ "value": bad }))
    })
}

fn parse_time(params: &JsonValue, key: &str, required: bool) -> Result<Option<String>, HandlerErr> {
    let raw = if required {
        Some(required_str(params, key)?)
    } else {
        optional_str(params, key)?
    };
    match raw {
        Some(t) if recurrence::validate_time(&t) => Ok(Some(t)),
        Some(_) => Err(HandlerErr::bad_params(format!(
            "{} must be HH:MM or HH:MM:SS",
            key
        ))),
        None => Ok(None),
    }
}

fn parse_session_type(
    params: &JsonValue,
    default: SessionType,
) -> Result<SessionType, HandlerErr> {
    match optional_str(params, "sessionType")? {
        None => Ok(default),
        Some(raw) => SessionType::parse(&raw).ok_or_else(|| {
            HandlerErr::bad_params("sessionType must be one of: Lecture, Lab, Tutorial, Extras")
        }),
    }
}

fn check_range(start: NaiveDate, end: NaiveDate, max_range_days: i64) -> Result<(), HandlerErr> {
    let span_days = recurrence::range_days(start, end);
    if span_days > max_range_days {
        return Err(
            HandlerErr::bad_params("date range exceeds maxRangeDays").with_details(json!({
                "rangeDays": span_days,
                "maxRangeDays": max_range_days
            })),
        );
    }
    Ok(())
}

/// Narrows a create request into a descriptor. Everything the expander
/// relies on is checked here.
fn parse_descriptor(
    conn: &Connection,
    params: &JsonValue,
    recurring_setup_id: String,
) -> Result<RecurrenceDescriptor, HandlerErr> {
    let defaults = load_session_defaults(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let group_id = required_str(params, "groupId")?;
    let subject_id = required_str(params, "subjectId")?;
    let teacher_id = required_str(params, "teacherId")?;
    let session_type = parse_session_type(params, defaults.default_session_type)?;
    let start_date = required_date(params, "startDate")?;
    let end_date = required_date(params, "endDate")?;
    let weekdays = parse_weekdays(params)?;
    let start_time = parse_time(params, "startTime", true)?
        .ok_or_else(|| HandlerErr::bad_params("missing startTime"))?;
    let end_time = parse_time(params, "endTime", false)?;

    check_range(start_date, end_date, defaults.max_range_days)?;

    Ok(RecurrenceDescriptor {
        recurring_setup_id,
        group_id,
        subject_id,
        teacher_id,
        session_type,
        start_date,
        end_date,
        weekdays,
        start_time,
        end_time,
    })
}

fn recurring_preview(params: &JsonValue, max_range_days: i64) -> Result<JsonValue, HandlerErr> {
    let start = required_date(params, "startDate")?;
    let end = required_date(params, "endDate")?;
    let weekdays = parse_weekdays(params)?;
    check_range(start, end, max_range_days)?;
    let dates = recurrence::expand_date_strings(
        &start.format(DATE_FORMAT).to_string(),
        &end.format(DATE_FORMAT).to_string(),
        weekdays,
    )
    .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    Ok(json!({ "count": dates.len(), "dates": dates }))
}

/// Preview honours the workspace cap when one is open.
fn preview_range_cap(state: &AppState) -> Result<i64, HandlerErr> {
    match state.db.as_ref() {
        Some(conn) => load_session_defaults(conn)
            .map(|d| d.max_range_days)
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string())),
        None => Ok(DEFAULT_MAX_RANGE_DAYS),
    }
}

fn recurring_create(conn: &Connection, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let recurring_setup_id = Uuid::new_v4().to_string();
    let descriptor = parse_descriptor(conn, params, recurring_setup_id.clone())?;
    let created_at = now_ts();
    let weekdays_json = serde_json::to_string(&descriptor.weekdays.indices())
        .map_err(|e| HandlerErr::new("internal", e.to_string()))?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "INSERT INTO recurring_setups(
            id, group_id, subject_id, teacher_id, session_type,
            start_date, end_date, weekdays, start_time, end_time, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            descriptor.recurring_setup_id,
            descriptor.group_id,
            descriptor.subject_id,
            descriptor.teacher_id,
            descriptor.session_type.as_str(),
            descriptor.start_date.format(DATE_FORMAT).to_string(),
            descriptor.end_date.format(DATE_FORMAT).to_string(),
            weekdays_json,
            recurrence::normalize_time(&descriptor.start_time),
            descriptor.end_time.as_deref().map(recurrence::normalize_time),
            created_at,
        ],
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string())
            .with_details(json!({ "table": "recurring_setups" }))
    })?;

    let mut sink = SqliteSessionSink::new(&tx, created_at.clone());
    let sessions = recurrence::materialize(&descriptor, &mut sink).map_err(|e| match e {
        RecurrenceError::Parse { .. } => HandlerErr::bad_params(e.to_string()),
        RecurrenceError::Persistence(_) => HandlerErr::new("db_insert_failed", e.to_string())
            .with_details(json!({ "table": "class_sessions" })),
    })?;

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    info!(
        recurring_setup_id = %recurring_setup_id,
        sessions = sessions.len(),
        "recurring setup created"
    );
    Ok(json!({
        "recurringSetupId": recurring_setup_id,
        "sessionCount": sessions.len(),
        "sessions": sessions,
    }))
}

const SETUP_COLUMNS: &str = "r.id, r.group_id, r.subject_id, r.teacher_id, r.session_type,
    r.start_date, r.end_date, r.weekdays, r.start_time, r.end_time, r.created_at,
    (SELECT COUNT(*) FROM class_sessions cs WHERE cs.recurring_setup_id = r.id) AS session_count";

fn setup_row_json(row: &Row<'_>) -> rusqlite::Result<JsonValue> {
    let weekdays_raw: String = row.get(7)?;
    let weekdays: Vec<u8> = serde_json::from_str(&weekdays_raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "groupId": row.get::<_, String>(1)?,
        "subjectId": row.get::<_, String>(2)?,
        "teacherId": row.get::<_, String>(3)?,
        "sessionType": row.get::<_, String>(4)?,
        "startDate": row.get::<_, String>(5)?,
        "endDate": row.get::<_, String>(6)?,
        "weekdays": weekdays,
        "startTime": row.get::<_, String>(8)?,
        "endTime": row.get::<_, Option<String>>(9)?,
        "createdAt": row.get::<_, String>(10)?,
        "sessionCount": row.get::<_, i64>(11)?,
    }))
}

fn recurring_list(conn: &Connection, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let group_id = optional_str(params, "groupId")?;
    let setups = match group_id {
        Some(gid) => {
            let sql = format!(
                "SELECT {} FROM recurring_setups r WHERE r.group_id = ? ORDER BY r.start_date, r.start_time",
                SETUP_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([gid], setup_row_json)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let sql = format!(
                "SELECT {} FROM recurring_setups r ORDER BY r.start_date, r.start_time",
                SETUP_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], setup_row_json)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(json!({ "recurringSetups": setups }))
}

fn recurring_get(conn: &Connection, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let id = required_str(params, "recurringSetupId")?;
    let sql = format!("SELECT {} FROM recurring_setups r WHERE r.id = ?", SETUP_COLUMNS);
    let setup = conn
        .query_row(&sql, [&id], setup_row_json)
        .optional()?
        .ok_or_else(|| HandlerErr::new("not_found", "recurring setup not found"))?;
    Ok(json!({ "recurringSetup": setup }))
}

fn respond(req: &Request, result: Result<JsonValue, HandlerErr>) -> JsonValue {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_recurring_preview(state: &mut AppState, req: &Request) -> JsonValue {
    respond(
        req,
        preview_range_cap(state).and_then(|cap| recurring_preview(&req.params, cap)),
    )
}

fn handle_recurring_create(state: &mut AppState, req: &Request) -> JsonValue {
    respond(
        req,
        db_conn(state).and_then(|conn| recurring_create(conn, &req.params)),
    )
}

fn handle_recurring_list(state: &mut AppState, req: &Request) -> JsonValue {
    respond(
        req,
        db_conn(state).and_then(|conn| recurring_list(conn, &req.params)),
    )
}

fn handle_recurring_get(state: &mut AppState, req: &Request) -> JsonValue {
    respond(
        req,
        db_conn(state).and_then(|conn| recurring_get(conn, &req.params)),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    match req.method.as_str() {
        "recurring.preview" => Some(handle_recurring_preview(state, req)),
        "recurring.create" => Some(handle_recurring_create(state, req)),
        "recurring.list" => Some(handle_recurring_list(state, req)),
        "recurring.get" => Some(handle_recurring_get(state, req)),
        _ => None,
    }
}
