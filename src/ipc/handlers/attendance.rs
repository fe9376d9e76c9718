use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::handlers::sessions::load_session;
use crate::ipc::handlers::setup::load_attendance_defaults;
use crate::ipc::helpers::{db_conn, now_ts, optional_date, required_str};
use crate::ipc::types::{AppState, Request};
use crate::recurrence::{SessionStatus, DATE_FORMAT};
use rusqlite::{params_from_iter, types::Value, Connection};
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "Present" => Some(Self::Present),
            "Absent" => Some(Self::Absent),
            "Late" => Some(Self::Late),
            "Excused" => Some(Self::Excused),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Present => "Present",
            Self::Absent => "Absent",
            Self::Late => "Late",
            Self::Excused => "Excused",
        }
    }
}

#[derive(Default, Debug, Clone, PartialEq)]
struct StudentTally {
    present: i64,
    absent: i64,
    late: i64,
    excused: i64,
}

impl StudentTally {
    fn add(&mut self, status: AttendanceStatus, n: i64) {
        match status {
            AttendanceStatus::Present => self.present += n,
            AttendanceStatus::Absent => self.absent += n,
            AttendanceStatus::Late => self.late += n,
            AttendanceStatus::Excused => self.excused += n,
        }
    }

    fn total(&self) -> i64 {
        self.present + self.absent + self.late + self.excused
    }

    /// Attended share of all marked sessions, one decimal place.
    fn percent(&self, count_late_as_present: bool) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let attended = if count_late_as_present {
            self.present + self.late
        } else {
            self.present
        };
        (attended as f64 * 1000.0 / total as f64).round() / 10.0
    }
}

fn parse_records(params: &JsonValue) -> Result<Vec<(String, AttendanceStatus)>, HandlerErr> {
    let Some(arr) = params.get("records").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing records"));
    };
    let mut out: Vec<(String, AttendanceStatus)> = Vec::with_capacity(arr.len());
    for (i, item) in arr.iter().enumerate() {
        let student_id = item
            .get("studentId")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                HandlerErr::bad_params("records[].studentId is required")
                    .with_details(json!({ "index": i }))
            })?;
        let status = item
            .get("status")
            .and_then(|v| v.as_str())
            .and_then(AttendanceStatus::parse)
            .ok_or_else(|| {
                HandlerErr::bad_params(
                    "records[].status must be one of: Present, Absent, Late, Excused",
                )
                .with_details(json!({ "index": i }))
            })?;
        // Last entry for a student wins.
        if let Some(existing) = out.iter_mut().find(|(sid, _)| *sid == student_id) {
            existing.1 = status;
        } else {
            out.push((student_id, status));
        }
    }
    Ok(out)
}

fn session_records(conn: &Connection, session_id: &str) -> Result<Vec<JsonValue>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT student_id, status, marked_at
         FROM session_attendance
         WHERE session_id = ?
         ORDER BY student_id",
    )?;
    let rows = stmt
        .query_map([session_id], |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "status": r.get::<_, String>(1)?,
                "markedAt": r.get::<_, String>(2)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn attendance_mark(conn: &Connection, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let session_id = required_str(params, "sessionId")?;
    let records = parse_records(params)?;

    let session = load_session(conn, &session_id)?;
    if session.get("status").and_then(|v| v.as_str()) == Some(SessionStatus::Cancelled.as_str()) {
        return Err(HandlerErr::new(
            "session_cancelled",
            "attendance cannot be recorded for a cancelled session",
        ));
    }

    let marked_at = now_ts();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (student_id, status) in &records {
        tx.execute(
            "INSERT INTO session_attendance(session_id, student_id, status, marked_at)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(session_id, student_id) DO UPDATE SET
               status = excluded.status,
               marked_at = excluded.marked_at",
            (&session_id, student_id, status.as_str(), &marked_at),
        )
        .map_err(|e| {
            HandlerErr::new("db_update_failed", e.to_string())
                .with_details(json!({ "table": "session_attendance" }))
        })?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "updated": records.len() }))
}

fn attendance_session_open(conn: &Connection, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let session_id = required_str(params, "sessionId")?;
    let session = load_session(conn, &session_id)?;
    let records = session_records(conn, &session_id)?;
    Ok(json!({ "session": session, "records": records }))
}

fn attendance_summary(conn: &Connection, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let group_id = required_str(params, "groupId")?;
    let from = optional_date(params, "from")?;
    let to = optional_date(params, "to")?;
    let defaults = load_attendance_defaults(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let mut sql = String::from(
        "SELECT a.student_id, a.status, COUNT(*)
         FROM session_attendance a
         JOIN class_sessions s ON s.id = a.session_id
         WHERE s.group_id = ? AND s.status <> ?",
    );
    let mut binds: Vec<Value> = vec![
        Value::Text(group_id.clone()),
        Value::Text(SessionStatus::Cancelled.as_str().to_string()),
    ];
    if let Some(from) = from {
        sql.push_str(" AND s.date >= ?");
        binds.push(Value::Text(from.format(DATE_FORMAT).to_string()));
    }
    if let Some(to) = to {
        sql.push_str(" AND s.date <= ?");
        binds.push(Value::Text(to.format(DATE_FORMAT).to_string()));
    }
    sql.push_str(" GROUP BY a.student_id, a.status");

    let mut stmt = conn.prepare(&sql)?;
    let counts = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut tallies: BTreeMap<String, StudentTally> = BTreeMap::new();
    for (student_id, status, n) in counts {
        let Some(status) = AttendanceStatus::parse(&status) else {
            continue;
        };
        tallies.entry(student_id).or_default().add(status, n);
    }

    let students: Vec<JsonValue> = tallies
        .iter()
        .map(|(student_id, t)| {
            let percent = t.percent(defaults.count_late_as_present);
            json!({
                "studentId": student_id,
                "present": t.present,
                "absent": t.absent,
                "late": t.late,
                "excused": t.excused,
                "total": t.total(),
                "attendancePercent": percent,
                "lowAttendance": percent < defaults.low_attendance_threshold_percent,
            })
        })
        .collect();

    Ok(json!({
        "groupId": group_id,
        "from": from.map(|d| d.format(DATE_FORMAT).to_string()),
        "to": to.map(|d| d.format(DATE_FORMAT).to_string()),
        "students": students,
    }))
}

fn handle_attendance_mark(state: &mut AppState, req: &Request) -> JsonValue {
    match db_conn(state).and_then(|conn| attendance_mark(conn, &req.params)) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_attendance_session_open(state: &mut AppState, req: &Request) -> JsonValue {
    match db_conn(state).and_then(|conn| attendance_session_open(conn, &req.params)) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_attendance_summary(state: &mut AppState, req: &Request) -> JsonValue {
    match db_conn(state).and_then(|conn| attendance_summary(conn, &req.params)) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    match req.method.as_str() {
        "attendance.mark" => Some(handle_attendance_mark(state, req)),
        "attendance.sessionOpen" => Some(handle_attendance_session_open(state, req)),
        "attendance.summary" => Some(handle_attendance_summary(state, req)),
        _ => None,
    }
}
