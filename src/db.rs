use crate::recurrence::{ClassSessionOccurrence, SessionSink, DATE_FORMAT};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "timetable.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS recurring_setups(
            id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            session_type TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            weekdays TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_recurring_setups_group ON recurring_setups(group_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_sessions(
            id TEXT PRIMARY KEY,
            recurring_setup_id TEXT NOT NULL,
            group_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            session_type TEXT NOT NULL,
            date TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT,
            status TEXT NOT NULL,
            reason TEXT,
            updated_at TEXT,
            FOREIGN KEY(recurring_setup_id) REFERENCES recurring_setups(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_sessions_setup ON class_sessions(recurring_setup_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_sessions_group_date ON class_sessions(group_id, date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_sessions_teacher_date ON class_sessions(teacher_id, date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS session_attendance(
            session_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            status TEXT NOT NULL,
            marked_at TEXT NOT NULL,
            PRIMARY KEY(session_id, student_id),
            FOREIGN KEY(session_id) REFERENCES class_sessions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_session_attendance_student ON session_attendance(student_id)",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let raw = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, raw),
    )?;
    Ok(())
}

/// Writes generated sessions through `conn`. The caller owns the enclosing
/// transaction; a failed batch is discarded when that transaction is dropped.
pub struct SqliteSessionSink<'a> {
    conn: &'a Connection,
    updated_at: String,
}

impl<'a> SqliteSessionSink<'a> {
    pub fn new(conn: &'a Connection, updated_at: impl Into<String>) -> Self {
        Self {
            conn,
            updated_at: updated_at.into(),
        }
    }
}

impl SessionSink for SqliteSessionSink<'_> {
    fn insert_batch(&mut self, sessions: &[ClassSessionOccurrence]) -> anyhow::Result<()> {
        let mut stmt = self.conn.prepare(
            "INSERT INTO class_sessions(
                id, recurring_setup_id, group_id, subject_id, teacher_id, session_type,
                date, start_time, end_time, status, reason, updated_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for s in sessions {
            stmt.execute(rusqlite::params![
                s.id,
                s.recurring_setup_id,
                s.group_id,
                s.subject_id,
                s.teacher_id,
                s.session_type.as_str(),
                s.date.format(DATE_FORMAT).to_string(),
                s.start_time,
                s.end_time,
                s.status.as_str(),
                s.reason,
                self.updated_at,
            ])?;
        }
        Ok(())
    }
}
