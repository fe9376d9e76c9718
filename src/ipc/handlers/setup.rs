use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::recurrence::SessionType;
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use tracing::warn;

/// Longest inclusive date range a recurring setup may span unless the
/// workspace overrides it.
pub const DEFAULT_MAX_RANGE_DAYS: i64 = 366;

#[derive(Clone, Copy)]
enum SetupSection {
    Sessions,
    Attendance,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "sessions" => Some(Self::Sessions),
            "attendance" => Some(Self::Attendance),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Sessions => "setup.sessions",
            Self::Attendance => "setup.attendance",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Sessions => json!({
            "maxRangeDays": DEFAULT_MAX_RANGE_DAYS,
            "defaultSessionType": "Lecture"
        }),
        SetupSection::Attendance => json!({
            "countLateAsPresent": true,
            "lowAttendanceThresholdPercent": 75
        }),
    }
}

#[derive(Clone, Debug)]
pub struct SessionSetupDefaults {
    pub max_range_days: i64,
    pub default_session_type: SessionType,
}

#[derive(Clone, Debug)]
pub struct AttendanceSetupDefaults {
    pub count_late_as_present: bool,
    pub low_attendance_threshold_percent: f64,
}

pub fn load_session_defaults(conn: &Connection) -> anyhow::Result<SessionSetupDefaults> {
    let obj = load_section(conn, SetupSection::Sessions)?;
    Ok(SessionSetupDefaults {
        max_range_days: obj
            .get("maxRangeDays")
            .and_then(|v| v.as_i64())
            .unwrap_or(DEFAULT_MAX_RANGE_DAYS),
        default_session_type: obj
            .get("defaultSessionType")
            .and_then(|v| v.as_str())
            .and_then(SessionType::parse)
            .unwrap_or(SessionType::Lecture),
    })
}

pub fn load_attendance_defaults(conn: &Connection) -> anyhow::Result<AttendanceSetupDefaults> {
    let obj = load_section(conn, SetupSection::Attendance)?;
    Ok(AttendanceSetupDefaults {
        count_late_as_present: obj
            .get("countLateAsPresent")
            .and_then(|v| v.as_bool())
            .unwrap_or(true),
        low_attendance_threshold_percent: obj
            .get("lowAttendanceThresholdPercent")
            .and_then(|v| v.as_f64())
            .unwrap_or(75.0),
    })
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Sessions => match k.as_str() {
                "maxRangeDays" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 1000)?));
                }
                "defaultSessionType" => {
                    let s = v
                        .as_str()
                        .ok_or_else(|| format!("{} must be string", k))?
                        .trim();
                    let Some(t) = SessionType::parse(s) else {
                        return Err(
                            "defaultSessionType must be one of: Lecture, Lab, Tutorial, Extras"
                                .into(),
                        );
                    };
                    obj.insert(k.clone(), Value::String(t.as_str().to_string()));
                }
                _ => return Err(format!("unknown sessions field: {}", k)),
            },
            SetupSection::Attendance => match k.as_str() {
                "countLateAsPresent" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "lowAttendanceThresholdPercent" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 100)?));
                }
                _ => return Err(format!("unknown attendance field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // One bad stored key must not discard the others.
            for (k, v) in saved_obj {
                let mut single = Map::new();
                single.insert(k.clone(), v.clone());
                if let Err(msg) = merge_section_patch(section, &mut current, &single) {
                    warn!(section = section.key(), key = %k, error = %msg, "ignoring stored setup value");
                }
            }
        } else {
            warn!(section = section.key(), "stored setup section is not an object; using defaults");
        }
    }
    Ok(current)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let sessions = match load_section(conn, SetupSection::Sessions) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let attendance = match load_section(conn, SetupSection::Attendance) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "sessions": sessions,
            "attendance": attendance
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_validates_and_canonicalizes() {
        let mut current = default_section(SetupSection::Sessions);
        let patch = json!({ "maxRangeDays": 120, "defaultSessionType": " Lab " });
        merge_section_patch(
            SetupSection::Sessions,
            &mut current,
            patch.as_object().expect("object"),
        )
        .expect("merge");
        assert_eq!(current["maxRangeDays"], 120);
        assert_eq!(current["defaultSessionType"], "Lab");

        let bad = json!({ "maxRangeDays": 0 });
        assert!(merge_section_patch(
            SetupSection::Sessions,
            &mut current,
            bad.as_object().expect("object"),
        )
        .is_err());

        let unknown = json!({ "presentCode": "P" });
        let e = merge_section_patch(
            SetupSection::Attendance,
            &mut default_section(SetupSection::Attendance),
            unknown.as_object().expect("object"),
        )
        .unwrap_err();
        assert!(e.contains("unknown attendance field"));
    }

    #[test]
    fn stored_section_keeps_valid_keys_next_to_bad_ones() {
        let workspace = std::env::temp_dir().join(format!(
            "timetabled-setup-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        let conn = db::open_db(&workspace).expect("open");
        db::settings_set_json(
            &conn,
            SetupSection::Sessions.key(),
            &json!({
                "aaaRetired": 1,
                "defaultSessionType": "Tutorial",
                "maxRangeDays": 30,
                "zzzRetired": true
            }),
        )
        .expect("set");
        let defaults = load_session_defaults(&conn).expect("defaults");
        assert_eq!(defaults.max_range_days, 30);
        assert_eq!(defaults.default_session_type, SessionType::Tutorial);

        db::settings_set_json(
            &conn,
            SetupSection::Attendance.key(),
            &json!({ "countLateAsPresent": "yes", "lowAttendanceThresholdPercent": 60 }),
        )
        .expect("set");
        let defaults = load_attendance_defaults(&conn).expect("defaults");
        assert!(defaults.count_late_as_present);
        assert_eq!(defaults.low_attendance_threshold_percent, 60.0);
    }
}
