mod test_support;

use serde_json::json;
use test_support::{error_code, request, request_ok, select_workspace, spawn_sidecar};

fn base_params() -> serde_json::Value {
    json!({
        "groupId": "grp-10a",
        "subjectId": "sub-physics",
        "teacherId": "tch-ng",
        "sessionType": "Lecture",
        "startDate": "2024-01-01",
        "endDate": "2024-01-07",
        "weekdays": [0, 1, 2, 3, 4, 5, 6],
        "startTime": "09:00",
        "endTime": "10:30"
    })
}

#[test]
fn full_week_creates_weekday_sessions_only() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = select_workspace(&mut stdin, &mut reader, "timetabled-create-week");

    let created = request_ok(&mut stdin, &mut reader, "1", "recurring.create", base_params());
    let setup_id = created
        .get("recurringSetupId")
        .and_then(|v| v.as_str())
        .expect("recurringSetupId")
        .to_string();
    assert_eq!(created.get("sessionCount").and_then(|v| v.as_u64()), Some(5));

    let sessions = created
        .get("sessions")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    let dates: Vec<&str> = sessions
        .iter()
        .filter_map(|s| s.get("date").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(
        dates,
        vec!["2024-01-01", "2024-01-02", "2024-01-03", "2024-01-04", "2024-01-05"]
    );
    for s in &sessions {
        assert_eq!(s["recurringSetupId"], setup_id.as_str());
        assert_eq!(s["status"], "Scheduled");
        assert!(s["reason"].is_null());
        assert_eq!(s["startTime"], "09:00:00");
        assert_eq!(s["endTime"], "10:30:00");
        assert_eq!(s["groupId"], "grp-10a");
        assert_eq!(s["sessionType"], "Lecture");
    }

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "sessions.list",
        json!({ "recurringSetupId": setup_id }),
    );
    let stored = listed
        .get("sessions")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(stored.len(), 5);
    assert_eq!(stored[0]["date"], "2024-01-01");
    assert_eq!(stored[4]["date"], "2024-01-05");
    assert_eq!(stored[2]["endTime"], "10:30:00");

    let got = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "recurring.get",
        json!({ "recurringSetupId": setup_id }),
    );
    let setup = got.get("recurringSetup").cloned().unwrap_or_default();
    assert_eq!(setup["sessionCount"], 5);
    assert_eq!(setup["weekdays"], json!([0, 1, 2, 3, 4, 5, 6]));
    assert_eq!(setup["startTime"], "09:00:00");
}

#[test]
fn ranges_without_qualifying_days_store_setup_but_no_sessions() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = select_workspace(&mut stdin, &mut reader, "timetabled-create-empty");

    let mut empty = base_params();
    empty["weekdays"] = json!([]);
    let r1 = request_ok(&mut stdin, &mut reader, "1", "recurring.create", empty);
    assert_eq!(r1["sessionCount"], 0);

    let mut weekend = base_params();
    weekend["weekdays"] = json!([6, 0]);
    weekend["endDate"] = json!("2024-03-31");
    let r2 = request_ok(&mut stdin, &mut reader, "2", "recurring.create", weekend);
    assert_eq!(r2["sessionCount"], 0);

    let mut reversed = base_params();
    reversed["startDate"] = json!("2024-01-07");
    reversed["endDate"] = json!("2024-01-01");
    let r3 = request_ok(&mut stdin, &mut reader, "3", "recurring.create", reversed);
    assert_eq!(r3["sessionCount"], 0);

    let listed = request_ok(&mut stdin, &mut reader, "4", "sessions.list", json!({}));
    assert_eq!(listed["sessions"].as_array().map(|a| a.len()), Some(0));

    let setups = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "recurring.list",
        json!({ "groupId": "grp-10a" }),
    );
    let setups = setups["recurringSetups"].as_array().cloned().unwrap_or_default();
    assert_eq!(setups.len(), 3);
    assert!(setups.iter().all(|s| s["sessionCount"] == 0));
}

#[test]
fn single_day_range_creates_one_session() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = select_workspace(&mut stdin, &mut reader, "timetabled-create-single");

    let mut params = base_params();
    params["startDate"] = json!("2024-01-03");
    params["endDate"] = json!("2024-01-03");
    params["weekdays"] = json!([3]);
    params["startTime"] = json!("14:15:30");
    params["endTime"] = serde_json::Value::Null;
    let created = request_ok(&mut stdin, &mut reader, "1", "recurring.create", params);
    assert_eq!(created["sessionCount"], 1);
    let s = &created["sessions"][0];
    assert_eq!(s["date"], "2024-01-03");
    assert_eq!(s["startTime"], "14:15:30");
    assert!(s["endTime"].is_null());
}

#[test]
fn create_rejects_malformed_descriptors() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let no_ws = request(&mut stdin, &mut reader, "0", "recurring.create", base_params());
    assert_eq!(error_code(&no_ws), Some("no_workspace"));

    let _ = select_workspace(&mut stdin, &mut reader, "timetabled-create-invalid");

    let cases: Vec<(&str, serde_json::Value)> = vec![
        ("weekdays", json!([1, 7])),
        ("weekdays", json!(["mon"])),
        ("sessionType", json!("Seminar")),
        ("startTime", json!("9am")),
        ("endTime", json!("25:00")),
        ("startDate", json!("2024-02-30")),
        ("groupId", json!("")),
    ];
    for (i, (key, value)) in cases.into_iter().enumerate() {
        let mut params = base_params();
        params[key] = value;
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("bad-{}", i),
            "recurring.create",
            params,
        );
        assert_eq!(error_code(&resp), Some("bad_params"), "case {}: {}", key, resp);
    }

    let listed = request_ok(&mut stdin, &mut reader, "1", "recurring.list", json!({}));
    assert_eq!(listed["recurringSetups"].as_array().map(|a| a.len()), Some(0));
}

#[test]
fn session_settings_cap_range_and_default_type() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = select_workspace(&mut stdin, &mut reader, "timetabled-create-settings");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "setup.update",
        json!({ "section": "sessions", "patch": { "maxRangeDays": 7, "defaultSessionType": "Lab" } }),
    );

    let mut too_long = base_params();
    too_long["endDate"] = json!("2024-01-08");
    let resp = request(&mut stdin, &mut reader, "2", "recurring.create", too_long);
    assert_eq!(error_code(&resp), Some("bad_params"));
    assert_eq!(resp["error"]["details"]["rangeDays"], 8);

    let mut untyped = base_params();
    untyped
        .as_object_mut()
        .expect("object")
        .remove("sessionType");
    let created = request_ok(&mut stdin, &mut reader, "3", "recurring.create", untyped);
    assert_eq!(created["sessionCount"], 5);
    assert_eq!(created["sessions"][0]["sessionType"], "Lab");
}
