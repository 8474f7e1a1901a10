mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, seed_classroom, spawn_sidecar, temp_dir};

#[test]
fn setup_defaults_and_updates() {
    let workspace = temp_dir("rollcalld-setup");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let all = request_ok(&mut stdin, &mut reader, "2", "setup.get", json!({}));
    assert_eq!(
        all.get("school"),
        Some(&json!({ "schoolName": "", "rotationStartDate": null, "rotationWeeks": 4 }))
    );
    assert_eq!(
        all.get("attendance"),
        Some(&json!({ "notifyGuardians": false, "scanLogCapacity": 10 }))
    );

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({
            "section": "school",
            "patch": { "schoolName": "  Hillside Primary ", "rotationStartDate": "2026-09-07", "rotationWeeks": 2 }
        }),
    );
    assert_eq!(
        updated.pointer("/school/schoolName").and_then(|v| v.as_str()),
        Some("Hillside Primary")
    );

    let school = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "setup.get",
        json!({ "section": "school" }),
    );
    assert!(school.get("attendance").is_none());
    assert_eq!(
        school.pointer("/school/rotationStartDate").and_then(|v| v.as_str()),
        Some("2026-09-07")
    );
    assert_eq!(
        school.pointer("/school/rotationWeeks").and_then(|v| v.as_i64()),
        Some(2)
    );

    // A rejected patch leaves the stored section as it was.
    let bad = [
        ("school", json!({ "motto": "Learn" })),
        ("school", json!({ "rotationWeeks": 5 })),
        ("school", json!({ "rotationStartDate": "07/09/2026" })),
        ("attendance", json!({ "notifyGuardians": "yes" })),
        ("attendance", json!({ "scanLogCapacity": 20 })),
        ("grading", json!({})),
    ];
    for (i, (section, patch)) in bad.iter().enumerate() {
        let e = request_err(
            &mut stdin,
            &mut reader,
            &format!("bad-{}", i),
            "setup.update",
            json!({ "section": section, "patch": patch }),
        );
        assert_eq!(
            e.get("code").and_then(|v| v.as_str()),
            Some("bad_params"),
            "{} {}",
            section,
            patch
        );
    }
    let school = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "setup.get",
        json!({ "section": "school" }),
    );
    assert_eq!(
        school.pointer("/school/rotationWeeks").and_then(|v| v.as_i64()),
        Some(2)
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "setup.update",
        json!({ "section": "attendance", "patch": { "notifyGuardians": true, "scanLogCapacity": 10 } }),
    );
    let attendance = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "setup.get",
        json!({ "section": "attendance" }),
    );
    assert_eq!(
        attendance.pointer("/attendance/notifyGuardians").and_then(|v| v.as_bool()),
        Some(true)
    );

    let e = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "setup.get",
        json!({ "section": "grading" }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("bad_params"));
}

#[test]
fn rotation_weeks_bound_schedule_week_numbers() {
    let workspace = temp_dir("rollcalld-setup-rotation");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let room = seed_classroom(&mut stdin, &mut reader);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({ "section": "school", "patch": { "rotationWeeks": 2 } }),
    );

    let slot = |day: &str, week: i64| {
        json!({
            "classId": room.class_id, "teacherId": room.teacher_id, "roomId": room.room_id,
            "periodId": room.period_id, "dayOfWeek": day, "weekNumber": week
        })
    };
    let e = request_err(&mut stdin, &mut reader, "3", "schedules.create", slot("tuesday", 3));
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("bad_params"));
    let e = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "schedules.update",
        json!({ "scheduleId": room.schedule_id, "patch": { "weekNumber": 3 } }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("bad_params"));
    let _ = request_ok(&mut stdin, &mut reader, "5", "schedules.create", slot("tuesday", 2));

    // A week-2 entry exists, so the rotation cannot shrink to one week.
    let e = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "setup.update",
        json!({ "section": "school", "patch": { "rotationWeeks": 1 } }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("in_use"));
    assert_eq!(
        e.pointer("/details/scheduleCount").and_then(|v| v.as_i64()),
        Some(1)
    );
    let school = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "setup.get",
        json!({ "section": "school" }),
    );
    assert_eq!(
        school.pointer("/school/rotationWeeks").and_then(|v| v.as_i64()),
        Some(2)
    );
}
