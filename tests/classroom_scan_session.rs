mod test_support;

use serde_json::json;
use test_support::{
    create_student, request_err, request_ok, seed_classroom, spawn_sidecar, str_field, temp_dir,
};

#[test]
fn validator_reports_first_failing_check() {
    let workspace = temp_dir("rollcalld-validator");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let room = seed_classroom(&mut stdin, &mut reader);
    let ada = create_student(&mut stdin, &mut reader, "Ada", "Lovelace", "S-001");
    let _bob = create_student(&mut stdin, &mut reader, "Bob", "Outsider", "S-002");
    let cid = create_student(&mut stdin, &mut reader, "Cid", "Away", "S-003");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "enrollments.add",
        json!({ "classId": room.class_id, "studentIds": [ada, cid, "ghost"] }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.setStatus",
        json!({ "studentId": cid, "status": "inactive" }),
    );

    let cases = [
        ("STUDENT:S-001", None),
        ("hello", Some("not a student code")),
        ("STUDENT:", Some("not a student code")),
        ("STUDENT:nobody", Some("Student not found")),
        ("STUDENT:S-003", Some("Student is inactive")),
        ("STUDENT:S-002", Some("Not enrolled in this class")),
    ];
    for (i, (token, reason)) in cases.iter().enumerate() {
        let verdict = request_ok(
            &mut stdin,
            &mut reader,
            &format!("v{}", i),
            "attendance.validate",
            json!({ "token": token, "scheduleId": room.schedule_id }),
        );
        match reason {
            None => {
                assert_eq!(verdict.get("valid").and_then(|v| v.as_bool()), Some(true));
                assert_eq!(
                    verdict.get("displayName").and_then(|v| v.as_str()),
                    Some("Ada Lovelace")
                );
            }
            Some(r) => {
                assert_eq!(verdict.get("valid").and_then(|v| v.as_bool()), Some(false), "{}", token);
                assert_eq!(verdict.get("reason").and_then(|v| v.as_str()), Some(*r), "{}", token);
            }
        }
    }

    // The student id is accepted when no code matches.
    let by_id = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.validate",
        json!({ "token": format!("STUDENT:{}", ada), "scheduleId": room.schedule_id }),
    );
    assert_eq!(by_id.get("valid").and_then(|v| v.as_bool()), Some(true));

    // Validation never writes.
    let records = request_ok(&mut stdin, &mut reader, "5", "attendance.list", json!({}));
    assert_eq!(
        records.get("records").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );
}

#[test]
fn scan_session_records_and_keeps_ten_most_recent() {
    let workspace = temp_dir("rollcalld-scan-session");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let room = seed_classroom(&mut stdin, &mut reader);
    let ada = create_student(&mut stdin, &mut reader, "Ada", "Lovelace", "S-001");
    let _bob = create_student(&mut stdin, &mut reader, "Bob", "Outsider", "S-002");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "enrollments.add",
        json!({ "classId": room.class_id, "studentIds": [ada] }),
    );

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "scan.sessionOpen",
        json!({ "type": "classroom", "scheduleId": room.schedule_id, "recordedBy": room.teacher_id }),
    );
    let session_id = str_field(&opened, "sessionId");
    assert_eq!(
        opened.pointer("/context/type").and_then(|v| v.as_str()),
        Some("classroom")
    );

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "scan.submit",
        json!({ "sessionId": session_id, "token": "STUDENT:S-001", "at": "2026-03-02T08:15" }),
    );
    assert_eq!(
        first.pointer("/outcome/entry/success").and_then(|v| v.as_bool()),
        Some(true)
    );
    assert_eq!(
        first.pointer("/outcome/entry/message").and_then(|v| v.as_str()),
        Some("Marked present")
    );
    assert_eq!(
        first.pointer("/outcome/record/date").and_then(|v| v.as_str()),
        Some("2026-03-02")
    );
    assert_eq!(
        first.pointer("/outcome/record/attendanceType").and_then(|v| v.as_str()),
        Some("classroom")
    );
    assert_eq!(
        first.pointer("/outcome/record/classId").and_then(|v| v.as_str()),
        Some(room.class_id.as_str())
    );

    let rejected = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "scan.submit",
        json!({ "sessionId": session_id, "token": "STUDENT:S-002", "at": "2026-03-02T08:16" }),
    );
    assert!(rejected.pointer("/outcome/record").map(|v| v.is_null()).unwrap_or(false));
    let log = rejected.get("log").and_then(|v| v.as_array()).expect("log");
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].get("success").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        log[0].get("message").and_then(|v| v.as_str()),
        Some("Not enrolled in this class")
    );
    assert_eq!(
        log[0].get("displayName").and_then(|v| v.as_str()),
        Some("Bob Outsider")
    );

    for i in 0..11 {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("repeat-{}", i),
            "scan.submit",
            json!({ "sessionId": session_id, "token": "STUDENT:S-001", "at": "2026-03-02T08:20" }),
        );
    }
    let log = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "scan.sessionLog",
        json!({ "sessionId": session_id }),
    );
    let entries = log.get("log").and_then(|v| v.as_array()).expect("log");
    assert_eq!(entries.len(), 10);
    assert!(entries
        .iter()
        .all(|e| e.get("success").and_then(|v| v.as_bool()) == Some(true)));

    // Repeated scans are not deduplicated.
    let records = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.list",
        json!({ "date": "2026-03-02", "classId": room.class_id }),
    );
    assert_eq!(
        records.get("records").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(12)
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "scan.sessionClose",
        json!({ "sessionId": session_id }),
    );
    let e = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "scan.sessionLog",
        json!({ "sessionId": session_id }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("not_found"));
}

#[test]
fn attendance_record_refuses_invalid_scans() {
    let workspace = temp_dir("rollcalld-attendance-record");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let room = seed_classroom(&mut stdin, &mut reader);
    let _ = create_student(&mut stdin, &mut reader, "Bob", "Outsider", "S-002");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.record",
        json!({ "token": "STUDENT:S-002", "scheduleId": room.schedule_id, "recordedBy": room.teacher_id }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("scan_rejected"));
    assert_eq!(
        e.pointer("/details/reason").and_then(|v| v.as_str()),
        Some("Not enrolled in this class")
    );

    let e = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.validate",
        json!({ "token": "STUDENT:S-002" }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("bad_params"));

    let records = request_ok(&mut stdin, &mut reader, "4", "attendance.list", json!({}));
    assert_eq!(
        records.get("records").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );
}

#[test]
fn session_follows_edits_to_its_schedule_entry() {
    let workspace = temp_dir("rollcalld-scan-session-edit");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let room = seed_classroom(&mut stdin, &mut reader);
    let ada = create_student(&mut stdin, &mut reader, "Ada", "Lovelace", "S-001");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "enrollments.add",
        json!({ "classId": room.class_id, "studentIds": [ada] }),
    );
    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "scan.sessionOpen",
        json!({ "scheduleId": room.schedule_id, "recordedBy": room.teacher_id }),
    );
    let session_id = str_field(&opened, "sessionId");

    // Hand the slot to another class while the session is open.
    let other = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "classes.create",
        json!({ "grade": 6, "section": "B", "subject": "Science" }),
    );
    let other_class_id = str_field(&other, "classId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "schedules.update",
        json!({ "scheduleId": room.schedule_id, "patch": { "classId": other_class_id } }),
    );

    let verdict = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.validate",
        json!({ "token": "STUDENT:S-001", "scheduleId": room.schedule_id }),
    );
    assert_eq!(verdict.get("valid").and_then(|v| v.as_bool()), Some(false));
    let submitted = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "scan.submit",
        json!({ "sessionId": session_id, "token": "STUDENT:S-001", "at": "2026-03-02T08:10" }),
    );
    assert_eq!(
        submitted.pointer("/outcome/verdict/valid").and_then(|v| v.as_bool()),
        Some(false)
    );
    assert_eq!(
        submitted.pointer("/outcome/entry/message").and_then(|v| v.as_str()),
        Some("Not enrolled in this class")
    );
    assert!(submitted
        .pointer("/outcome/record")
        .map(|v| v.is_null())
        .unwrap_or(false));

    let log = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "scan.sessionLog",
        json!({ "sessionId": session_id }),
    );
    assert_eq!(
        log.pointer("/target/scheduleId").and_then(|v| v.as_str()),
        Some(room.schedule_id.as_str())
    );

    // A deleted entry is reported rather than written against.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "schedules.delete",
        json!({ "scheduleId": room.schedule_id }),
    );
    let e = request_err(
        &mut stdin,
        &mut reader,
        "10",
        "scan.submit",
        json!({ "sessionId": session_id, "token": "STUDENT:S-001" }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("not_found"));

    let records = request_ok(&mut stdin, &mut reader, "11", "attendance.list", json!({}));
    assert_eq!(
        records.get("records").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );
}
