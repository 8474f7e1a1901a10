mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, seed_classroom, spawn_sidecar, str_field, temp_dir};

fn conflict_kinds(v: &serde_json::Value) -> Vec<String> {
    let mut kinds: Vec<String> = v
        .as_array()
        .expect("conflicts array")
        .iter()
        .filter_map(|c| c.get("kind").and_then(|k| k.as_str()).map(str::to_string))
        .collect();
    kinds.sort();
    kinds
}

#[test]
fn conflicts_are_reported_per_kind_and_block_writes() {
    let workspace = temp_dir("rollcalld-schedule-conflicts");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let base = seed_classroom(&mut stdin, &mut reader);

    let other_teacher = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "teachers.create",
        json!({ "firstName": "Alan", "lastName": "Kay" }),
    );
    let other_teacher_id = str_field(&other_teacher, "teacherId");
    let other_room = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "rooms.create",
        json!({ "name": "Lab 2" }),
    );
    let other_room_id = str_field(&other_room, "roomId");
    let other_class = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "classes.create",
        json!({ "grade": 6, "section": "B", "subject": "Science" }),
    );
    let other_class_id = str_field(&other_class, "classId");
    assert_eq!(
        other_class.get("displayName").and_then(|v| v.as_str()),
        Some("Grade 6 - Section B (Science)")
    );

    // Same teacher, different room and class.
    let check = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "schedules.checkConflicts",
        json!({
            "classId": other_class_id, "teacherId": base.teacher_id, "roomId": other_room_id,
            "periodId": base.period_id, "dayOfWeek": "monday", "weekNumber": 1
        }),
    );
    assert_eq!(check.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(conflict_kinds(&check["conflicts"]), vec!["teacher"]);

    // Same room only.
    let e = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "schedules.create",
        json!({
            "classId": other_class_id, "teacherId": other_teacher_id, "roomId": base.room_id,
            "periodId": base.period_id, "dayOfWeek": "monday", "weekNumber": 1
        }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("schedule_conflict"));
    assert_eq!(conflict_kinds(&e["details"]["conflicts"]), vec!["room"]);
    assert_eq!(
        e.pointer("/details/conflicts/0/scheduleId").and_then(|v| v.as_str()),
        Some(base.schedule_id.as_str())
    );

    // Everything shared: all three kinds.
    let check = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "schedules.checkConflicts",
        json!({
            "classId": base.class_id, "teacherId": base.teacher_id, "roomId": base.room_id,
            "periodId": base.period_id, "dayOfWeek": "monday", "weekNumber": 1
        }),
    );
    assert_eq!(
        conflict_kinds(&check["conflicts"]),
        vec!["class", "room", "teacher"]
    );

    // A different rotation week is a different slot.
    let week2 = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "schedules.create",
        json!({
            "classId": base.class_id, "teacherId": base.teacher_id, "roomId": base.room_id,
            "periodId": base.period_id, "dayOfWeek": "monday", "weekNumber": 2
        }),
    );
    let week2_id = str_field(&week2, "scheduleId");

    // Editing an entry does not conflict with itself.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "schedules.update",
        json!({ "scheduleId": base.schedule_id, "patch": { "dayOfWeek": "monday" } }),
    );
    // Moving week 2 onto week 1 collides with the original.
    let e = request_err(
        &mut stdin,
        &mut reader,
        "10",
        "schedules.update",
        json!({ "scheduleId": week2_id, "patch": { "weekNumber": 1 } }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("schedule_conflict"));

    let e = request_err(
        &mut stdin,
        &mut reader,
        "11",
        "schedules.create",
        json!({
            "classId": other_class_id, "teacherId": other_teacher_id, "roomId": other_room_id,
            "periodId": base.period_id, "dayOfWeek": "monday", "weekNumber": 5
        }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("bad_params"));

    // Referenced rooms and periods cannot be deleted.
    let e = request_err(
        &mut stdin,
        &mut reader,
        "12",
        "rooms.delete",
        json!({ "roomId": base.room_id }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("in_use"));
    let e = request_err(
        &mut stdin,
        &mut reader,
        "13",
        "periods.delete",
        json!({ "periodId": base.period_id }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("in_use"));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "rooms.delete",
        json!({ "roomId": other_room_id }),
    );
}

#[test]
fn today_and_current_follow_the_rotation() {
    let workspace = temp_dir("rollcalld-schedule-today");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let base = seed_classroom(&mut stdin, &mut reader);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({ "section": "school", "patch": { "rotationStartDate": "2026-03-04" } }),
    );

    // 2026-03-02 is the Monday of the anchor week: rotation week 1.
    let today = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "schedules.today",
        json!({ "teacherId": base.teacher_id, "date": "2026-03-02" }),
    );
    assert_eq!(today.get("weekNumber").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(today.get("dayOfWeek").and_then(|v| v.as_str()), Some("monday"));
    let entries = today.get("schedules").and_then(|v| v.as_array()).expect("schedules");
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].get("className").and_then(|v| v.as_str()),
        Some("Grade 6 - Section A (Mathematics)")
    );
    assert_eq!(entries[0].get("periodNumber").and_then(|v| v.as_i64()), Some(1));

    // One week later is rotation week 2: nothing scheduled.
    let next = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "schedules.today",
        json!({ "teacherId": base.teacher_id, "date": "2026-03-09" }),
    );
    assert_eq!(next.get("weekNumber").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(
        next.get("schedules").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );
    // Four weeks later wraps back to week 1.
    let wrapped = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "schedules.today",
        json!({ "teacherId": base.teacher_id, "date": "2026-03-30" }),
    );
    assert_eq!(wrapped.get("weekNumber").and_then(|v| v.as_u64()), Some(1));

    let during = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "schedules.current",
        json!({ "roomId": base.room_id, "at": "2026-03-02T08:00" }),
    );
    assert_eq!(
        during.pointer("/schedule/id").and_then(|v| v.as_str()),
        Some(base.schedule_id.as_str())
    );
    let at_end = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "schedules.current",
        json!({ "teacherId": base.teacher_id, "at": "2026-03-02T08:45" }),
    );
    assert!(at_end.get("schedule").map(|v| v.is_null()).unwrap_or(false));

    let e = request_err(&mut stdin, &mut reader, "8", "schedules.current", json!({}));
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("bad_params"));
}
