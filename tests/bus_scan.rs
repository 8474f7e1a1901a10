mod test_support;

use serde_json::json;
use test_support::{create_student, request_err, request_ok, spawn_sidecar, str_field, temp_dir};

#[test]
fn bus_scans_require_an_active_assignment_to_the_route() {
    let workspace = temp_dir("rollcalld-bus-scan");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let route7 = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "bus.routes.create",
        json!({ "name": "Route 7", "driverName": "Sam" }),
    );
    let route7_id = str_field(&route7, "busRouteId");
    let route9 = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "bus.routes.create",
        json!({ "name": "Route 9" }),
    );
    let route9_id = str_field(&route9, "busRouteId");
    let stop = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "bus.stops.create",
        json!({ "busRouteId": route7_id, "name": "Elm Street", "pickupTime": "07:10" }),
    );
    assert_eq!(stop.get("stopOrder").and_then(|v| v.as_i64()), Some(1));
    let stop_id = str_field(&stop, "busStopId");

    let rider = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.create",
        json!({
            "firstName": "Rita", "lastName": "Rider", "grade": 5, "section": "B",
            "code": "R-1", "busRouteId": route7_id, "busStopId": stop_id
        }),
    );
    let rider_id = str_field(&rider, "studentId");
    assert!(rider.get("busAssignmentId").and_then(|v| v.as_str()).is_some());
    let _walker = create_student(&mut stdin, &mut reader, "Wally", "Walker", "W-1");

    let ok_verdict = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.validate",
        json!({ "token": "STUDENT:R-1", "busRouteId": route7_id }),
    );
    assert_eq!(ok_verdict.get("valid").and_then(|v| v.as_bool()), Some(true));
    let no_verdict = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.validate",
        json!({ "token": "STUDENT:W-1", "busRouteId": route7_id }),
    );
    assert_eq!(
        no_verdict.get("reason").and_then(|v| v.as_str()),
        Some("Not assigned to this bus")
    );

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "scan.sessionOpen",
        json!({ "type": "bus", "busRouteId": route7_id, "recordedBy": "driver-sam" }),
    );
    let session_id = str_field(&opened, "sessionId");
    let scanned = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "scan.submit",
        json!({ "sessionId": session_id, "token": " STUDENT:R-1 ", "at": "2026-03-03T07:12:00" }),
    );
    assert_eq!(
        scanned.pointer("/outcome/record/attendanceType").and_then(|v| v.as_str()),
        Some("bus")
    );
    assert_eq!(
        scanned.pointer("/outcome/record/busRouteId").and_then(|v| v.as_str()),
        Some(route7_id.as_str())
    );
    assert!(scanned
        .pointer("/outcome/record/scheduleId")
        .map(|v| v.is_null())
        .unwrap_or(false));

    // Reassignment deactivates the old route.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "bus.assignments.set",
        json!({ "studentId": rider_id, "busRouteId": route9_id }),
    );
    let moved = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "attendance.validate",
        json!({ "token": "STUDENT:R-1", "busRouteId": route7_id }),
    );
    assert_eq!(moved.get("valid").and_then(|v| v.as_bool()), Some(false));
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "students.get",
        json!({ "studentId": rider_id }),
    );
    assert_eq!(
        student.pointer("/student/busRouteId").and_then(|v| v.as_str()),
        Some(route9_id.as_str())
    );

    let routes = request_ok(&mut stdin, &mut reader, "13", "bus.routes.list", json!({}));
    let routes = routes.get("busRoutes").and_then(|v| v.as_array()).expect("routes");
    let riders = |id: &str| {
        routes
            .iter()
            .find(|r| r.get("id").and_then(|v| v.as_str()) == Some(id))
            .and_then(|r| r.get("riderCount"))
            .and_then(|v| v.as_i64())
    };
    assert_eq!(riders(&route7_id), Some(0));
    assert_eq!(riders(&route9_id), Some(1));

    // Inactive routes take no new riders.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "bus.routes.update",
        json!({ "busRouteId": route7_id, "patch": { "status": "inactive" } }),
    );
    let e = request_err(
        &mut stdin,
        &mut reader,
        "15",
        "bus.assignments.set",
        json!({ "studentId": rider_id, "busRouteId": route7_id }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("bad_params"));

    // Nor any scans, whether through an open session or a new one.
    let e = request_err(
        &mut stdin,
        &mut reader,
        "15b",
        "scan.submit",
        json!({ "sessionId": session_id, "token": "STUDENT:R-1" }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("bad_params"));
    let e = request_err(
        &mut stdin,
        &mut reader,
        "15c",
        "scan.sessionOpen",
        json!({ "type": "bus", "busRouteId": route7_id, "recordedBy": "driver-sam" }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("bad_params"));
    let e = request_err(
        &mut stdin,
        &mut reader,
        "15d",
        "attendance.validate",
        json!({ "token": "STUDENT:R-1", "busRouteId": route7_id }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("bad_params"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "bus.assignments.remove",
        json!({ "studentId": rider_id }),
    );
    let assignments = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "bus.assignments.list",
        json!({ "busRouteId": route9_id }),
    );
    assert_eq!(
        assignments.get("assignments").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );
}
