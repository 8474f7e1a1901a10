#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rollcalld");
    let mut child = Command::new(exe)
        .env_remove("ROLLCALLD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rollcalld");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn send_line(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    line: &str,
) -> serde_json::Value {
    writeln!(stdin, "{}", line).expect("write request");
    stdin.flush().expect("flush request");
    let mut out = String::new();
    reader.read_line(&mut out).expect("read response line");
    assert!(!out.trim().is_empty(), "empty response");
    serde_json::from_str(out.trim()).expect("parse response json")
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    let value = send_line(stdin, reader, &payload.to_string());
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Expects a failure and returns the `error` object.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().expect("error object")
}

pub fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing string field {} in {}", key, v))
        .to_string()
}

pub struct Classroom {
    pub teacher_id: String,
    pub class_id: String,
    pub room_id: String,
    pub period_id: String,
    pub schedule_id: String,
}

/// One teacher teaching one class in "Room 101", period 1 (08:00-08:45),
/// Monday of rotation week 1.
pub fn seed_classroom(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
) -> Classroom {
    let teacher = request_ok(
        stdin,
        reader,
        "seed-teacher",
        "teachers.create",
        json!({ "firstName": "Grace", "lastName": "Hopper", "email": "grace@school.test", "subject": "Mathematics" }),
    );
    let teacher_id = str_field(&teacher, "teacherId");
    let class = request_ok(
        stdin,
        reader,
        "seed-class",
        "classes.create",
        json!({ "grade": 6, "section": "A", "subject": "Mathematics", "teacherId": teacher_id }),
    );
    let class_id = str_field(&class, "classId");
    let room = request_ok(
        stdin,
        reader,
        "seed-room",
        "rooms.create",
        json!({ "name": "Room 101", "building": "Main", "floor": 1, "capacity": 30 }),
    );
    let room_id = str_field(&room, "roomId");
    let period = request_ok(
        stdin,
        reader,
        "seed-period",
        "periods.create",
        json!({ "periodNumber": 1, "startTime": "08:00", "endTime": "08:45" }),
    );
    let period_id = str_field(&period, "periodId");
    let schedule = request_ok(
        stdin,
        reader,
        "seed-schedule",
        "schedules.create",
        json!({
            "classId": class_id,
            "teacherId": teacher_id,
            "roomId": room_id,
            "periodId": period_id,
            "dayOfWeek": "monday",
            "weekNumber": 1
        }),
    );
    let schedule_id = str_field(&schedule, "scheduleId");
    Classroom {
        teacher_id,
        class_id,
        room_id,
        period_id,
        schedule_id,
    }
}

pub fn create_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    first: &str,
    last: &str,
    code: &str,
) -> String {
    let res = request_ok(
        stdin,
        reader,
        &format!("student-{}", code),
        "students.create",
        json!({ "firstName": first, "lastName": last, "grade": 6, "section": "A", "code": code }),
    );
    str_field(&res, "studentId")
}
