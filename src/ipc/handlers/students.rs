use crate::feed::{ChangeFeed, ChangeOp};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::transport::assign_bus;
use crate::ipc::handlers::with_db;
use crate::ipc::params::{
    get_optional_i64, get_optional_str, get_patch, get_required_i64, get_required_str,
    now_rfc3339,
};
use crate::ipc::types::{AppState, Request};
use crate::model::RecordStatus;
use crate::store::{self, StudentFilter};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

fn generate_code() -> String {
    let raw = Uuid::new_v4().simple().to_string().to_ascii_uppercase();
    format!("STU-{}", &raw[..8])
}

fn validate_code(code: &str) -> Result<(), HandlerErr> {
    if code.chars().any(char::is_whitespace) {
        return Err(HandlerErr::bad_params("code must not contain whitespace"));
    }
    if code.chars().count() > 64 {
        return Err(HandlerErr::bad_params("code must be at most 64 characters"));
    }
    Ok(())
}

fn parse_status(raw: &str) -> Result<RecordStatus, HandlerErr> {
    RecordStatus::parse(raw)
        .ok_or_else(|| HandlerErr::bad_params("status must be one of: active, inactive"))
}

fn students_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let filter = StudentFilter {
        grade: get_optional_i64(params, "grade")?,
        section: get_optional_str(params, "section")?,
        status: get_optional_str(params, "status")?
            .map(|s| parse_status(&s))
            .transpose()?,
        query: get_optional_str(params, "query")?,
    };
    let students = store::list_students(conn, &filter).map_err(HandlerErr::query)?;
    let rows: Vec<Value> = students.iter().map(|s| s.to_json()).collect();
    Ok(json!({ "students": rows }))
}

fn students_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let Some(student) = store::load_student(conn, &student_id).map_err(HandlerErr::query)? else {
        return Err(HandlerErr::not_found("student not found"));
    };
    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.grade, c.section, c.subject
             FROM class_enrollments ce
             JOIN classes c ON c.id = ce.class_id
             WHERE ce.student_id = ?
             ORDER BY c.grade, c.section, c.subject",
        )
        .map_err(HandlerErr::query)?;
    let classes = stmt
        .query_map([&student_id], |r| {
            let grade: i64 = r.get(1)?;
            let section: String = r.get(2)?;
            let subject: String = r.get(3)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "displayName": crate::model::class_display_name(grade, &section, &subject),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "student": student.to_json(), "classes": classes }))
}

/// The student row and its bus assignment are written in one transaction:
/// an unknown route leaves neither behind.
fn students_create(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let first_name = get_required_str(params, "firstName")?;
    let last_name = get_required_str(params, "lastName")?;
    let grade = get_required_i64(params, "grade")?;
    let section = get_required_str(params, "section")?;
    let code = match get_optional_str(params, "code")? {
        Some(c) => c,
        None => generate_code(),
    };
    validate_code(&code)?;
    let status = get_optional_str(params, "status")?
        .map(|s| parse_status(&s))
        .transpose()?
        .unwrap_or(RecordStatus::Active);
    let bus_route_id = get_optional_str(params, "busRouteId")?;
    let bus_stop_id = get_optional_str(params, "busStopId")?;
    if bus_stop_id.is_some() && bus_route_id.is_none() {
        return Err(HandlerErr::bad_params("busStopId requires busRouteId"));
    }

    let student_id = Uuid::new_v4().to_string();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "INSERT INTO students(id, first_name, last_name, code, grade, section, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &first_name,
            &last_name,
            &code,
            grade,
            &section,
            status.as_str(),
            now_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::write("db_insert_failed", "students", e))?;

    let mut assignment_id = None;
    if let Some(route_id) = &bus_route_id {
        assignment_id = Some(assign_bus(&tx, &student_id, route_id, bus_stop_id.as_deref())?);
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    feed.publish("students", ChangeOp::Insert, &student_id);
    if let Some(aid) = &assignment_id {
        feed.publish("bus_assignments", ChangeOp::Insert, aid);
    }
    info!(student_id = %student_id, "student registered");
    Ok(json!({
        "studentId": student_id,
        "code": code,
        "scanToken": format!("{}{}", crate::scan::STUDENT_TOKEN_PREFIX, code),
        "busAssignmentId": assignment_id
    }))
}

fn students_update(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let patch = get_patch(params)?;
    if !store::row_exists(conn, "students", &student_id).map_err(HandlerErr::query)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<SqlValue> = Vec::new();
    for (k, v) in patch {
        match k.as_str() {
            "firstName" | "lastName" | "section" | "code" => {
                let s = v
                    .as_str()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a non-empty string", k)))?;
                let col = match k.as_str() {
                    "firstName" => "first_name = ?",
                    "lastName" => "last_name = ?",
                    "section" => "section = ?",
                    _ => {
                        validate_code(&s)?;
                        "code = ?"
                    }
                };
                sets.push(col);
                values.push(SqlValue::Text(s));
            }
            "grade" => {
                let g = v
                    .as_i64()
                    .ok_or_else(|| HandlerErr::bad_params("grade must be integer"))?;
                sets.push("grade = ?");
                values.push(SqlValue::Integer(g));
            }
            _ => return Err(HandlerErr::bad_params(format!("unknown student field: {}", k))),
        }
    }
    if sets.is_empty() {
        return Ok(json!({ "ok": true }));
    }
    sets.push("updated_at = ?");
    values.push(SqlValue::Text(now_rfc3339()));
    values.push(SqlValue::Text(student_id.clone()));
    let sql = format!("UPDATE students SET {} WHERE id = ?", sets.join(", "));
    conn.execute(&sql, params_from_iter(values))
        .map_err(|e| HandlerErr::write("db_update_failed", "students", e))?;
    feed.publish("students", ChangeOp::Update, &student_id);
    Ok(json!({ "ok": true }))
}

fn students_set_status(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let status = parse_status(&get_required_str(params, "status")?)?;
    let changed = conn
        .execute(
            "UPDATE students SET status = ?, updated_at = ? WHERE id = ?",
            (status.as_str(), now_rfc3339(), &student_id),
        )
        .map_err(|e| HandlerErr::write("db_update_failed", "students", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("student not found"));
    }
    feed.publish("students", ChangeOp::Update, &student_id);
    Ok(json!({ "ok": true, "status": status.as_str() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(with_db(state, req, |c, _, p| students_list(c, p))),
        "students.get" => Some(with_db(state, req, |c, _, p| students_get(c, p))),
        "students.create" => Some(with_db(state, req, students_create)),
        "students.update" => Some(with_db(state, req, students_update)),
        "students.setStatus" => Some(with_db(state, req, students_set_status)),
        _ => None,
    }
}
