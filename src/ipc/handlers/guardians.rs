use crate::feed::{ChangeFeed, ChangeOp};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::with_db;
use crate::ipc::params::{format_date, get_optional_date, get_optional_str, get_required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, AttendanceFilter};
use chrono::Local;
use rusqlite::Connection;
use serde_json::{json, Value};
use uuid::Uuid;

fn guardians_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_optional_str(params, "studentId")?;
    let mut stmt = conn
        .prepare(
            "SELECT g.id, g.first_name, g.last_name, g.phone, g.email, g.relationship,
                    (SELECT COUNT(*) FROM guardian_students gs WHERE gs.guardian_id = g.id)
             FROM guardians g
             WHERE ?1 IS NULL
                OR EXISTS(SELECT 1 FROM guardian_students gs
                          WHERE gs.guardian_id = g.id AND gs.student_id = ?1)
             ORDER BY g.last_name, g.first_name",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([&student_id], |r| {
            let first: String = r.get(1)?;
            let last: String = r.get(2)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "firstName": first,
                "lastName": last,
                "displayName": format!("{} {}", first, last),
                "phone": r.get::<_, Option<String>>(3)?,
                "email": r.get::<_, Option<String>>(4)?,
                "relationship": r.get::<_, Option<String>>(5)?,
                "childCount": r.get::<_, i64>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "guardians": rows }))
}

fn guardians_create(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let first_name = get_required_str(params, "firstName")?;
    let last_name = get_required_str(params, "lastName")?;
    let phone = get_optional_str(params, "phone")?;
    let email = get_optional_str(params, "email")?;
    if email.as_deref().is_some_and(|e| !e.contains('@')) {
        return Err(HandlerErr::bad_params("email must contain @"));
    }
    let relationship = get_optional_str(params, "relationship")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO guardians(id, first_name, last_name, phone, email, relationship)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &first_name, &last_name, &phone, &email, &relationship),
    )
    .map_err(|e| HandlerErr::write("db_insert_failed", "guardians", e))?;
    feed.publish("guardians", ChangeOp::Insert, &id);
    Ok(json!({ "guardianId": id }))
}

fn guardians_link(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let guardian_id = get_required_str(params, "guardianId")?;
    let student_id = get_required_str(params, "studentId")?;
    if !store::row_exists(conn, "guardians", &guardian_id).map_err(HandlerErr::query)? {
        return Err(HandlerErr::not_found("guardian not found"));
    }
    if !store::row_exists(conn, "students", &student_id).map_err(HandlerErr::query)? {
        return Err(HandlerErr::not_found("student not found"));
    }
    let n = conn
        .execute(
            "INSERT OR IGNORE INTO guardian_students(guardian_id, student_id) VALUES(?, ?)",
            (&guardian_id, &student_id),
        )
        .map_err(|e| HandlerErr::write("db_insert_failed", "guardian_students", e))?;
    if n > 0 {
        feed.publish("guardians", ChangeOp::Update, &guardian_id);
    }
    Ok(json!({ "ok": true, "linked": n > 0 }))
}

fn guardians_unlink(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let guardian_id = get_required_str(params, "guardianId")?;
    let student_id = get_required_str(params, "studentId")?;
    let n = conn
        .execute(
            "DELETE FROM guardian_students WHERE guardian_id = ? AND student_id = ?",
            (&guardian_id, &student_id),
        )
        .map_err(|e| HandlerErr::write("db_delete_failed", "guardian_students", e))?;
    if n == 0 {
        return Err(HandlerErr::not_found("link not found"));
    }
    feed.publish("guardians", ChangeOp::Update, &guardian_id);
    Ok(json!({ "ok": true }))
}

/// Parent-portal view: each linked child with that day's attendance.
fn portal_children(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let guardian_id = get_required_str(params, "guardianId")?;
    if !store::row_exists(conn, "guardians", &guardian_id).map_err(HandlerErr::query)? {
        return Err(HandlerErr::not_found("guardian not found"));
    }
    let date = get_optional_date(params, "date")?.unwrap_or_else(|| Local::now().date_naive());
    let date_str = format_date(date);

    let student_ids: Vec<String> = {
        let mut stmt = conn
            .prepare(
                "SELECT gs.student_id FROM guardian_students gs
                 JOIN students s ON s.id = gs.student_id
                 WHERE gs.guardian_id = ?
                 ORDER BY s.last_name, s.first_name",
            )
            .map_err(HandlerErr::query)?;
        let ids = stmt
            .query_map([&guardian_id], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        ids
    };

    let mut children = Vec::with_capacity(student_ids.len());
    for sid in student_ids {
        let Some(student) = store::load_student(conn, &sid).map_err(HandlerErr::query)? else {
            continue;
        };
        let records = store::list_attendance(
            conn,
            &AttendanceFilter {
                date: Some(date_str.clone()),
                student_id: Some(sid),
                ..AttendanceFilter::default()
            },
        )
        .map_err(HandlerErr::query)?;
        children.push(json!({
            "student": student.to_json(),
            "present": !records.is_empty(),
            "attendance": records
        }));
    }
    Ok(json!({ "guardianId": guardian_id, "date": date_str, "children": children }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "guardians.list" => Some(with_db(state, req, |c, _, p| guardians_list(c, p))),
        "guardians.create" => Some(with_db(state, req, guardians_create)),
        "guardians.link" => Some(with_db(state, req, guardians_link)),
        "guardians.unlink" => Some(with_db(state, req, guardians_unlink)),
        "portal.children" => Some(with_db(state, req, |c, _, p| portal_children(c, p))),
        _ => None,
    }
}
