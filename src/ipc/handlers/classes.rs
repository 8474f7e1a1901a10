use crate::feed::{ChangeFeed, ChangeOp};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::with_db;
use crate::ipc::params::{
    get_optional_str, get_patch, get_required_i64, get_required_str, get_str_array, now_rfc3339,
};
use crate::ipc::types::{AppState, Request};
use crate::model::class_display_name;
use crate::store;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

struct ClassRow {
    grade: i64,
    section: String,
    subject: String,
    teacher_id: Option<String>,
}

fn load_class(conn: &Connection, class_id: &str) -> Result<Option<ClassRow>, HandlerErr> {
    conn.query_row(
        "SELECT grade, section, subject, teacher_id FROM classes WHERE id = ?",
        [class_id],
        |r| {
            Ok(ClassRow {
                grade: r.get(0)?,
                section: r.get(1)?,
                subject: r.get(2)?,
                teacher_id: r.get(3)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::query)
}

fn check_teacher(conn: &Connection, teacher_id: Option<&str>) -> Result<(), HandlerErr> {
    if let Some(t) = teacher_id {
        if !store::row_exists(conn, "teachers", t).map_err(HandlerErr::query)? {
            return Err(HandlerErr::not_found("teacher not found"));
        }
    }
    Ok(())
}

fn classes_list(conn: &Connection) -> Result<Value, HandlerErr> {
    // Correlated subqueries keep the counts independent of each other.
    let mut stmt = conn
        .prepare(
            "SELECT
               c.id, c.grade, c.section, c.subject, c.teacher_id,
               (SELECT COUNT(*) FROM class_enrollments ce WHERE ce.class_id = c.id) AS student_count,
               (SELECT COUNT(*) FROM class_schedules cs WHERE cs.class_id = c.id) AS session_count
             FROM classes c
             ORDER BY c.grade, c.section, c.subject",
        )
        .map_err(HandlerErr::query)?;
    let classes = stmt
        .query_map([], |r| {
            let grade: i64 = r.get(1)?;
            let section: String = r.get(2)?;
            let subject: String = r.get(3)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "grade": grade,
                "section": section,
                "subject": subject,
                "displayName": class_display_name(grade, &section, &subject),
                "teacherId": r.get::<_, Option<String>>(4)?,
                "studentCount": r.get::<_, i64>(5)?,
                "sessionCount": r.get::<_, i64>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "classes": classes }))
}

fn classes_create(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let grade = get_required_i64(params, "grade")?;
    let section = get_required_str(params, "section")?;
    let subject = get_required_str(params, "subject")?;
    let teacher_id = get_optional_str(params, "teacherId")?;
    check_teacher(conn, teacher_id.as_deref())?;

    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, grade, section, subject, teacher_id) VALUES(?, ?, ?, ?, ?)",
        (&class_id, grade, &section, &subject, &teacher_id),
    )
    .map_err(|e| HandlerErr::write("db_insert_failed", "classes", e))?;
    feed.publish("classes", ChangeOp::Insert, &class_id);
    Ok(json!({
        "classId": class_id,
        "displayName": class_display_name(grade, &section, &subject)
    }))
}

fn classes_update(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let patch = get_patch(params)?;
    let Some(mut c) = load_class(conn, &class_id)? else {
        return Err(HandlerErr::not_found("class not found"));
    };
    for (k, v) in patch {
        match k.as_str() {
            "grade" => {
                c.grade = v
                    .as_i64()
                    .ok_or_else(|| HandlerErr::bad_params("grade must be integer"))?
            }
            "section" | "subject" => {
                let s = v
                    .as_str()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a non-empty string", k)))?;
                if k == "section" {
                    c.section = s;
                } else {
                    c.subject = s;
                }
            }
            "teacherId" => {
                c.teacher_id = match v {
                    Value::Null => None,
                    Value::String(s) => Some(s.trim().to_string()),
                    _ => return Err(HandlerErr::bad_params("teacherId must be string or null")),
                };
            }
            _ => return Err(HandlerErr::bad_params(format!("unknown class field: {}", k))),
        }
    }
    check_teacher(conn, c.teacher_id.as_deref())?;
    conn.execute(
        "UPDATE classes SET grade = ?, section = ?, subject = ?, teacher_id = ? WHERE id = ?",
        (c.grade, &c.section, &c.subject, &c.teacher_id, &class_id),
    )
    .map_err(|e| HandlerErr::write("db_update_failed", "classes", e))?;
    feed.publish("classes", ChangeOp::Update, &class_id);
    Ok(json!({
        "classId": class_id,
        "displayName": class_display_name(c.grade, &c.section, &c.subject)
    }))
}

fn enrollments_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    if load_class(conn, &class_id)?.is_none() {
        return Err(HandlerErr::not_found("class not found"));
    }
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.first_name, s.last_name, s.code, s.status, ce.enrolled_at
             FROM class_enrollments ce
             JOIN students s ON s.id = ce.student_id
             WHERE ce.class_id = ?
             ORDER BY s.last_name, s.first_name",
        )
        .map_err(HandlerErr::query)?;
    let students = stmt
        .query_map([&class_id], |r| {
            let first: String = r.get(1)?;
            let last: String = r.get(2)?;
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "displayName": format!("{} {}", first, last),
                "code": r.get::<_, String>(3)?,
                "status": r.get::<_, String>(4)?,
                "enrolledAt": r.get::<_, String>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "classId": class_id, "students": students }))
}

/// Unknown student ids are skipped; already enrolled ones are left as is.
fn enrollments_add(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let student_ids = get_str_array(params, "studentIds")?;
    if load_class(conn, &class_id)?.is_none() {
        return Err(HandlerErr::not_found("class not found"));
    }
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let enrolled_at = now_rfc3339();
    let mut added = Vec::new();
    let mut skipped = Vec::new();
    for student_id in student_ids {
        if !store::row_exists(&tx, "students", &student_id).map_err(HandlerErr::query)? {
            skipped.push(student_id);
            continue;
        }
        let n = tx
            .execute(
                "INSERT OR IGNORE INTO class_enrollments(class_id, student_id, enrolled_at)
                 VALUES(?, ?, ?)",
                (&class_id, &student_id, &enrolled_at),
            )
            .map_err(|e| HandlerErr::write("db_insert_failed", "class_enrollments", e))?;
        if n > 0 {
            added.push(student_id);
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    for sid in &added {
        feed.publish("class_enrollments", ChangeOp::Insert, &format!("{}:{}", class_id, sid));
    }
    Ok(json!({ "added": added.len(), "skippedStudentIds": skipped }))
}

fn enrollments_remove(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?;
    let n = conn
        .execute(
            "DELETE FROM class_enrollments WHERE class_id = ? AND student_id = ?",
            (&class_id, &student_id),
        )
        .map_err(|e| HandlerErr::write("db_delete_failed", "class_enrollments", e))?;
    if n == 0 {
        return Err(HandlerErr::not_found("enrollment not found"));
    }
    feed.publish(
        "class_enrollments",
        ChangeOp::Delete,
        &format!("{}:{}", class_id, student_id),
    );
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(with_db(state, req, |c, _, _| classes_list(c))),
        "classes.create" => Some(with_db(state, req, classes_create)),
        "classes.update" => Some(with_db(state, req, classes_update)),
        "enrollments.list" => Some(with_db(state, req, |c, _, p| enrollments_list(c, p))),
        "enrollments.add" => Some(with_db(state, req, enrollments_add)),
        "enrollments.remove" => Some(with_db(state, req, enrollments_remove)),
        _ => None,
    }
}
