use crate::feed::{ChangeFeed, ChangeOp};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::with_db;
use crate::ipc::params::{get_optional_str, get_patch, get_required_str};
use crate::ipc::types::{AppState, Request};
use crate::model::{class_display_name, RecordStatus};
use crate::store::{self, ScheduleFilter};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{json, Value};
use uuid::Uuid;

struct TeacherRow {
    id: String,
    first_name: String,
    last_name: String,
    email: Option<String>,
    subject: Option<String>,
    status: String,
}

impl TeacherRow {
    fn from_row(r: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            first_name: r.get(1)?,
            last_name: r.get(2)?,
            email: r.get(3)?,
            subject: r.get(4)?,
            status: r.get(5)?,
        })
    }

    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "firstName": self.first_name,
            "lastName": self.last_name,
            "displayName": format!("{} {}", self.first_name, self.last_name),
            "email": self.email,
            "subject": self.subject,
            "status": self.status,
        })
    }
}

fn load_teacher(conn: &Connection, id: &str) -> Result<Option<TeacherRow>, HandlerErr> {
    conn.query_row(
        "SELECT id, first_name, last_name, email, subject, status FROM teachers WHERE id = ?",
        [id],
        TeacherRow::from_row,
    )
    .optional()
    .map_err(HandlerErr::query)
}

fn teachers_list(conn: &Connection) -> Result<Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, first_name, last_name, email, subject, status
             FROM teachers ORDER BY last_name, first_name",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([], TeacherRow::from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    let teachers: Vec<Value> = rows.iter().map(TeacherRow::to_json).collect();
    Ok(json!({ "teachers": teachers }))
}

fn teachers_create(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let first_name = get_required_str(params, "firstName")?;
    let last_name = get_required_str(params, "lastName")?;
    let email = get_optional_str(params, "email")?;
    if let Some(e) = &email {
        if !e.contains('@') {
            return Err(HandlerErr::bad_params("email must contain @"));
        }
    }
    let subject = get_optional_str(params, "subject")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO teachers(id, first_name, last_name, email, subject, status)
         VALUES(?, ?, ?, ?, ?, 'active')",
        (&id, &first_name, &last_name, &email, &subject),
    )
    .map_err(|e| HandlerErr::write("db_insert_failed", "teachers", e))?;
    feed.publish("teachers", ChangeOp::Insert, &id);
    Ok(json!({ "teacherId": id }))
}

fn teachers_update(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let patch = get_patch(params)?;
    let Some(mut t) = load_teacher(conn, &teacher_id)? else {
        return Err(HandlerErr::not_found("teacher not found"));
    };
    for (k, v) in patch {
        let text = |v: &Value| -> Result<Option<String>, HandlerErr> {
            match v {
                Value::Null => Ok(None),
                Value::String(s) if s.trim().is_empty() => Ok(None),
                Value::String(s) => Ok(Some(s.trim().to_string())),
                _ => Err(HandlerErr::bad_params(format!("{} must be string or null", k))),
            }
        };
        match k.as_str() {
            "firstName" => {
                t.first_name = text(v)?
                    .ok_or_else(|| HandlerErr::bad_params("firstName must not be empty"))?
            }
            "lastName" => {
                t.last_name = text(v)?
                    .ok_or_else(|| HandlerErr::bad_params("lastName must not be empty"))?
            }
            "email" => t.email = text(v)?,
            "subject" => t.subject = text(v)?,
            "status" => {
                let s = text(v)?.unwrap_or_default();
                let st = RecordStatus::parse(&s).ok_or_else(|| {
                    HandlerErr::bad_params("status must be one of: active, inactive")
                })?;
                t.status = st.as_str().to_string();
            }
            _ => return Err(HandlerErr::bad_params(format!("unknown teacher field: {}", k))),
        }
    }
    conn.execute(
        "UPDATE teachers SET first_name = ?, last_name = ?, email = ?, subject = ?, status = ?
         WHERE id = ?",
        (
            &t.first_name,
            &t.last_name,
            &t.email,
            &t.subject,
            &t.status,
            &teacher_id,
        ),
    )
    .map_err(|e| HandlerErr::write("db_update_failed", "teachers", e))?;
    feed.publish("teachers", ChangeOp::Update, &teacher_id);
    Ok(json!({ "teacher": t.to_json() }))
}

fn teachers_profile(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let Some(t) = load_teacher(conn, &teacher_id)? else {
        return Err(HandlerErr::not_found("teacher not found"));
    };
    let mut stmt = conn
        .prepare(
            "SELECT id, grade, section, subject FROM classes
             WHERE teacher_id = ? ORDER BY grade, section, subject",
        )
        .map_err(HandlerErr::query)?;
    let classes = stmt
        .query_map([&teacher_id], |r| {
            let grade: i64 = r.get(1)?;
            let section: String = r.get(2)?;
            let subject: String = r.get(3)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "displayName": class_display_name(grade, &section, &subject),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    let schedule = store::list_schedule_entries(
        conn,
        &ScheduleFilter {
            teacher_id: Some(teacher_id.clone()),
            ..ScheduleFilter::default()
        },
    )
    .map_err(HandlerErr::query)?;
    Ok(json!({
        "teacher": t.to_json(),
        "homeroomClasses": classes,
        "schedule": schedule,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.list" => Some(with_db(state, req, |c, _, _| teachers_list(c))),
        "teachers.create" => Some(with_db(state, req, teachers_create)),
        "teachers.update" => Some(with_db(state, req, teachers_update)),
        "teachers.profile" => Some(with_db(state, req, |c, _, p| teachers_profile(c, p))),
        _ => None,
    }
}
