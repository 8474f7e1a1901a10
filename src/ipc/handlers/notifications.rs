use crate::feed::{ChangeFeed, ChangeOp};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::with_db;
use crate::ipc::params::{get_optional_bool, get_optional_str, get_required_str, now_rfc3339};
use crate::ipc::types::{AppState, Request};
use crate::scan::ScanContext;
use rusqlite::Connection;
use serde_json::{json, Value};
use uuid::Uuid;

fn insert_notification(
    conn: &Connection,
    recipient_id: &str,
    title: &str,
    body: &str,
) -> Result<String, HandlerErr> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO notifications(id, recipient_id, title, body, created_at) VALUES(?, ?, ?, ?, ?)",
        (&id, recipient_id, title, body, now_rfc3339()),
    )
    .map_err(|e| HandlerErr::write("db_insert_failed", "notifications", e))?;
    Ok(id)
}

/// One notification per guardian linked to the student. Returns how many
/// were written.
pub(crate) fn notify_guardians(
    conn: &Connection,
    feed: &mut ChangeFeed,
    student_id: &str,
    display_name: &str,
    ctx: &ScanContext,
) -> Result<usize, HandlerErr> {
    let guardian_ids: Vec<String> = {
        let mut stmt = conn
            .prepare("SELECT guardian_id FROM guardian_students WHERE student_id = ?")
            .map_err(HandlerErr::query)?;
        let ids = stmt
            .query_map([student_id], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        ids
    };
    let place = match ctx {
        ScanContext::Classroom { schedule } => schedule.class_name.clone(),
        ScanContext::Bus { route } => format!("bus {}", route.name),
    };
    let body = format!("{} was marked present ({})", display_name, place);
    for gid in &guardian_ids {
        let id = insert_notification(conn, gid, "Attendance recorded", &body)?;
        feed.publish("notifications", ChangeOp::Insert, &id);
    }
    Ok(guardian_ids.len())
}

fn notifications_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let recipient_id = get_optional_str(params, "recipientId")?;
    let unread_only = get_optional_bool(params, "unreadOnly")?.unwrap_or(false);
    let mut stmt = conn
        .prepare(
            "SELECT id, recipient_id, title, body, created_at, read_at
             FROM notifications
             WHERE (?1 IS NULL OR recipient_id = ?1)
               AND (?2 = 0 OR read_at IS NULL)
             ORDER BY created_at DESC, id",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map((&recipient_id, unread_only), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "recipientId": r.get::<_, String>(1)?,
                "title": r.get::<_, String>(2)?,
                "body": r.get::<_, String>(3)?,
                "createdAt": r.get::<_, String>(4)?,
                "readAt": r.get::<_, Option<String>>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "notifications": rows }))
}

fn notifications_create(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let recipient_id = get_required_str(params, "recipientId")?;
    let title = get_required_str(params, "title")?;
    let body = get_optional_str(params, "body")?.unwrap_or_default();
    let id = insert_notification(conn, &recipient_id, &title, &body)?;
    feed.publish("notifications", ChangeOp::Insert, &id);
    Ok(json!({ "notificationId": id }))
}

fn notifications_mark_read(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let id = get_required_str(params, "notificationId")?;
    let n = conn
        .execute(
            "UPDATE notifications SET read_at = COALESCE(read_at, ?) WHERE id = ?",
            (now_rfc3339(), &id),
        )
        .map_err(|e| HandlerErr::write("db_update_failed", "notifications", e))?;
    if n == 0 {
        return Err(HandlerErr::not_found("notification not found"));
    }
    feed.publish("notifications", ChangeOp::Update, &id);
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "notifications.list" => Some(with_db(state, req, |c, _, p| notifications_list(c, p))),
        "notifications.create" => Some(with_db(state, req, notifications_create)),
        "notifications.markRead" => Some(with_db(state, req, notifications_mark_read)),
        _ => None,
    }
}
