use crate::feed::{ChangeFeed, ChangeOp};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::with_db;
use crate::ipc::params::{get_optional_i64, get_optional_str, get_patch, get_required_str};
use crate::ipc::types::{AppState, Request};
use crate::rooms_csv::{self, RoomInput};
use crate::store;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

fn check_room(room: &RoomInput) -> Result<(), HandlerErr> {
    let errors = rooms_csv::validate_room(room);
    if errors.is_empty() {
        return Ok(());
    }
    Err(
        HandlerErr::new("validation_failed", errors.join("; "))
            .with_details(json!({ "errors": errors })),
    )
}

/// Number of schedule entries pointing at `id` through `column`.
pub(crate) fn schedule_refs(conn: &Connection, column: &str, id: &str) -> Result<i64, HandlerErr> {
    let sql = format!("SELECT COUNT(*) FROM class_schedules WHERE {} = ?", column);
    conn.query_row(&sql, [id], |r| r.get(0))
        .map_err(HandlerErr::query)
}

fn rooms_list(conn: &Connection) -> Result<Value, HandlerErr> {
    let rooms = store::list_rooms(conn).map_err(HandlerErr::query)?;
    Ok(json!({ "rooms": rooms }))
}

fn rooms_create(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let room = RoomInput {
        name: get_required_str(params, "name")?,
        building: get_optional_str(params, "building")?,
        floor: get_optional_i64(params, "floor")?,
        capacity: get_optional_i64(params, "capacity")?,
    };
    check_room(&room)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO rooms(id, name, building, floor, capacity) VALUES(?, ?, ?, ?, ?)",
        (&id, &room.name, &room.building, room.floor, room.capacity),
    )
    .map_err(|e| HandlerErr::write("db_insert_failed", "rooms", e))?;
    feed.publish("rooms", ChangeOp::Insert, &id);
    Ok(json!({ "roomId": id }))
}

fn rooms_update(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let room_id = get_required_str(params, "roomId")?;
    let patch = get_patch(params)?;
    let Some(existing) = store::load_room(conn, &room_id).map_err(HandlerErr::query)? else {
        return Err(HandlerErr::not_found("room not found"));
    };
    let mut room = RoomInput {
        name: existing.name,
        building: existing.building,
        floor: existing.floor,
        capacity: existing.capacity,
    };
    for (k, v) in patch {
        let int = |v: &Value| -> Result<Option<i64>, HandlerErr> {
            match v {
                Value::Null => Ok(None),
                _ => v
                    .as_i64()
                    .map(Some)
                    .ok_or_else(|| HandlerErr::bad_params(format!("{} must be integer or null", k))),
            }
        };
        match k.as_str() {
            "name" => {
                room.name = v
                    .as_str()
                    .map(|s| s.trim().to_string())
                    .ok_or_else(|| HandlerErr::bad_params("name must be a string"))?;
            }
            "building" => {
                room.building = match v {
                    Value::Null => None,
                    Value::String(s) if s.trim().is_empty() => None,
                    Value::String(s) => Some(s.trim().to_string()),
                    _ => return Err(HandlerErr::bad_params("building must be string or null")),
                };
            }
            "floor" => room.floor = int(v)?,
            "capacity" => room.capacity = int(v)?,
            _ => return Err(HandlerErr::bad_params(format!("unknown room field: {}", k))),
        }
    }
    check_room(&room)?;
    conn.execute(
        "UPDATE rooms SET name = ?, building = ?, floor = ?, capacity = ? WHERE id = ?",
        (&room.name, &room.building, room.floor, room.capacity, &room_id),
    )
    .map_err(|e| HandlerErr::write("db_update_failed", "rooms", e))?;
    feed.publish("rooms", ChangeOp::Update, &room_id);
    Ok(json!({ "ok": true }))
}

fn rooms_delete(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let room_id = get_required_str(params, "roomId")?;
    let refs = schedule_refs(conn, "room_id", &room_id)?;
    if refs > 0 {
        return Err(HandlerErr::new(
            "in_use",
            "room is referenced by schedule entries",
        )
        .with_details(json!({ "scheduleCount": refs })));
    }
    let n = conn
        .execute("DELETE FROM rooms WHERE id = ?", [&room_id])
        .map_err(|e| HandlerErr::write("db_delete_failed", "rooms", e))?;
    if n == 0 {
        return Err(HandlerErr::not_found("room not found"));
    }
    feed.publish("rooms", ChangeOp::Delete, &room_id);
    Ok(json!({ "ok": true }))
}

/// All-or-nothing: any row error rejects the whole file.
fn rooms_import_csv(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let Some(text) = params.get("csv").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::bad_params("missing csv"));
    };
    let parsed = rooms_csv::parse_rooms_csv(text)
        .map_err(|e| HandlerErr::new("validation_failed", format!("{e:#}")))?;
    if !parsed.errors.is_empty() {
        return Err(HandlerErr::new(
            "validation_failed",
            format!("{} row error(s) in CSV", parsed.errors.len()),
        )
        .with_details(json!({ "errors": parsed.errors })));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let mut ids = Vec::with_capacity(parsed.rooms.len());
    for room in &parsed.rooms {
        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO rooms(id, name, building, floor, capacity) VALUES(?, ?, ?, ?, ?)",
            (&id, &room.name, &room.building, room.floor, room.capacity),
        )
        .map_err(|e| {
            HandlerErr::write("db_insert_failed", "rooms", e)
                .with_details(json!({ "table": "rooms", "name": room.name }))
        })?;
        ids.push(id);
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    for id in &ids {
        feed.publish("rooms", ChangeOp::Insert, id);
    }
    info!(inserted = ids.len(), skipped = parsed.skipped, "rooms imported");
    Ok(json!({ "inserted": ids.len(), "skipped": parsed.skipped }))
}

fn rooms_export_csv(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let rooms = store::list_rooms(conn).map_err(HandlerErr::query)?;
    let text = rooms_csv::write_rooms_csv(&rooms)
        .map_err(|e| HandlerErr::new("io_failed", format!("{e:#}")))?;
    match get_optional_str(params, "outPath")? {
        Some(out) => {
            let path = PathBuf::from(&out);
            std::fs::write(&path, text.as_bytes())
                .map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;
            info!(path = %path.display(), rows = rooms.len(), "rooms exported");
            Ok(json!({ "outPath": out, "rowsExported": rooms.len() }))
        }
        None => Ok(json!({ "csv": text, "rowsExported": rooms.len() })),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "rooms.list" => Some(with_db(state, req, |c, _, _| rooms_list(c))),
        "rooms.create" => Some(with_db(state, req, rooms_create)),
        "rooms.update" => Some(with_db(state, req, rooms_update)),
        "rooms.delete" => Some(with_db(state, req, rooms_delete)),
        "rooms.importCsv" => Some(with_db(state, req, rooms_import_csv)),
        "rooms.exportCsv" => Some(with_db(state, req, |c, _, p| rooms_export_csv(c, p))),
        _ => None,
    }
}
