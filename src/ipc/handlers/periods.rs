use crate::feed::{ChangeFeed, ChangeOp};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::rooms::schedule_refs;
use crate::ipc::handlers::with_db;
use crate::ipc::params::{get_patch, get_required_i64, get_required_str};
use crate::ipc::types::{AppState, Request};
use crate::schedule::parse_hhmm;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

struct Period {
    number: i64,
    start: String,
    end: String,
}

impl Period {
    /// Normalises both times to `HH:MM` and checks their order.
    fn validated(mut self) -> Result<Self, HandlerErr> {
        if self.number < 1 {
            return Err(HandlerErr::bad_params("periodNumber must be >= 1"));
        }
        let start = parse_hhmm(&self.start)
            .ok_or_else(|| HandlerErr::bad_params("startTime must be HH:MM"))?;
        let end = parse_hhmm(&self.end)
            .ok_or_else(|| HandlerErr::bad_params("endTime must be HH:MM"))?;
        if start >= end {
            return Err(HandlerErr::bad_params("startTime must be before endTime"));
        }
        self.start = start.format("%H:%M").to_string();
        self.end = end.format("%H:%M").to_string();
        Ok(self)
    }
}

fn map_unique(e: rusqlite::Error, code: &'static str) -> HandlerErr {
    if let rusqlite::Error::SqliteFailure(f, _) = &e {
        if f.code == rusqlite::ErrorCode::ConstraintViolation {
            return HandlerErr::bad_params("periodNumber already exists");
        }
    }
    HandlerErr::write(code, "periods", e)
}

fn periods_list(conn: &Connection) -> Result<Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, period_number, start_time, end_time FROM periods ORDER BY period_number")
        .map_err(HandlerErr::query)?;
    let periods = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "periodNumber": r.get::<_, i64>(1)?,
                "startTime": r.get::<_, String>(2)?,
                "endTime": r.get::<_, String>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "periods": periods }))
}

fn periods_create(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let p = Period {
        number: get_required_i64(params, "periodNumber")?,
        start: get_required_str(params, "startTime")?,
        end: get_required_str(params, "endTime")?,
    }
    .validated()?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO periods(id, period_number, start_time, end_time) VALUES(?, ?, ?, ?)",
        (&id, p.number, &p.start, &p.end),
    )
    .map_err(|e| map_unique(e, "db_insert_failed"))?;
    feed.publish("periods", ChangeOp::Insert, &id);
    Ok(json!({ "periodId": id }))
}

fn periods_update(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let period_id = get_required_str(params, "periodId")?;
    let patch = get_patch(params)?;
    let Some(mut p) = conn
        .query_row(
            "SELECT period_number, start_time, end_time FROM periods WHERE id = ?",
            [&period_id],
            |r| {
                Ok(Period {
                    number: r.get(0)?,
                    start: r.get(1)?,
                    end: r.get(2)?,
                })
            },
        )
        .optional()
        .map_err(HandlerErr::query)?
    else {
        return Err(HandlerErr::not_found("period not found"));
    };
    for (k, v) in patch {
        match k.as_str() {
            "periodNumber" => {
                p.number = v
                    .as_i64()
                    .ok_or_else(|| HandlerErr::bad_params("periodNumber must be integer"))?
            }
            "startTime" | "endTime" => {
                let s = v
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| HandlerErr::bad_params(format!("{} must be HH:MM", k)))?;
                if k == "startTime" {
                    p.start = s;
                } else {
                    p.end = s;
                }
            }
            _ => return Err(HandlerErr::bad_params(format!("unknown period field: {}", k))),
        }
    }
    let p = p.validated()?;
    conn.execute(
        "UPDATE periods SET period_number = ?, start_time = ?, end_time = ? WHERE id = ?",
        (p.number, &p.start, &p.end, &period_id),
    )
    .map_err(|e| map_unique(e, "db_update_failed"))?;
    feed.publish("periods", ChangeOp::Update, &period_id);
    Ok(json!({ "ok": true }))
}

fn periods_delete(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let period_id = get_required_str(params, "periodId")?;
    let refs = schedule_refs(conn, "period_id", &period_id)?;
    if refs > 0 {
        return Err(
            HandlerErr::new("in_use", "period is referenced by schedule entries")
                .with_details(json!({ "scheduleCount": refs })),
        );
    }
    let n = conn
        .execute("DELETE FROM periods WHERE id = ?", [&period_id])
        .map_err(|e| HandlerErr::write("db_delete_failed", "periods", e))?;
    if n == 0 {
        return Err(HandlerErr::not_found("period not found"));
    }
    feed.publish("periods", ChangeOp::Delete, &period_id);
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "periods.list" => Some(with_db(state, req, |c, _, _| periods_list(c))),
        "periods.create" => Some(with_db(state, req, periods_create)),
        "periods.update" => Some(with_db(state, req, periods_update)),
        "periods.delete" => Some(with_db(state, req, periods_delete)),
        _ => None,
    }
}
