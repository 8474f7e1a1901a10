use crate::feed::{ChangeFeed, ChangeOp};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::setup::load_rotation;
use crate::ipc::handlers::with_db;
use crate::ipc::params::{
    format_date, get_instant, get_optional_date, get_optional_i64, get_optional_str, get_patch,
    get_required_i64, get_required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::model::ScheduleSlot;
use crate::schedule::{
    find_conflicts, parse_hhmm, parse_weekday, period_contains, rotation_week, valid_week_number,
    weekday_name, Conflict,
};
use crate::store::{self, ScheduleFilter};
use chrono::{Datelike, Local, Weekday};
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

fn weekday_param(raw: &str) -> Result<Weekday, HandlerErr> {
    parse_weekday(raw).ok_or_else(|| HandlerErr::bad_params("dayOfWeek must be monday..sunday"))
}

/// Weeks in the configured rotation.
fn rotation_weeks(conn: &Connection) -> Result<u8, HandlerErr> {
    Ok(load_rotation(conn).map_err(HandlerErr::query)?.weeks)
}

fn week_param(n: i64, weeks: u8) -> Result<u8, HandlerErr> {
    valid_week_number(n, weeks)
        .ok_or_else(|| HandlerErr::bad_params(format!("weekNumber must be 1..{}", weeks)))
}

fn slot_from_params(
    params: &Value,
    id: Option<String>,
    weeks: u8,
) -> Result<ScheduleSlot, HandlerErr> {
    Ok(ScheduleSlot {
        id,
        class_id: get_required_str(params, "classId")?,
        teacher_id: get_required_str(params, "teacherId")?,
        room_id: get_required_str(params, "roomId")?,
        period_id: get_required_str(params, "periodId")?,
        day_of_week: weekday_param(&get_required_str(params, "dayOfWeek")?)?,
        week_number: week_param(get_required_i64(params, "weekNumber")?, weeks)?,
    })
}

fn check_references(conn: &Connection, slot: &ScheduleSlot) -> Result<(), HandlerErr> {
    let refs = [
        ("classes", &slot.class_id, "class not found"),
        ("teachers", &slot.teacher_id, "teacher not found"),
        ("rooms", &slot.room_id, "room not found"),
        ("periods", &slot.period_id, "period not found"),
    ];
    for (table, id, msg) in refs {
        if !store::row_exists(conn, table, id).map_err(HandlerErr::query)? {
            return Err(HandlerErr::not_found(msg));
        }
    }
    Ok(())
}

fn conflicts_for(conn: &Connection, slot: &ScheduleSlot) -> Result<Vec<Conflict>, HandlerErr> {
    let existing = store::all_schedule_slots(conn).map_err(HandlerErr::query)?;
    Ok(find_conflicts(slot, &existing))
}

fn reject_conflicts(conflicts: &[Conflict]) -> Result<(), HandlerErr> {
    if conflicts.is_empty() {
        return Ok(());
    }
    let list: Vec<Value> = conflicts.iter().map(Conflict::to_json).collect();
    Err(
        HandlerErr::new("schedule_conflict", "schedule entry conflicts with existing entries")
            .with_details(json!({ "conflicts": list })),
    )
}

fn schedules_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let weeks = rotation_weeks(conn)?;
    let filter = ScheduleFilter {
        week_number: get_optional_i64(params, "weekNumber")?
            .map(|n| week_param(n, weeks))
            .transpose()?,
        day_of_week: get_optional_str(params, "dayOfWeek")?
            .map(|d| weekday_param(&d))
            .transpose()?,
        teacher_id: get_optional_str(params, "teacherId")?,
        room_id: get_optional_str(params, "roomId")?,
        class_id: get_optional_str(params, "classId")?,
    };
    let entries = store::list_schedule_entries(conn, &filter).map_err(HandlerErr::query)?;
    Ok(json!({ "schedules": entries }))
}

fn schedules_create(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let slot = slot_from_params(params, None, rotation_weeks(conn)?)?;
    check_references(conn, &slot)?;
    reject_conflicts(&conflicts_for(conn, &slot)?)?;

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO class_schedules(id, class_id, teacher_id, room_id, period_id, day_of_week, week_number)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &slot.class_id,
            &slot.teacher_id,
            &slot.room_id,
            &slot.period_id,
            weekday_name(slot.day_of_week),
            slot.week_number as i64,
        ),
    )
    .map_err(|e| HandlerErr::write("db_insert_failed", "class_schedules", e))?;
    feed.publish("class_schedules", ChangeOp::Insert, &id);
    Ok(json!({ "scheduleId": id }))
}

fn schedules_update(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let schedule_id = get_required_str(params, "scheduleId")?;
    let patch = get_patch(params)?;
    let Some(entry) = store::load_schedule_entry(conn, &schedule_id).map_err(HandlerErr::query)?
    else {
        return Err(HandlerErr::not_found("schedule entry not found"));
    };
    let mut slot = entry.slot();
    let weeks = rotation_weeks(conn)?;
    for (k, v) in patch {
        let text = || {
            v.as_str()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a non-empty string", k)))
        };
        match k.as_str() {
            "classId" => slot.class_id = text()?,
            "teacherId" => slot.teacher_id = text()?,
            "roomId" => slot.room_id = text()?,
            "periodId" => slot.period_id = text()?,
            "dayOfWeek" => slot.day_of_week = weekday_param(&text()?)?,
            "weekNumber" => {
                let n = v
                    .as_i64()
                    .ok_or_else(|| HandlerErr::bad_params("weekNumber must be integer"))?;
                slot.week_number = week_param(n, weeks)?;
            }
            _ => return Err(HandlerErr::bad_params(format!("unknown schedule field: {}", k))),
        }
    }
    check_references(conn, &slot)?;
    reject_conflicts(&conflicts_for(conn, &slot)?)?;

    conn.execute(
        "UPDATE class_schedules
         SET class_id = ?, teacher_id = ?, room_id = ?, period_id = ?, day_of_week = ?, week_number = ?
         WHERE id = ?",
        (
            &slot.class_id,
            &slot.teacher_id,
            &slot.room_id,
            &slot.period_id,
            weekday_name(slot.day_of_week),
            slot.week_number as i64,
            &schedule_id,
        ),
    )
    .map_err(|e| HandlerErr::write("db_update_failed", "class_schedules", e))?;
    feed.publish("class_schedules", ChangeOp::Update, &schedule_id);
    Ok(json!({ "ok": true }))
}

fn schedules_delete(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let schedule_id = get_required_str(params, "scheduleId")?;
    let records: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM attendance_records WHERE schedule_id = ?",
            [&schedule_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;
    if records > 0 {
        return Err(
            HandlerErr::new("in_use", "schedule entry has attendance records")
                .with_details(json!({ "attendanceCount": records })),
        );
    }
    let n = conn
        .execute("DELETE FROM class_schedules WHERE id = ?", [&schedule_id])
        .map_err(|e| HandlerErr::write("db_delete_failed", "class_schedules", e))?;
    if n == 0 {
        return Err(HandlerErr::not_found("schedule entry not found"));
    }
    feed.publish("class_schedules", ChangeOp::Delete, &schedule_id);
    Ok(json!({ "ok": true }))
}

fn schedules_check_conflicts(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let slot = slot_from_params(
        params,
        get_optional_str(params, "scheduleId")?,
        rotation_weeks(conn)?,
    )?;
    let conflicts = conflicts_for(conn, &slot)?;
    let list: Vec<Value> = conflicts.iter().map(Conflict::to_json).collect();
    Ok(json!({ "ok": list.is_empty(), "conflicts": list }))
}

/// A teacher's entries for one day of the rotation, ordered by period.
fn schedules_today(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let date = get_optional_date(params, "date")?.unwrap_or_else(|| Local::now().date_naive());
    let rotation = load_rotation(conn).map_err(HandlerErr::query)?;
    let week = match get_optional_i64(params, "weekNumber")? {
        Some(n) => week_param(n, rotation.weeks)?,
        None => rotation_week(date, rotation.start_date, rotation.weeks),
    };
    let entries = store::list_schedule_entries(
        conn,
        &ScheduleFilter {
            week_number: Some(week),
            day_of_week: Some(date.weekday()),
            teacher_id: Some(teacher_id),
            ..ScheduleFilter::default()
        },
    )
    .map_err(HandlerErr::query)?;
    Ok(json!({
        "date": format_date(date),
        "dayOfWeek": weekday_name(date.weekday()),
        "weekNumber": week,
        "schedules": entries
    }))
}

/// The entry running at `at` in a room or for a teacher, if any.
fn schedules_current(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let room_id = get_optional_str(params, "roomId")?;
    let teacher_id = get_optional_str(params, "teacherId")?;
    if room_id.is_none() && teacher_id.is_none() {
        return Err(HandlerErr::bad_params("roomId or teacherId is required"));
    }
    let at = get_instant(params, "at")?;
    let date = at.date_naive();
    let rotation = load_rotation(conn).map_err(HandlerErr::query)?;
    let week = rotation_week(date, rotation.start_date, rotation.weeks);
    let entries = store::list_schedule_entries(
        conn,
        &ScheduleFilter {
            week_number: Some(week),
            day_of_week: Some(date.weekday()),
            teacher_id,
            room_id,
            ..ScheduleFilter::default()
        },
    )
    .map_err(HandlerErr::query)?;
    let now = at.time();
    let current = entries.into_iter().find(|e| {
        match (parse_hhmm(&e.start_time), parse_hhmm(&e.end_time)) {
            (Some(start), Some(end)) => period_contains(start, end, now),
            _ => false,
        }
    });
    debug!(week, found = current.is_some(), "current schedule lookup");
    Ok(json!({
        "date": format_date(date),
        "weekNumber": week,
        "schedule": current
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedules.list" => Some(with_db(state, req, |c, _, p| schedules_list(c, p))),
        "schedules.create" => Some(with_db(state, req, schedules_create)),
        "schedules.update" => Some(with_db(state, req, schedules_update)),
        "schedules.delete" => Some(with_db(state, req, schedules_delete)),
        "schedules.checkConflicts" => {
            Some(with_db(state, req, |c, _, p| schedules_check_conflicts(c, p)))
        }
        "schedules.today" => Some(with_db(state, req, |c, _, p| schedules_today(c, p))),
        "schedules.current" => Some(with_db(state, req, |c, _, p| schedules_current(c, p))),
        _ => None,
    }
}
