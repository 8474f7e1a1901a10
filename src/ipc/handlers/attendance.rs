use crate::feed::{ChangeFeed, ChangeOp};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::notifications::notify_guardians;
use crate::ipc::handlers::setup::notify_guardians_enabled;
use crate::ipc::handlers::with_db;
use crate::ipc::params::{
    format_date, get_instant, get_optional_date, get_optional_str, get_required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{AttendanceType, RecordStatus};
use crate::scan::{record_attendance, validate_scan, ScanContext, SessionTarget, Verdict};
use crate::store::{self, AttendanceFilter, SqliteStore};
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::{info, warn};

/// Loads the current state of a scan target. A deleted row is `not_found`;
/// an inactive bus route takes no scans.
pub(crate) fn load_context(
    conn: &Connection,
    target: &SessionTarget,
) -> Result<ScanContext, HandlerErr> {
    match target {
        SessionTarget::Schedule(sid) => {
            let Some(schedule) = store::load_schedule_entry(conn, sid).map_err(HandlerErr::query)?
            else {
                return Err(HandlerErr::not_found("schedule entry not found"));
            };
            Ok(ScanContext::Classroom { schedule })
        }
        SessionTarget::BusRoute(rid) => {
            let Some(route) = store::load_bus_route(conn, rid).map_err(HandlerErr::query)? else {
                return Err(HandlerErr::not_found("bus route not found"));
            };
            if route.status != RecordStatus::Active {
                return Err(HandlerErr::bad_params("bus route is inactive")
                    .with_details(json!({ "busRouteId": rid })));
            }
            Ok(ScanContext::Bus { route })
        }
    }
}

/// Reads the scan target from `scheduleId` or `busRouteId`. When `type` is
/// given it must agree with the id supplied.
pub(crate) fn target_param(params: &Value) -> Result<SessionTarget, HandlerErr> {
    let kind = get_optional_str(params, "type")?
        .map(|t| {
            AttendanceType::parse(&t)
                .ok_or_else(|| HandlerErr::bad_params("type must be one of: classroom, bus"))
        })
        .transpose()?;
    let schedule_id = get_optional_str(params, "scheduleId")?;
    let route_id = get_optional_str(params, "busRouteId")?;

    match (kind, schedule_id, route_id) {
        (None | Some(AttendanceType::Classroom), Some(sid), None) => {
            Ok(SessionTarget::Schedule(sid))
        }
        (None | Some(AttendanceType::Bus), None, Some(rid)) => Ok(SessionTarget::BusRoute(rid)),
        (Some(AttendanceType::Classroom), _, _) => {
            Err(HandlerErr::bad_params("classroom scans need scheduleId only"))
        }
        (Some(AttendanceType::Bus), _, _) => {
            Err(HandlerErr::bad_params("bus scans need busRouteId only"))
        }
        (None, _, _) => Err(HandlerErr::bad_params(
            "exactly one of scheduleId or busRouteId is required",
        )),
    }
}

pub(crate) fn resolve_context(conn: &Connection, params: &Value) -> Result<ScanContext, HandlerErr> {
    load_context(conn, &target_param(params)?)
}

fn attendance_validate(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let token = get_required_str(params, "token")?;
    let ctx = resolve_context(conn, params)?;
    let verdict = validate_scan(&SqliteStore::new(conn), &token, &ctx)
        .map_err(HandlerErr::query)?;
    Ok(verdict.to_json())
}

/// Validates then writes; an invalid scan is refused without writing.
fn attendance_record(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let token = get_required_str(params, "token")?;
    let recorded_by = get_required_str(params, "recordedBy")?;
    let at = get_instant(params, "at")?;
    let ctx = resolve_context(conn, params)?;
    let store = SqliteStore::new(conn);

    let verdict = validate_scan(&store, &token, &ctx).map_err(HandlerErr::query)?;
    let (student_id, display_name) = match verdict {
        Verdict::Valid {
            student_id,
            display_name,
        } => (student_id, display_name),
        Verdict::Invalid { .. } => {
            info!(verdict = %verdict.to_json(), "attendance refused");
            let details = verdict.to_json();
            let reason = details
                .get("reason")
                .and_then(|v| v.as_str())
                .unwrap_or("invalid scan")
                .to_string();
            return Err(HandlerErr::new("scan_rejected", reason).with_details(details));
        }
    };

    let record = record_attendance(&store, &student_id, &ctx, &recorded_by, at)
        .map_err(|e| HandlerErr::write("db_insert_failed", "attendance_records", format!("{e:#}")))?;
    feed.publish("attendance_records", ChangeOp::Insert, &record.id);
    info!(
        student_id = %student_id,
        attendance_type = record.attendance_type.as_str(),
        "attendance recorded"
    );

    let mut notified = 0;
    if notify_guardians_enabled(conn).map_err(HandlerErr::query)? {
        match notify_guardians(conn, feed, &student_id, &display_name, &ctx) {
            Ok(n) => notified = n,
            // The record already exists; a notification failure does not undo it.
            Err(e) => warn!(code = e.code, error = %e.message, "guardian notification failed"),
        }
    }

    Ok(json!({
        "record": record,
        "displayName": display_name,
        "guardiansNotified": notified
    }))
}

fn attendance_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let filter = AttendanceFilter {
        date: get_optional_date(params, "date")?.map(format_date),
        from: get_optional_date(params, "from")?.map(format_date),
        to: get_optional_date(params, "to")?.map(format_date),
        attendance_type: get_optional_str(params, "type")?
            .map(|t| {
                AttendanceType::parse(&t)
                    .ok_or_else(|| HandlerErr::bad_params("type must be one of: classroom, bus"))
            })
            .transpose()?,
        class_id: get_optional_str(params, "classId")?,
        bus_route_id: get_optional_str(params, "busRouteId")?,
        student_id: get_optional_str(params, "studentId")?,
    };
    let records = store::list_attendance(conn, &filter).map_err(HandlerErr::query)?;
    Ok(json!({ "records": records }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.validate" => Some(with_db(state, req, |c, _, p| attendance_validate(c, p))),
        "attendance.record" => Some(with_db(state, req, attendance_record)),
        "attendance.list" => Some(with_db(state, req, |c, _, p| attendance_list(c, p))),
        _ => None,
    }
}
