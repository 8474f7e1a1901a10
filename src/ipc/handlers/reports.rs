use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::with_db;
use crate::ipc::params::{format_date, get_optional_date, get_optional_str, get_required_str, parse_date};
use crate::ipc::types::{AppState, Request};
use crate::model::{class_display_name, AttendanceType};
use chrono::Local;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

fn count(conn: &Connection, sql: &str) -> Result<i64, HandlerErr> {
    conn.query_row(sql, [], |r| r.get(0)).map_err(HandlerErr::query)
}

fn reports_dashboard(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let date = get_optional_date(params, "date")?.unwrap_or_else(|| Local::now().date_naive());
    let date_str = format_date(date);
    let (classroom, bus, students_present): (i64, i64, i64) = conn
        .query_row(
            "SELECT
               COALESCE(SUM(CASE WHEN attendance_type = 'classroom' THEN 1 ELSE 0 END), 0),
               COALESCE(SUM(CASE WHEN attendance_type = 'bus' THEN 1 ELSE 0 END), 0),
               COUNT(DISTINCT student_id)
             FROM attendance_records WHERE date = ?",
            [&date_str],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .map_err(HandlerErr::query)?;
    Ok(json!({
        "date": date_str,
        "counts": {
            "students": count(conn, "SELECT COUNT(*) FROM students WHERE status = 'active'")?,
            "inactiveStudents": count(conn, "SELECT COUNT(*) FROM students WHERE status = 'inactive'")?,
            "teachers": count(conn, "SELECT COUNT(*) FROM teachers WHERE status = 'active'")?,
            "classes": count(conn, "SELECT COUNT(*) FROM classes")?,
            "rooms": count(conn, "SELECT COUNT(*) FROM rooms")?,
            "busRoutes": count(conn, "SELECT COUNT(*) FROM bus_routes WHERE status = 'active'")?,
            "scheduleEntries": count(conn, "SELECT COUNT(*) FROM class_schedules")?,
        },
        "attendance": {
            "classroomScans": classroom,
            "busScans": bus,
            "studentsPresent": students_present,
        }
    }))
}

/// Per-day scan counts over an inclusive date range.
fn reports_attendance_summary(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let from = parse_date(&get_required_str(params, "from")?, "from")?;
    let to = parse_date(&get_required_str(params, "to")?, "to")?;
    if from > to {
        return Err(HandlerErr::bad_params("from must not be after to"));
    }
    let kind = get_optional_str(params, "type")?
        .map(|t| {
            AttendanceType::parse(&t)
                .ok_or_else(|| HandlerErr::bad_params("type must be one of: classroom, bus"))
        })
        .transpose()?;
    let mut stmt = conn
        .prepare(
            "SELECT date, COUNT(*), COUNT(DISTINCT student_id)
             FROM attendance_records
             WHERE date >= ?1 AND date <= ?2 AND (?3 IS NULL OR attendance_type = ?3)
             GROUP BY date
             ORDER BY date",
        )
        .map_err(HandlerErr::query)?;
    let days = stmt
        .query_map(
            (format_date(from), format_date(to), kind.map(AttendanceType::as_str)),
            |r| {
                Ok(json!({
                    "date": r.get::<_, String>(0)?,
                    "scans": r.get::<_, i64>(1)?,
                    "uniqueStudents": r.get::<_, i64>(2)?,
                }))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    let total: i64 = days
        .iter()
        .filter_map(|d| d.get("scans").and_then(|v| v.as_i64()))
        .sum();
    Ok(json!({
        "from": format_date(from),
        "to": format_date(to),
        "type": kind.map(AttendanceType::as_str),
        "totalScans": total,
        "days": days
    }))
}

fn reports_class_roster(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = parse_date(&get_required_str(params, "date")?, "date")?;
    let date_str = format_date(date);
    let Some(class_name) = conn
        .query_row(
            "SELECT grade, section, subject FROM classes WHERE id = ?",
            [&class_id],
            |r| {
                let grade: i64 = r.get(0)?;
                let section: String = r.get(1)?;
                let subject: String = r.get(2)?;
                Ok(class_display_name(grade, &section, &subject))
            },
        )
        .optional()
        .map_err(HandlerErr::query)?
    else {
        return Err(HandlerErr::not_found("class not found"));
    };

    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.first_name, s.last_name, s.code, s.status,
                    (SELECT MIN(ar.scan_time) FROM attendance_records ar
                      WHERE ar.student_id = s.id AND ar.class_id = ?1 AND ar.date = ?2)
             FROM class_enrollments ce
             JOIN students s ON s.id = ce.student_id
             WHERE ce.class_id = ?1
             ORDER BY s.last_name, s.first_name",
        )
        .map_err(HandlerErr::query)?;
    let students = stmt
        .query_map((&class_id, &date_str), |r| {
            let first: String = r.get(1)?;
            let last: String = r.get(2)?;
            let first_scan: Option<String> = r.get(5)?;
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "displayName": format!("{} {}", first, last),
                "code": r.get::<_, String>(3)?,
                "status": r.get::<_, String>(4)?,
                "present": first_scan.is_some(),
                "firstScanTime": first_scan,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    let present = students
        .iter()
        .filter(|s| s.get("present").and_then(|v| v.as_bool()) == Some(true))
        .count();
    Ok(json!({
        "classId": class_id,
        "className": class_name,
        "date": date_str,
        "enrolled": students.len(),
        "present": present,
        "absent": students.len() - present,
        "students": students
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.dashboard" => Some(with_db(state, req, |c, _, p| reports_dashboard(c, p))),
        "reports.attendanceSummary" => {
            Some(with_db(state, req, |c, _, p| reports_attendance_summary(c, p)))
        }
        "reports.classRoster" => Some(with_db(state, req, |c, _, p| reports_class_roster(c, p))),
        _ => None,
    }
}
