//! SQLite-backed reads shared by the handlers, and the `AttendanceStore`
//! implementation used by the scan flow.

use crate::model::{
    class_display_name, AttendanceRecord, AttendanceType, BusRoute, NewAttendance, RecordStatus,
    Room, ScheduleEntry, ScheduleSlot, Student,
};
use crate::scan::AttendanceStore;
use crate::schedule::{parse_weekday, weekday_name};
use chrono::{Datelike, Weekday};
use rusqlite::types::{Type, Value};
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

const STUDENT_SELECT: &str = "SELECT
       s.id, s.first_name, s.last_name, s.code, s.grade, s.section, s.status,
       (SELECT ba.route_id FROM bus_assignments ba
         WHERE ba.student_id = s.id AND ba.status = 'active'
         ORDER BY ba.assigned_at DESC LIMIT 1) AS bus_route_id
     FROM students s";

const SCHEDULE_SELECT: &str = "SELECT
       cs.id, cs.class_id, c.grade, c.section, c.subject,
       cs.teacher_id, t.first_name, t.last_name,
       cs.room_id, r.name,
       cs.period_id, p.period_number, p.start_time, p.end_time,
       cs.day_of_week, cs.week_number
     FROM class_schedules cs
     JOIN classes c ON c.id = cs.class_id
     JOIN teachers t ON t.id = cs.teacher_id
     JOIN rooms r ON r.id = cs.room_id
     JOIN periods p ON p.id = cs.period_id";

const ATTENDANCE_SELECT: &str = "SELECT
       id, student_id, schedule_id, class_id, bus_route_id, recorded_by,
       status, attendance_type, date, scan_time
     FROM attendance_records";

fn status_col(row: &Row, idx: usize) -> rusqlite::Result<RecordStatus> {
    let raw: String = row.get(idx)?;
    RecordStatus::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown status {:?}", raw).into(),
        )
    })
}

pub fn student_from_row(row: &Row) -> rusqlite::Result<Student> {
    Ok(Student {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        code: row.get(3)?,
        grade: row.get(4)?,
        section: row.get(5)?,
        status: status_col(row, 6)?,
        bus_route_id: row.get(7)?,
    })
}

fn schedule_from_row(row: &Row) -> rusqlite::Result<ScheduleEntry> {
    let grade: i64 = row.get(2)?;
    let section: String = row.get(3)?;
    let subject: String = row.get(4)?;
    let t_first: String = row.get(6)?;
    let t_last: String = row.get(7)?;
    let day_raw: String = row.get(14)?;
    let day_of_week = parse_weekday(&day_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            14,
            Type::Text,
            format!("unknown weekday {:?}", day_raw).into(),
        )
    })?;
    let week: i64 = row.get(15)?;
    Ok(ScheduleEntry {
        id: row.get(0)?,
        class_id: row.get(1)?,
        class_name: class_display_name(grade, &section, &subject),
        teacher_id: row.get(5)?,
        teacher_name: format!("{} {}", t_first, t_last),
        room_id: row.get(8)?,
        room_name: row.get(9)?,
        period_id: row.get(10)?,
        period_number: row.get(11)?,
        start_time: row.get(12)?,
        end_time: row.get(13)?,
        day_of_week,
        week_number: week.clamp(0, u8::MAX as i64) as u8,
    })
}

fn attendance_from_row(row: &Row) -> rusqlite::Result<AttendanceRecord> {
    let kind: String = row.get(7)?;
    let attendance_type = AttendanceType::parse(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            Type::Text,
            format!("unknown attendance type {:?}", kind).into(),
        )
    })?;
    Ok(AttendanceRecord {
        id: row.get(0)?,
        student_id: row.get(1)?,
        schedule_id: row.get(2)?,
        class_id: row.get(3)?,
        bus_route_id: row.get(4)?,
        recorded_by: row.get(5)?,
        status: row.get(6)?,
        attendance_type,
        date: row.get(8)?,
        scan_time: row.get(9)?,
    })
}

pub fn load_student(conn: &Connection, student_id: &str) -> rusqlite::Result<Option<Student>> {
    conn.query_row(
        &format!("{} WHERE s.id = ?", STUDENT_SELECT),
        [student_id],
        student_from_row,
    )
    .optional()
}

#[derive(Debug, Default)]
pub struct StudentFilter {
    pub grade: Option<i64>,
    pub section: Option<String>,
    pub status: Option<RecordStatus>,
    pub query: Option<String>,
}

pub fn list_students(conn: &Connection, filter: &StudentFilter) -> rusqlite::Result<Vec<Student>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut params: Vec<Value> = Vec::new();
    if let Some(g) = filter.grade {
        clauses.push("s.grade = ?");
        params.push(Value::Integer(g));
    }
    if let Some(sec) = &filter.section {
        clauses.push("s.section = ?");
        params.push(Value::Text(sec.clone()));
    }
    if let Some(st) = filter.status {
        clauses.push("s.status = ?");
        params.push(Value::Text(st.as_str().to_string()));
    }
    if let Some(q) = &filter.query {
        clauses.push("(s.first_name LIKE ? OR s.last_name LIKE ? OR s.code LIKE ?)");
        let pat = format!("%{}%", q);
        for _ in 0..3 {
            params.push(Value::Text(pat.clone()));
        }
    }
    let mut sql = STUDENT_SELECT.to_string();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY s.last_name, s.first_name, s.id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params), student_from_row)?
        .collect::<Result<Vec<_>, _>>();
    rows
}

pub fn load_schedule_entry(
    conn: &Connection,
    schedule_id: &str,
) -> rusqlite::Result<Option<ScheduleEntry>> {
    conn.query_row(
        &format!("{} WHERE cs.id = ?", SCHEDULE_SELECT),
        [schedule_id],
        schedule_from_row,
    )
    .optional()
}

#[derive(Debug, Default)]
pub struct ScheduleFilter {
    pub week_number: Option<u8>,
    pub day_of_week: Option<Weekday>,
    pub teacher_id: Option<String>,
    pub room_id: Option<String>,
    pub class_id: Option<String>,
}

/// Ordered by week, weekday, then period number.
pub fn list_schedule_entries(
    conn: &Connection,
    filter: &ScheduleFilter,
) -> rusqlite::Result<Vec<ScheduleEntry>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut params: Vec<Value> = Vec::new();
    if let Some(w) = filter.week_number {
        clauses.push("cs.week_number = ?");
        params.push(Value::Integer(w as i64));
    }
    if let Some(d) = filter.day_of_week {
        clauses.push("cs.day_of_week = ?");
        params.push(Value::Text(weekday_name(d).to_string()));
    }
    if let Some(t) = &filter.teacher_id {
        clauses.push("cs.teacher_id = ?");
        params.push(Value::Text(t.clone()));
    }
    if let Some(r) = &filter.room_id {
        clauses.push("cs.room_id = ?");
        params.push(Value::Text(r.clone()));
    }
    if let Some(c) = &filter.class_id {
        clauses.push("cs.class_id = ?");
        params.push(Value::Text(c.clone()));
    }
    let mut sql = SCHEDULE_SELECT.to_string();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    let mut stmt = conn.prepare(&sql)?;
    let mut entries = stmt
        .query_map(params_from_iter(params), schedule_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort_by(|a, b| {
        (
            a.week_number,
            a.day_of_week.num_days_from_monday(),
            a.period_number,
        )
            .cmp(&(
                b.week_number,
                b.day_of_week.num_days_from_monday(),
                b.period_number,
            ))
    });
    Ok(entries)
}

/// Raw slots of every entry, including ones whose joined rows are gone.
pub fn all_schedule_slots(conn: &Connection) -> rusqlite::Result<Vec<ScheduleSlot>> {
    let mut stmt = conn.prepare(
        "SELECT id, class_id, teacher_id, room_id, period_id, day_of_week, week_number
         FROM class_schedules",
    )?;
    let rows = stmt
        .query_map([], |r| {
            let day_raw: String = r.get(5)?;
            let week: i64 = r.get(6)?;
            Ok(ScheduleSlot {
                id: Some(r.get(0)?),
                class_id: r.get(1)?,
                teacher_id: r.get(2)?,
                room_id: r.get(3)?,
                period_id: r.get(4)?,
                day_of_week: parse_weekday(&day_raw).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        5,
                        Type::Text,
                        format!("unknown weekday {:?}", day_raw).into(),
                    )
                })?,
                week_number: week.clamp(0, u8::MAX as i64) as u8,
            })
        })?
        .collect::<Result<Vec<_>, _>>();
    rows
}

pub fn load_bus_route(conn: &Connection, route_id: &str) -> rusqlite::Result<Option<BusRoute>> {
    conn.query_row(
        "SELECT id, name, driver_name, status FROM bus_routes WHERE id = ?",
        [route_id],
        |r| {
            Ok(BusRoute {
                id: r.get(0)?,
                name: r.get(1)?,
                driver_name: r.get(2)?,
                status: status_col(r, 3)?,
            })
        },
    )
    .optional()
}

pub fn list_bus_routes(conn: &Connection) -> rusqlite::Result<Vec<BusRoute>> {
    let mut stmt =
        conn.prepare("SELECT id, name, driver_name, status FROM bus_routes ORDER BY name, id")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(BusRoute {
                id: r.get(0)?,
                name: r.get(1)?,
                driver_name: r.get(2)?,
                status: status_col(r, 3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>();
    rows
}

fn room_from_row(r: &Row) -> rusqlite::Result<Room> {
    Ok(Room {
        id: r.get(0)?,
        name: r.get(1)?,
        building: r.get(2)?,
        floor: r.get(3)?,
        capacity: r.get(4)?,
    })
}

pub fn load_room(conn: &Connection, room_id: &str) -> rusqlite::Result<Option<Room>> {
    conn.query_row(
        "SELECT id, name, building, floor, capacity FROM rooms WHERE id = ?",
        [room_id],
        room_from_row,
    )
    .optional()
}

pub fn list_rooms(conn: &Connection) -> rusqlite::Result<Vec<Room>> {
    let mut stmt =
        conn.prepare("SELECT id, name, building, floor, capacity FROM rooms ORDER BY name")?;
    let rows = stmt
        .query_map([], room_from_row)?
        .collect::<Result<Vec<_>, _>>();
    rows
}

pub fn row_exists(conn: &Connection, table: &str, id: &str) -> rusqlite::Result<bool> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    conn.query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
}

#[derive(Debug, Default)]
pub struct AttendanceFilter {
    pub date: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub attendance_type: Option<AttendanceType>,
    pub class_id: Option<String>,
    pub bus_route_id: Option<String>,
    pub student_id: Option<String>,
}

pub fn list_attendance(
    conn: &Connection,
    filter: &AttendanceFilter,
) -> rusqlite::Result<Vec<AttendanceRecord>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut params: Vec<Value> = Vec::new();
    let text_filters = [
        ("date = ?", &filter.date),
        ("date >= ?", &filter.from),
        ("date <= ?", &filter.to),
        ("class_id = ?", &filter.class_id),
        ("bus_route_id = ?", &filter.bus_route_id),
        ("student_id = ?", &filter.student_id),
    ];
    for (clause, value) in text_filters {
        if let Some(v) = value {
            clauses.push(clause);
            params.push(Value::Text(v.clone()));
        }
    }
    if let Some(t) = filter.attendance_type {
        clauses.push("attendance_type = ?");
        params.push(Value::Text(t.as_str().to_string()));
    }
    let mut sql = ATTENDANCE_SELECT.to_string();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY scan_time DESC, id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params), attendance_from_row)?
        .collect::<Result<Vec<_>, _>>();
    rows
}

pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl AttendanceStore for SqliteStore<'_> {
    fn student_by_code(&self, code: &str) -> anyhow::Result<Option<Student>> {
        let by_code = self
            .conn
            .query_row(
                &format!("{} WHERE s.code = ?", STUDENT_SELECT),
                [code],
                student_from_row,
            )
            .optional()?;
        if by_code.is_some() {
            return Ok(by_code);
        }
        Ok(load_student(self.conn, code)?)
    }

    fn is_enrolled(&self, student_id: &str, class_id: &str) -> anyhow::Result<bool> {
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM class_enrollments WHERE student_id = ? AND class_id = ?",
                (student_id, class_id),
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .is_some())
    }

    fn has_active_bus_assignment(
        &self,
        student_id: &str,
        route_id: &str,
    ) -> anyhow::Result<bool> {
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM bus_assignments
                 WHERE student_id = ? AND route_id = ? AND status = 'active'",
                (student_id, route_id),
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .is_some())
    }

    fn insert_attendance(&self, rec: NewAttendance) -> anyhow::Result<AttendanceRecord> {
        let id = Uuid::new_v4().to_string();
        let date = format!(
            "{:04}-{:02}-{:02}",
            rec.date.year(),
            rec.date.month(),
            rec.date.day()
        );
        self.conn.execute(
            "INSERT INTO attendance_records(
               id, student_id, schedule_id, class_id, bus_route_id,
               recorded_by, status, attendance_type, date, scan_time
             ) VALUES(?, ?, ?, ?, ?, ?, 'present', ?, ?, ?)",
            (
                &id,
                &rec.student_id,
                &rec.schedule_id,
                &rec.class_id,
                &rec.bus_route_id,
                &rec.recorded_by,
                rec.attendance_type.as_str(),
                &date,
                &rec.scan_time,
            ),
        )?;
        Ok(AttendanceRecord {
            id,
            student_id: rec.student_id,
            schedule_id: rec.schedule_id,
            class_id: rec.class_id,
            bus_route_id: rec.bus_route_id,
            recorded_by: rec.recorded_by,
            status: "present".to_string(),
            attendance_type: rec.attendance_type,
            date,
            scan_time: rec.scan_time,
        })
    }
}
