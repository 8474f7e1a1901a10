//! Scan-token validation, attendance recording and the per-session
//! recent-scans log.
//!
//! Everything here runs against [`AttendanceStore`] so the checks can be
//! exercised without a workspace database.

use crate::model::{
    AttendanceRecord, AttendanceType, BusRoute, NewAttendance, ScheduleEntry, Student,
};
use anyhow::anyhow;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

pub const STUDENT_TOKEN_PREFIX: &str = "STUDENT:";
pub const SCAN_LOG_CAPACITY: usize = 10;
/// Open sessions kept at once; opening one more evicts the least recently used.
pub const MAX_OPEN_SESSIONS: usize = 64;

pub const REASON_NOT_STUDENT_CODE: &str = "not a student code";
pub const REASON_STUDENT_NOT_FOUND: &str = "Student not found";
pub const REASON_STUDENT_INACTIVE: &str = "Student is inactive";
pub const REASON_NOT_ENROLLED: &str = "Not enrolled in this class";
pub const REASON_NOT_ASSIGNED: &str = "Not assigned to this bus";

/// Read/write capabilities the attendance flow needs from storage.
pub trait AttendanceStore {
    /// Looks a student up by scannable code, falling back to the id.
    fn student_by_code(&self, code: &str) -> anyhow::Result<Option<Student>>;
    fn is_enrolled(&self, student_id: &str, class_id: &str) -> anyhow::Result<bool>;
    fn has_active_bus_assignment(&self, student_id: &str, route_id: &str)
        -> anyhow::Result<bool>;
    fn insert_attendance(&self, rec: NewAttendance) -> anyhow::Result<AttendanceRecord>;
}

#[derive(Debug, Clone)]
pub enum ScanContext {
    Classroom { schedule: ScheduleEntry },
    Bus { route: BusRoute },
}

impl ScanContext {
    pub fn attendance_type(&self) -> AttendanceType {
        match self {
            Self::Classroom { .. } => AttendanceType::Classroom,
            Self::Bus { .. } => AttendanceType::Bus,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Classroom { schedule } => json!({
                "type": "classroom",
                "schedule": schedule,
            }),
            Self::Bus { route } => json!({
                "type": "bus",
                "busRoute": route,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid {
        student_id: String,
        display_name: String,
    },
    Invalid {
        reason: String,
        student_id: Option<String>,
        display_name: Option<String>,
    },
}

impl Verdict {
    fn invalid(reason: &str) -> Self {
        Self::Invalid {
            reason: reason.to_string(),
            student_id: None,
            display_name: None,
        }
    }

    fn invalid_for(reason: &str, student: &Student) -> Self {
        Self::Invalid {
            reason: reason.to_string(),
            student_id: Some(student.id.clone()),
            display_name: Some(student.display_name()),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Valid {
                student_id,
                display_name,
            } => json!({
                "valid": true,
                "studentId": student_id,
                "displayName": display_name,
            }),
            Self::Invalid {
                reason,
                student_id,
                display_name,
            } => json!({
                "valid": false,
                "reason": reason,
                "studentId": student_id,
                "displayName": display_name,
            }),
        }
    }
}

/// Returns the identifier carried by a `STUDENT:` token.
pub fn parse_student_token(token: &str) -> Option<&str> {
    let rest = token.trim().strip_prefix(STUDENT_TOKEN_PREFIX)?.trim();
    if rest.is_empty() {
        None
    } else {
        Some(rest)
    }
}

/// Runs the checks in order; the first failing one decides the reason.
/// Only storage failures surface as `Err`.
pub fn validate_scan<S: AttendanceStore + ?Sized>(
    store: &S,
    token: &str,
    ctx: &ScanContext,
) -> anyhow::Result<Verdict> {
    let Some(code) = parse_student_token(token) else {
        return Ok(Verdict::invalid(REASON_NOT_STUDENT_CODE));
    };
    let Some(student) = store.student_by_code(code)? else {
        return Ok(Verdict::invalid(REASON_STUDENT_NOT_FOUND));
    };
    if !student.is_active() {
        return Ok(Verdict::invalid_for(REASON_STUDENT_INACTIVE, &student));
    }
    match ctx {
        ScanContext::Classroom { schedule } => {
            if !store.is_enrolled(&student.id, &schedule.class_id)? {
                return Ok(Verdict::invalid_for(REASON_NOT_ENROLLED, &student));
            }
        }
        ScanContext::Bus { route } => {
            if !store.has_active_bus_assignment(&student.id, &route.id)? {
                return Ok(Verdict::invalid_for(REASON_NOT_ASSIGNED, &student));
            }
        }
    }
    Ok(Verdict::Valid {
        display_name: student.display_name(),
        student_id: student.id,
    })
}

/// Writes one `present` record for an already validated student. Repeated
/// calls write repeated rows.
pub fn record_attendance<S: AttendanceStore + ?Sized>(
    store: &S,
    student_id: &str,
    ctx: &ScanContext,
    recorded_by: &str,
    now: DateTime<Local>,
) -> anyhow::Result<AttendanceRecord> {
    let (schedule_id, class_id, bus_route_id) = match ctx {
        ScanContext::Classroom { schedule } => (
            Some(schedule.id.clone()),
            Some(schedule.class_id.clone()),
            None,
        ),
        ScanContext::Bus { route } => (None, None, Some(route.id.clone())),
    };
    store.insert_attendance(NewAttendance {
        student_id: student_id.to_string(),
        schedule_id,
        class_id,
        bus_route_id,
        recorded_by: recorded_by.to_string(),
        attendance_type: ctx.attendance_type(),
        date: now.date_naive(),
        scan_time: now.with_timezone(&Utc).to_rfc3339(),
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    pub student_id: Option<String>,
    pub display_name: String,
    pub success: bool,
    pub timestamp: String,
    pub message: String,
}

/// Most-recent-first, never longer than [`SCAN_LOG_CAPACITY`].
#[derive(Debug, Default)]
pub struct ScanLog {
    entries: VecDeque<ScanRecord>,
}

impl ScanLog {
    pub fn push(&mut self, rec: ScanRecord) {
        self.entries.push_front(rec);
        self.entries.truncate(SCAN_LOG_CAPACITY);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ScanRecord> {
        self.entries.iter()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.entries).unwrap_or_else(|_| json!([]))
    }
}

#[derive(Debug)]
pub struct ScanOutcome {
    pub verdict: Verdict,
    pub record: Option<AttendanceRecord>,
    pub entry: ScanRecord,
}

impl ScanOutcome {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "verdict": self.verdict.to_json(),
            "record": self.record,
            "entry": self.entry,
        })
    }
}

/// The row a session scans against. Only the id is kept; the row itself is
/// loaded again for every submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTarget {
    Schedule(String),
    BusRoute(String),
}

impl SessionTarget {
    pub fn of(ctx: &ScanContext) -> Self {
        match ctx {
            ScanContext::Classroom { schedule } => Self::Schedule(schedule.id.clone()),
            ScanContext::Bus { route } => Self::BusRoute(route.id.clone()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Schedule(id) => json!({ "type": "classroom", "scheduleId": id }),
            Self::BusRoute(id) => json!({ "type": "bus", "busRouteId": id }),
        }
    }
}

/// One operator's scanning screen: what it scans against plus its log.
#[derive(Debug)]
pub struct ScanSession {
    pub target: SessionTarget,
    pub recorded_by: String,
    pub log: ScanLog,
    last_used: u64,
}

impl ScanSession {
    pub fn new(target: SessionTarget, recorded_by: impl Into<String>) -> Self {
        Self {
            target,
            recorded_by: recorded_by.into(),
            log: ScanLog::default(),
            last_used: 0,
        }
    }

    /// Validate, record on success, and log the outcome. A failed write is
    /// logged as a failed scan before the error is returned.
    ///
    /// `ctx` is the current state of the session's target.
    pub fn submit<S: AttendanceStore + ?Sized>(
        &mut self,
        store: &S,
        ctx: &ScanContext,
        token: &str,
        now: DateTime<Local>,
    ) -> anyhow::Result<ScanOutcome> {
        if SessionTarget::of(ctx) != self.target {
            return Err(anyhow!("scan context does not belong to this session"));
        }
        let verdict = validate_scan(store, token, ctx)?;
        let timestamp = now.with_timezone(&Utc).to_rfc3339();
        match &verdict {
            Verdict::Invalid {
                reason,
                student_id,
                display_name,
            } => {
                let entry = ScanRecord {
                    student_id: student_id.clone(),
                    display_name: display_name
                        .clone()
                        .unwrap_or_else(|| fallback_label(token)),
                    success: false,
                    timestamp,
                    message: reason.clone(),
                };
                self.log.push(entry.clone());
                Ok(ScanOutcome {
                    verdict,
                    record: None,
                    entry,
                })
            }
            Verdict::Valid {
                student_id,
                display_name,
            } => {
                match record_attendance(store, student_id, ctx, &self.recorded_by, now)
                {
                    Ok(record) => {
                        let entry = ScanRecord {
                            student_id: Some(student_id.clone()),
                            display_name: display_name.clone(),
                            success: true,
                            timestamp,
                            message: "Marked present".to_string(),
                        };
                        self.log.push(entry.clone());
                        Ok(ScanOutcome {
                            verdict,
                            record: Some(record),
                            entry,
                        })
                    }
                    Err(e) => {
                        self.log.push(ScanRecord {
                            student_id: Some(student_id.clone()),
                            display_name: display_name.clone(),
                            success: false,
                            timestamp,
                            message: "Failed to record attendance".to_string(),
                        });
                        Err(e)
                    }
                }
            }
        }
    }
}

fn fallback_label(token: &str) -> String {
    match parse_student_token(token) {
        Some(code) => code.to_string(),
        None => "Unknown".to_string(),
    }
}

/// Open scan sessions by id, bounded by [`MAX_OPEN_SESSIONS`].
#[derive(Debug, Default)]
pub struct ScanSessions {
    sessions: HashMap<String, ScanSession>,
    clock: u64,
}

impl ScanSessions {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Stores `session` under a fresh id. Returns the id and, when the cap
    /// was reached, the id of the session evicted to make room.
    pub fn open(&mut self, mut session: ScanSession) -> (String, Option<String>) {
        let mut evicted = None;
        if self.sessions.len() >= MAX_OPEN_SESSIONS {
            if let Some(oldest) = self
                .sessions
                .iter()
                .min_by_key(|(_, s)| s.last_used)
                .map(|(id, _)| id.clone())
            {
                self.sessions.remove(&oldest);
                evicted = Some(oldest);
            }
        }
        session.last_used = self.tick();
        let id = Uuid::new_v4().to_string();
        self.sessions.insert(id.clone(), session);
        (id, evicted)
    }

    pub fn get(&self, id: &str) -> Option<&ScanSession> {
        self.sessions.get(id)
    }

    /// Like [`get`](Self::get) but counts as use for eviction.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut ScanSession> {
        let now = self.tick();
        let session = self.sessions.get_mut(id)?;
        session.last_used = now;
        Some(session)
    }

    pub fn close(&mut self, id: &str) -> Option<ScanSession> {
        self.sessions.remove(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}
