use chrono::{NaiveDate, Weekday};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Active,
    Inactive,
}

impl RecordStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceType {
    Classroom,
    Bus,
}

impl AttendanceType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "classroom" => Some(Self::Classroom),
            "bus" => Some(Self::Bus),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Classroom => "classroom",
            Self::Bus => "bus",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub code: String,
    pub grade: i64,
    pub section: String,
    pub status: RecordStatus,
    pub bus_route_id: Option<String>,
}

impl Student {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    pub fn scan_token(&self) -> String {
        format!("{}{}", crate::scan::STUDENT_TOKEN_PREFIX, self.code)
    }

    pub fn is_active(&self) -> bool {
        self.status == RecordStatus::Active
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut v = serde_json::to_value(self).unwrap_or_default();
        v["displayName"] = self.display_name().into();
        v["scanToken"] = self.scan_token().into();
        v
    }
}

/// Grade, section and subject are stored separately; the display string is
/// only ever produced from them.
pub fn class_display_name(grade: i64, section: &str, subject: &str) -> String {
    format!("Grade {} - Section {} ({})", grade, section, subject)
}

/// The identity of a schedule entry as far as conflict checking is
/// concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSlot {
    pub id: Option<String>,
    pub class_id: String,
    pub teacher_id: String,
    pub room_id: String,
    pub period_id: String,
    pub day_of_week: Weekday,
    pub week_number: u8,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub id: String,
    pub class_id: String,
    pub class_name: String,
    pub teacher_id: String,
    pub teacher_name: String,
    pub room_id: String,
    pub room_name: String,
    pub period_id: String,
    pub period_number: i64,
    pub start_time: String,
    pub end_time: String,
    #[serde(serialize_with = "crate::schedule::serialize_weekday")]
    pub day_of_week: Weekday,
    pub week_number: u8,
}

impl ScheduleEntry {
    pub fn slot(&self) -> ScheduleSlot {
        ScheduleSlot {
            id: Some(self.id.clone()),
            class_id: self.class_id.clone(),
            teacher_id: self.teacher_id.clone(),
            room_id: self.room_id.clone(),
            period_id: self.period_id.clone(),
            day_of_week: self.day_of_week,
            week_number: self.week_number,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusRoute {
    pub id: String,
    pub name: String,
    pub driver_name: Option<String>,
    pub status: RecordStatus,
}

#[derive(Debug, Clone)]
pub struct NewAttendance {
    pub student_id: String,
    pub schedule_id: Option<String>,
    pub class_id: Option<String>,
    pub bus_route_id: Option<String>,
    pub recorded_by: String,
    pub attendance_type: AttendanceType,
    pub date: NaiveDate,
    pub scan_time: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: String,
    pub schedule_id: Option<String>,
    pub class_id: Option<String>,
    pub bus_route_id: Option<String>,
    pub recorded_by: String,
    pub status: String,
    pub attendance_type: AttendanceType,
    pub date: String,
    pub scan_time: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub name: String,
    pub building: Option<String>,
    pub floor: Option<i64>,
    pub capacity: Option<i64>,
}
