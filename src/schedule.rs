use crate::model::ScheduleSlot;
use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use serde::Serializer;

pub const ROTATION_WEEKS: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    Teacher,
    Room,
    Class,
}

impl ConflictKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Teacher => "teacher",
            Self::Room => "room",
            Self::Class => "class",
        }
    }

    fn message(self) -> &'static str {
        match self {
            Self::Teacher => "teacher is already scheduled in this slot",
            Self::Room => "room is already booked in this slot",
            Self::Class => "class already has a session in this slot",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub schedule_id: String,
}

impl Conflict {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": self.kind.as_str(),
            "scheduleId": self.schedule_id,
            "message": self.kind.message(),
        })
    }
}

/// Every existing entry sharing the candidate's (day, period, week) slot and
/// its teacher, room or class. The candidate itself is skipped when it
/// carries an id.
pub fn find_conflicts(candidate: &ScheduleSlot, existing: &[ScheduleSlot]) -> Vec<Conflict> {
    let mut out = Vec::new();
    for other in existing {
        if candidate.id.is_some() && other.id == candidate.id {
            continue;
        }
        if other.day_of_week != candidate.day_of_week
            || other.period_id != candidate.period_id
            || other.week_number != candidate.week_number
        {
            continue;
        }
        let schedule_id = other.id.clone().unwrap_or_default();
        let checks = [
            (ConflictKind::Teacher, other.teacher_id == candidate.teacher_id),
            (ConflictKind::Room, other.room_id == candidate.room_id),
            (ConflictKind::Class, other.class_id == candidate.class_id),
        ];
        for (kind, hit) in checks {
            if hit {
                out.push(Conflict {
                    kind,
                    schedule_id: schedule_id.clone(),
                });
            }
        }
    }
    out
}

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

pub fn parse_weekday(raw: &str) -> Option<Weekday> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

pub fn serialize_weekday<S: Serializer>(day: &Weekday, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(weekday_name(*day))
}

/// `n` as a week of a `weeks`-long rotation.
pub fn valid_week_number(n: i64, weeks: u8) -> Option<u8> {
    if (1..=weeks.clamp(1, ROTATION_WEEKS) as i64).contains(&n) {
        Some(n as u8)
    } else {
        None
    }
}

/// Rotation week (1-based) that `date` falls in. With an anchor the count
/// starts at the Monday of the anchor's week; without one the ISO week
/// number drives the rotation.
pub fn rotation_week(date: NaiveDate, anchor: Option<NaiveDate>, weeks: u8) -> u8 {
    let weeks = weeks.max(1) as i64;
    let idx = match anchor {
        Some(a) => {
            let start = week_start(a);
            let days = (week_start(date) - start).num_days();
            (days / 7).rem_euclid(weeks)
        }
        None => (date.iso_week().week() as i64 - 1).rem_euclid(weeks),
    };
    (idx + 1) as u8
}

fn week_start(d: NaiveDate) -> NaiveDate {
    d - Duration::days(d.weekday().num_days_from_monday() as i64)
}

pub fn parse_hhmm(raw: &str) -> Option<NaiveTime> {
    let t = raw.trim();
    NaiveTime::parse_from_str(t, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M:%S"))
        .ok()
}

/// Start inclusive, end exclusive.
pub fn period_contains(start: NaiveTime, end: NaiveTime, at: NaiveTime) -> bool {
    start <= at && at < end
}
