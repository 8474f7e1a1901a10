use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::scan::SCAN_LOG_CAPACITY;
use crate::schedule::ROTATION_WEEKS;
use chrono::NaiveDate;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    School,
    Attendance,
}

impl SetupSection {
    const ALL: [SetupSection; 2] = [Self::School, Self::Attendance];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "school" => Some(Self::School),
            "attendance" => Some(Self::Attendance),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::School => "school",
            Self::Attendance => "attendance",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::School => "setup.school",
            Self::Attendance => "setup.attendance",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::School => json!({
            "schoolName": "",
            "rotationStartDate": null,
            "rotationWeeks": ROTATION_WEEKS
        }),
        SetupSection::Attendance => json!({
            "notifyGuardians": false,
            "scanLogCapacity": SCAN_LOG_CAPACITY
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v.as_i64().ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.chars().count() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_nullable_date(v: &Value, key: &str) -> Result<Value, String> {
    match v {
        Value::Null => Ok(Value::Null),
        Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
        Value::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
            .map_err(|_| format!("{} must be YYYY-MM-DD or null", key)),
        _ => Err(format!("{} must be YYYY-MM-DD or null", key)),
    }
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::School => match k.as_str() {
                "schoolName" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 120)?));
                }
                "rotationStartDate" => {
                    obj.insert(k.clone(), parse_nullable_date(v, k)?);
                }
                "rotationWeeks" => {
                    obj.insert(
                        k.clone(),
                        Value::from(parse_i64_range(v, k, 1, ROTATION_WEEKS as i64)?),
                    );
                }
                _ => return Err(format!("unknown school field: {}", k)),
            },
            SetupSection::Attendance => match k.as_str() {
                "notifyGuardians" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "scanLogCapacity" => {
                    let cap = SCAN_LOG_CAPACITY as i64;
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, cap, cap)?));
                }
                _ => return Err(format!("unknown attendance field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Stale or malformed stored values fall back to defaults.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

/// School rotation settings as used by the schedule selector.
pub struct Rotation {
    pub start_date: Option<NaiveDate>,
    pub weeks: u8,
}

pub fn load_rotation(conn: &rusqlite::Connection) -> anyhow::Result<Rotation> {
    let school = load_section(conn, SetupSection::School)?;
    let start_date = school
        .get("rotationStartDate")
        .and_then(|v| v.as_str())
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());
    let weeks = school
        .get("rotationWeeks")
        .and_then(|v| v.as_i64())
        .and_then(|n| u8::try_from(n).ok())
        .unwrap_or(ROTATION_WEEKS);
    Ok(Rotation { start_date, weeks })
}

pub fn notify_guardians_enabled(conn: &rusqlite::Connection) -> anyhow::Result<bool> {
    let attendance = load_section(conn, SetupSection::Attendance)?;
    Ok(attendance
        .get("notifyGuardians")
        .and_then(|v| v.as_bool())
        .unwrap_or(false))
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let sections: Vec<SetupSection> = match req.params.get("section").and_then(|v| v.as_str()) {
        Some(raw) => match SetupSection::parse(raw) {
            Some(s) => vec![s],
            None => return err(&req.id, "bad_params", "unknown section", None),
        },
        None => SetupSection::ALL.to_vec(),
    };
    let mut out = Map::new();
    for section in sections {
        match load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let SetupSection::School = section {
        let weeks = current
            .get("rotationWeeks")
            .and_then(|v| v.as_i64())
            .unwrap_or(ROTATION_WEEKS as i64);
        // Entries past the end of a shortened rotation would never be selected.
        let stranded: i64 = match conn.query_row(
            "SELECT COUNT(*) FROM class_schedules WHERE week_number > ?",
            [weeks],
            |r| r.get(0),
        ) {
            Ok(n) => n,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if stranded > 0 {
            return err(
                &req.id,
                "in_use",
                format!("{} schedule entries fall outside a {}-week rotation", stranded, weeks),
                Some(json!({ "scheduleCount": stranded, "rotationWeeks": weeks })),
            );
        }
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    let mut result = json!({ "ok": true });
    result[section.name()] = current;
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
