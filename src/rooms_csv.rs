//! Room bulk import/export.

use crate::model::Room;
use anyhow::{anyhow, Context};
use csv::{ReaderBuilder, StringRecord, Trim, Writer};

pub const NAME_MAX_CHARS: usize = 50;
pub const BUILDING_MAX_CHARS: usize = 50;
pub const FLOOR_MIN: i64 = -10;
pub const FLOOR_MAX: i64 = 100;
pub const CAPACITY_MIN: i64 = 1;
pub const CAPACITY_MAX: i64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInput {
    pub name: String,
    pub building: Option<String>,
    pub floor: Option<i64>,
    pub capacity: Option<i64>,
}

/// Field-level problems with a room; empty when the room is acceptable.
pub fn validate_room(room: &RoomInput) -> Vec<String> {
    let mut errors = Vec::new();
    if room.name.trim().is_empty() {
        errors.push("name is required".to_string());
    } else if room.name.chars().count() > NAME_MAX_CHARS {
        errors.push(format!("name must be at most {} characters", NAME_MAX_CHARS));
    }
    if let Some(b) = &room.building {
        if b.chars().count() > BUILDING_MAX_CHARS {
            errors.push(format!(
                "building must be at most {} characters",
                BUILDING_MAX_CHARS
            ));
        }
    }
    if let Some(f) = room.floor {
        if !(FLOOR_MIN..=FLOOR_MAX).contains(&f) {
            errors.push(format!(
                "floor must be between {} and {}",
                FLOOR_MIN, FLOOR_MAX
            ));
        }
    }
    if let Some(c) = room.capacity {
        if !(CAPACITY_MIN..=CAPACITY_MAX).contains(&c) {
            errors.push(format!(
                "capacity must be between {} and {}",
                CAPACITY_MIN, CAPACITY_MAX
            ));
        }
    }
    errors
}

#[derive(Debug, Default)]
pub struct RoomImport {
    pub rooms: Vec<RoomInput>,
    /// Rows dropped because `name` was blank.
    pub skipped: usize,
    pub errors: Vec<String>,
}

struct Columns {
    name: usize,
    building: Option<usize>,
    floor: Option<usize>,
    capacity: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &StringRecord) -> anyhow::Result<Self> {
        let find = |want: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(want))
        };
        Ok(Self {
            name: find("name").ok_or_else(|| anyhow!("missing required column: name"))?,
            building: find("building"),
            floor: find("floor"),
            capacity: find("capacity"),
        })
    }
}

fn cell(record: &StringRecord, idx: Option<usize>) -> Option<String> {
    let v = record.get(idx?)?.trim();
    if v.is_empty() {
        None
    } else {
        Some(v.to_string())
    }
}

fn parse_int(raw: Option<String>, field: &str, errors: &mut Vec<String>) -> Option<i64> {
    let raw = raw?;
    match raw.parse::<i64>() {
        Ok(v) => Some(v),
        Err(_) => {
            errors.push(format!("{} must be a whole number", field));
            None
        }
    }
}

/// Parses and validates every row. Row numbers in `errors` are CSV line
/// numbers, the header being line 1.
pub fn parse_rooms_csv(text: &str) -> anyhow::Result<RoomImport> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());
    let headers = rdr.headers().context("failed to read CSV header")?.clone();
    let cols = Columns::from_headers(&headers)?;

    let mut out = RoomImport::default();
    for (i, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("malformed CSV near row {}", i + 2))?;
        let line = record
            .position()
            .map(|p| p.line())
            .unwrap_or(i as u64 + 2);

        let Some(name) = cell(&record, Some(cols.name)) else {
            out.skipped += 1;
            continue;
        };

        let mut row_errors = Vec::new();
        let floor = parse_int(cell(&record, cols.floor), "floor", &mut row_errors);
        let capacity = parse_int(cell(&record, cols.capacity), "capacity", &mut row_errors);
        let room = RoomInput {
            name,
            building: cell(&record, cols.building),
            floor,
            capacity,
        };
        row_errors.extend(validate_room(&room));

        if row_errors.is_empty() {
            out.rooms.push(room);
        } else {
            out.errors.extend(
                row_errors
                    .into_iter()
                    .map(|e| format!("Row {}: {}", line, e)),
            );
        }
    }
    Ok(out)
}

pub fn write_rooms_csv(rooms: &[Room]) -> anyhow::Result<String> {
    let mut wtr = Writer::from_writer(Vec::new());
    wtr.write_record(["name", "building", "floor", "capacity"])?;
    for r in rooms {
        wtr.write_record([
            r.name.clone(),
            r.building.clone().unwrap_or_default(),
            r.floor.map(|v| v.to_string()).unwrap_or_default(),
            r.capacity.map(|v| v.to_string()).unwrap_or_default(),
        ])?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| anyhow!("failed to flush CSV: {}", e))?;
    String::from_utf8(bytes).context("CSV output is not UTF-8")
}
