//! Medication entry list

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::error::{AppError, AppResult};
use crate::models::{EntryId, MedicationEntry, DATE_FORMAT, TIME_FORMAT};
use crate::status::StatusBook;

const MAX_NAME_LEN: usize = 50;

/// Build a new entry. The id is the creation time in milliseconds, bumped
/// past any id already taken.
pub fn create_entry(
    existing: &[MedicationEntry],
    name: &str,
    date: &str,
    time: &str,
    now: DateTime<Utc>,
) -> AppResult<MedicationEntry> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::InvalidInput("medication name is required".into()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(AppError::InvalidInput(format!(
            "medication name is longer than {} characters",
            MAX_NAME_LEN
        )));
    }

    let date = parse_date(date)?;
    let time = NaiveTime::parse_from_str(time.trim(), TIME_FORMAT)
        .map_err(|_| AppError::InvalidInput(format!("invalid time '{}', expected HH:MM", time)))?;

    let mut id = now.timestamp_millis();
    while existing.iter().any(|e| e.id == id) {
        id += 1;
    }

    Ok(MedicationEntry {
        id,
        name: name.to_string(),
        date: format_date(date),
        time: time.format(TIME_FORMAT).to_string(),
        created_at: now,
    })
}

/// Entries whose stored date string equals `date`, earliest first
pub fn entries_for_date(entries: &[MedicationEntry], date: NaiveDate) -> Vec<MedicationEntry> {
    let wanted = format_date(date);
    let mut selected: Vec<MedicationEntry> = entries
        .iter()
        .filter(|e| e.date == wanted)
        .cloned()
        .collect();
    selected.sort_by(|a, b| a.time.cmp(&b.time));
    selected
}

/// Remove an entry together with its status
pub fn delete_entry(
    entries: &mut Vec<MedicationEntry>,
    statuses: &mut StatusBook,
    id: EntryId,
) -> AppResult<MedicationEntry> {
    let pos = entries
        .iter()
        .position(|e| e.id == id)
        .ok_or_else(|| AppError::NotFound(format!("medication entry {}", id)))?;
    statuses.remove(id);
    Ok(entries.remove(pos))
}

/// Local date-time the entry is due, if its stored strings parse
pub fn scheduled_at(entry: &MedicationEntry) -> Option<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(&entry.date, DATE_FORMAT).ok()?;
    let time = NaiveTime::parse_from_str(&entry.time, TIME_FORMAT).ok()?;
    Some(date.and_time(time))
}

pub fn parse_date(date: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(date.trim(), DATE_FORMAT)
        .map_err(|_| AppError::InvalidInput(format!("invalid date '{}', expected YYYY-MM-DD", date)))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}
