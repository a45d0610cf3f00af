//! Local key/value storage
//!
//! Every local record list is a JSON document stored under a fixed key.
//! `Repository` gives typed load/save on top of any `KvStore` backend.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};
use crate::models::{BloodAnalysis, MedicationEntry, NotificationSettings, VitalsReading};
use crate::status::StatusBook;

pub const ENTRIES_KEY: &str = "medication_entries";
pub const STATUSES_KEY: &str = "medication_statuses";
pub const SETTINGS_KEY: &str = "notification_settings";
pub const ANALYSES_KEY: &str = "blood_analyses";
pub const VITALS_KEY: &str = "vitals_readings";

/// Raw string storage
pub trait KvStore: Send {
    fn get(&self, key: &str) -> AppResult<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> AppResult<()>;
    fn remove(&mut self, key: &str) -> AppResult<()>;
}

// ============ SQLite ============

pub struct SqliteKvStore {
    conn: Connection,
}

impl SqliteKvStore {
    /// Open (or create) the store file inside `data_dir`
    pub fn open(data_dir: &Path) -> AppResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join("vita-sana.db");
        let conn = Connection::open(&path)?;
        create_tables(&conn)?;
        log::info!("[Storage] opened {:?}", path);
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()?;
        create_tables(&conn)?;
        Ok(Self { conn })
    }
}

fn create_tables(conn: &Connection) -> AppResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS kv_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

impl KvStore for SqliteKvStore {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv_store WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&mut self, key: &str, value: &str) -> AppResult<()> {
        self.conn.execute(
            r#"INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
               ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"#,
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> AppResult<()> {
        self.conn
            .execute("DELETE FROM kv_store WHERE key = ?1", [key])?;
        Ok(())
    }
}

// ============ In-memory ============

#[derive(Debug, Default)]
pub struct MemoryKvStore {
    values: HashMap<String, String>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> AppResult<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> AppResult<()> {
        self.values.remove(key);
        Ok(())
    }
}

// ============ Repository ============

/// Typed access to the persisted records
pub struct Repository {
    store: Box<dyn KvStore>,
}

impl Repository {
    pub fn new(store: impl KvStore + 'static) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryKvStore::new())
    }

    pub fn load_entries(&mut self) -> AppResult<Vec<MedicationEntry>> {
        self.load_or_reset(ENTRIES_KEY)
    }

    pub fn save_entries(&mut self, entries: &[MedicationEntry]) -> AppResult<()> {
        self.save(ENTRIES_KEY, &entries)
    }

    pub fn load_statuses(&mut self) -> AppResult<StatusBook> {
        self.load_or_reset(STATUSES_KEY)
    }

    pub fn save_statuses(&mut self, statuses: &StatusBook) -> AppResult<()> {
        self.save(STATUSES_KEY, statuses)
    }

    pub fn load_settings(&mut self) -> AppResult<NotificationSettings> {
        self.load_or_reset(SETTINGS_KEY)
    }

    pub fn save_settings(&mut self, settings: &NotificationSettings) -> AppResult<()> {
        settings.validate()?;
        self.save(SETTINGS_KEY, settings)
    }

    pub fn load_analyses(&mut self) -> AppResult<Vec<BloodAnalysis>> {
        self.load_or_reset(ANALYSES_KEY)
    }

    pub fn save_analyses(&mut self, analyses: &[BloodAnalysis]) -> AppResult<()> {
        self.save(ANALYSES_KEY, &analyses)
    }

    pub fn load_vitals(&mut self) -> AppResult<Vec<VitalsReading>> {
        self.load_or_reset(VITALS_KEY)
    }

    pub fn save_vitals(&mut self, readings: &[VitalsReading]) -> AppResult<()> {
        self.save(VITALS_KEY, &readings)
    }

    #[cfg(test)]
    fn raw(&self, key: &str) -> AppResult<Option<String>> {
        self.store.get(key)
    }

    fn save<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> AppResult<()> {
        let json = serde_json::to_string(value)?;
        self.store.set(key, &json)
    }

    /// Missing key -> default. Malformed JSON -> logged, key reset, default.
    fn load_or_reset<T: DeserializeOwned + Default>(&mut self, key: &str) -> AppResult<T> {
        let raw = match self.store.get(key)? {
            Some(raw) => raw,
            None => return Ok(T::default()),
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(value),
            Err(e) => {
                log::warn!("[Storage] discarding malformed '{}': {}", key, e);
                self.store.remove(key)?;
                Ok(T::default())
            }
        }
    }
}

/// Default data directory (`<local data>/vita-sana`)
pub fn default_data_dir() -> AppResult<PathBuf> {
    let data_dir = dirs::data_local_dir()
        .ok_or_else(|| AppError::Custom("Cannot find data directory".to_string()))?;
    Ok(data_dir.join("vita-sana"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SoundKind, StatusState};
    use chrono::TimeZone;

    fn sample_entries() -> Vec<MedicationEntry> {
        vec![
            MedicationEntry {
                id: 1_780_000_000_000,
                name: "Aspirin".to_string(),
                date: "2026-05-01".to_string(),
                time: "08:00".to_string(),
                created_at: Utc.with_ymd_and_hms(2026, 4, 30, 20, 0, 0).unwrap(),
            },
            MedicationEntry {
                id: 1_780_000_000_001,
                name: "Ramipril".to_string(),
                date: "2026-05-01".to_string(),
                time: "20:30".to_string(),
                created_at: Utc.with_ymd_and_hms(2026, 4, 30, 20, 0, 1).unwrap(),
            },
        ]
    }

    #[test]
    fn test_missing_keys_load_defaults() {
        let mut repo = Repository::in_memory();
        assert!(repo.load_entries().unwrap().is_empty());
        assert!(repo.load_statuses().unwrap().is_empty());
        assert_eq!(repo.load_settings().unwrap(), NotificationSettings::default());
    }

    #[test]
    fn test_round_trip_is_byte_identical() {
        let mut repo = Repository::in_memory();
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 8, 1, 0).unwrap();

        let mut statuses = StatusBook::new();
        statuses.set(1_780_000_000_000, StatusState::Awaiting, now);
        statuses.set(1_780_000_000_001, StatusState::NotTaken, now);
        let settings = NotificationSettings {
            vibration_intensity: 30,
            sound_volume: 0,
            sound_kind: SoundKind::Melody,
        };

        repo.save_entries(&sample_entries()).unwrap();
        repo.save_statuses(&statuses).unwrap();
        repo.save_settings(&settings).unwrap();

        for key in [ENTRIES_KEY, STATUSES_KEY, SETTINGS_KEY] {
            let before = repo.raw(key).unwrap().unwrap();
            match key {
                ENTRIES_KEY => {
                    let entries = repo.load_entries().unwrap();
                    repo.save_entries(&entries).unwrap();
                }
                STATUSES_KEY => {
                    let loaded = repo.load_statuses().unwrap();
                    repo.save_statuses(&loaded).unwrap();
                }
                _ => {
                    let loaded = repo.load_settings().unwrap();
                    repo.save_settings(&loaded).unwrap();
                }
            }
            assert_eq!(repo.raw(key).unwrap().unwrap(), before, "key {}", key);
        }
    }

    #[test]
    fn test_malformed_json_resets_key() {
        let mut store = MemoryKvStore::new();
        store.set(ENTRIES_KEY, "[{not json").unwrap();
        store.set(SETTINGS_KEY, r#"{"sound_kind":"siren"}"#).unwrap();
        let mut repo = Repository::new(store);

        assert!(repo.load_entries().unwrap().is_empty());
        assert!(repo.raw(ENTRIES_KEY).unwrap().is_none());
        assert_eq!(repo.load_settings().unwrap(), NotificationSettings::default());
        assert!(repo.raw(SETTINGS_KEY).unwrap().is_none());
    }

    #[test]
    fn test_invalid_settings_are_not_saved() {
        let mut repo = Repository::in_memory();
        let settings = NotificationSettings {
            vibration_intensity: 101,
            ..Default::default()
        };
        assert!(repo.save_settings(&settings).is_err());
        assert!(repo.raw(SETTINGS_KEY).unwrap().is_none());
    }

    #[test]
    fn test_sqlite_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SqliteKvStore::open(dir.path()).unwrap();
            let mut repo = Repository::new(store);
            repo.save_entries(&sample_entries()).unwrap();
        }
        let store = SqliteKvStore::open(dir.path()).unwrap();
        assert!(dir.path().join("vita-sana.db").exists());
        let mut repo = Repository::new(store);
        assert_eq!(repo.load_entries().unwrap(), sample_entries());
    }

    #[test]
    fn test_sqlite_set_overwrites_and_remove() {
        let mut store = SqliteKvStore::open_in_memory().unwrap();
        store.set("k", "1").unwrap();
        store.set("k", "2").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("2"));
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }
}
