//! Status store
//!
//! One acknowledgement status per medication entry. The scheduler moves an
//! entry from unset to awaiting; the user can set taken / not-taken at any
//! time, and toggle between them directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{EntryId, MedicationStatus, StatusState};

/// Entry id -> status. Ordered so the persisted JSON is stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusBook {
    statuses: BTreeMap<EntryId, MedicationStatus>,
}

impl StatusBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entry_id: EntryId) -> Option<&MedicationStatus> {
        self.statuses.get(&entry_id)
    }

    pub fn state(&self, entry_id: EntryId) -> Option<StatusState> {
        self.get(entry_id).map(|s| s.state)
    }

    /// User action: overwrite whatever was there
    pub fn set(&mut self, entry_id: EntryId, state: StatusState, now: DateTime<Utc>) {
        self.statuses.insert(
            entry_id,
            MedicationStatus {
                entry_id,
                state,
                changed_at: now,
            },
        );
    }

    /// Scheduler transition, unset -> awaiting only
    pub fn mark_awaiting(&mut self, entry_id: EntryId, now: DateTime<Utc>) -> bool {
        if self.statuses.contains_key(&entry_id) {
            return false;
        }
        self.set(entry_id, StatusState::Awaiting, now);
        true
    }

    pub fn is_acknowledged(&self, entry_id: EntryId) -> bool {
        self.state(entry_id)
            .map(|s| s.is_acknowledged())
            .unwrap_or(false)
    }

    pub fn remove(&mut self, entry_id: EntryId) -> Option<MedicationStatus> {
        self.statuses.remove(&entry_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MedicationStatus> {
        self.statuses.values()
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }
}
