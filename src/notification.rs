//! Reminder scheduler
//!
//! Checks the medication entries of the selected day once a minute (and
//! right away after any relevant change). The first time an entry's
//! scheduled time has passed while it is unset or awaiting, the entry is
//! marked awaiting and a single alert is fired. The notified set is
//! cleared whenever the selected day changes.

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, RwLock};
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::alerts::{AlertPlan, OsNotifier, ReminderOutput, ScheduledNotification};
use crate::error::{AppError, AppResult};
use crate::medications::{self, entries_for_date, scheduled_at};
use crate::models::{
    EntryId, MedicationEntry, MedicationStatus, Notice, NoticeKind, NotificationSettings,
    StatusState,
};
use crate::storage::Repository;

pub const REMINDER_TITLE: &str = "Time to take your medicine";

/// Entry whose alert fired in this poll
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DueReminder {
    pub entry: MedicationEntry,
    /// Status went unset -> awaiting in this poll
    pub marked_awaiting: bool,
}

/// Per-day dedupe state
#[derive(Debug)]
pub struct ReminderScheduler {
    selected_date: NaiveDate,
    follow_today: bool,
    enabled: bool,
    notified: HashSet<EntryId>,
}

impl ReminderScheduler {
    pub fn new(selected_date: NaiveDate, enabled: bool) -> Self {
        Self {
            selected_date,
            follow_today: true,
            enabled,
            notified: HashSet::new(),
        }
    }

    pub fn selected_date(&self) -> NaiveDate {
        self.selected_date
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn follows_today(&self) -> bool {
        self.follow_today
    }

    pub fn notified_count(&self) -> usize {
        self.notified.len()
    }

    /// Switch the viewed day; a different day starts with a clean notified set
    pub fn select_date(&mut self, date: NaiveDate) {
        if date != self.selected_date {
            log::info!(
                "[Scheduler] date {} -> {}, resetting notified set",
                self.selected_date,
                date
            );
            self.selected_date = date;
            self.notified.clear();
        }
    }

    pub fn set_follow_today(&mut self, follow: bool) {
        self.follow_today = follow;
    }

    /// Disabling suspends firing only
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Let `ids` fire again on the next poll
    fn forget(&mut self, ids: impl IntoIterator<Item = EntryId>) {
        for id in ids {
            self.notified.remove(&id);
        }
    }

    pub fn poll(
        &mut self,
        now: DateTime<Local>,
        entries: &[MedicationEntry],
        statuses: &mut crate::status::StatusBook,
    ) -> Vec<DueReminder> {
        if !self.enabled {
            return Vec::new();
        }
        let local_now = now.naive_local();
        let stamp = now.with_timezone(&Utc);

        let mut due = Vec::new();
        for entry in entries_for_date(entries, self.selected_date) {
            if statuses.is_acknowledged(entry.id) {
                continue;
            }
            let Some(at) = scheduled_at(&entry) else {
                log::debug!("[Scheduler] skipping unparsable entry {}", entry.id);
                continue;
            };
            if at > local_now {
                continue;
            }
            if !self.notified.insert(entry.id) {
                continue;
            }
            let marked_awaiting = statuses.mark_awaiting(entry.id, stamp);
            due.push(DueReminder {
                entry,
                marked_awaiting,
            });
        }
        due
    }

    /// Future alerts of the selected day that are still unacknowledged
    pub fn pending_os_notifications(
        &self,
        now: DateTime<Local>,
        entries: &[MedicationEntry],
        statuses: &crate::status::StatusBook,
    ) -> Vec<ScheduledNotification> {
        let local_now = now.naive_local();
        entries_for_date(entries, self.selected_date)
            .into_iter()
            .filter(|e| !statuses.is_acknowledged(e.id))
            .filter_map(|e| {
                let fire_at = scheduled_at(&e)?;
                (fire_at > local_now).then(|| ScheduledNotification {
                    id: e.id,
                    title: REMINDER_TITLE.to_string(),
                    body: e.name,
                    fire_at,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerSnapshot {
    pub date: NaiveDate,
    pub enabled: bool,
    pub follow_today: bool,
    pub notified: usize,
}

/// Scheduler wired to storage and outputs
pub struct ReminderService {
    repo: Arc<Mutex<Repository>>,
    scheduler: Mutex<ReminderScheduler>,
    output: Arc<dyn ReminderOutput>,
    os: Arc<dyn OsNotifier>,
    wake: Notify,
    is_running: RwLock<bool>,
}

impl ReminderService {
    pub fn new(
        repo: Arc<Mutex<Repository>>,
        output: Arc<dyn ReminderOutput>,
        os: Arc<dyn OsNotifier>,
        today: NaiveDate,
        enabled: bool,
    ) -> Self {
        Self {
            repo,
            scheduler: Mutex::new(ReminderScheduler::new(today, enabled)),
            output,
            os,
            wake: Notify::new(),
            is_running: RwLock::new(false),
        }
    }

    fn repo(&self) -> AppResult<std::sync::MutexGuard<'_, Repository>> {
        self.repo
            .lock()
            .map_err(|_| AppError::Custom("Repository lock error".to_string()))
    }

    fn scheduler(&self) -> AppResult<std::sync::MutexGuard<'_, ReminderScheduler>> {
        self.scheduler
            .lock()
            .map_err(|_| AppError::Custom("Scheduler lock error".to_string()))
    }

    /// Ask the loop for an immediate pass
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub async fn start(&self) {
        *self.is_running.write().await = true;
        log::info!("[Scheduler] started");
    }

    pub async fn stop(&self) {
        *self.is_running.write().await = false;
        self.wake();
        log::info!("[Scheduler] stopped");
    }

    /// One scheduler pass
    pub fn tick(&self, now: DateTime<Local>) -> AppResult<Vec<DueReminder>> {
        let (due, plan, day_ids, pending, enabled) = {
            let mut repo = self.repo()?;
            let entries = repo.load_entries()?;
            let mut statuses = repo.load_statuses()?;
            let settings = repo.load_settings()?;

            let mut scheduler = self.scheduler()?;
            if scheduler.follows_today() {
                scheduler.select_date(now.date_naive());
            }
            let due = scheduler.poll(now, &entries, &mut statuses);
            if due.iter().any(|d| d.marked_awaiting) {
                if let Err(e) = repo.save_statuses(&statuses) {
                    // nothing fired, retry on the next pass
                    scheduler.forget(due.iter().map(|d| d.entry.id));
                    return Err(e);
                }
            }

            let day_ids: Vec<EntryId> = entries_for_date(&entries, scheduler.selected_date())
                .iter()
                .map(|e| e.id)
                .collect();
            let pending = scheduler.pending_os_notifications(now, &entries, &statuses);
            (
                due,
                AlertPlan::from_settings(&settings),
                day_ids,
                pending,
                scheduler.is_enabled(),
            )
        };

        for reminder in &due {
            log::info!(
                "[Scheduler] {} due at {} {}",
                reminder.entry.name,
                reminder.entry.date,
                reminder.entry.time
            );
            if let Err(e) = self.output.alert(&plan, Some(&reminder.entry)) {
                log::error!("[Scheduler] alert failed for {}: {}", reminder.entry.id, e);
            }
            self.output.notice(Notice::new(
                NoticeKind::Reminder,
                REMINDER_TITLE,
                reminder.entry.name.clone(),
            ));
        }

        if enabled {
            self.sync_os_notifications(&day_ids, &pending);
        }
        Ok(due)
    }

    fn sync_os_notifications(&self, day_ids: &[EntryId], pending: &[ScheduledNotification]) {
        if let Err(e) = self.os.cancel(day_ids) {
            log::error!("[Scheduler] cancelling OS notifications failed: {}", e);
        }
        if pending.is_empty() {
            return;
        }
        match self.os.schedule(pending) {
            Ok(()) => log::debug!("[Scheduler] {} OS notification(s) scheduled", pending.len()),
            Err(e) => log::error!("[Scheduler] scheduling OS notifications failed: {}", e),
        }
    }

    // ============ State changes ============

    pub fn entries(&self) -> AppResult<Vec<MedicationEntry>> {
        self.repo()?.load_entries()
    }

    pub fn entries_for_date(&self, date: NaiveDate) -> AppResult<Vec<MedicationEntry>> {
        Ok(entries_for_date(&self.entries()?, date))
    }

    pub fn statuses(&self) -> AppResult<Vec<MedicationStatus>> {
        Ok(self.repo()?.load_statuses()?.iter().cloned().collect())
    }

    pub fn add_entry(&self, name: &str, date: &str, time: &str) -> AppResult<MedicationEntry> {
        let entry = {
            let mut repo = self.repo()?;
            let mut entries = repo.load_entries()?;
            let entry = medications::create_entry(&entries, name, date, time, Utc::now())?;
            entries.push(entry.clone());
            repo.save_entries(&entries)?;
            entry
        };
        log::info!("[Medications] added {} ({} {})", entry.name, entry.date, entry.time);
        self.wake();
        Ok(entry)
    }

    pub fn delete_entry(&self, id: EntryId) -> AppResult<MedicationEntry> {
        let removed = {
            let mut repo = self.repo()?;
            let mut entries = repo.load_entries()?;
            let mut statuses = repo.load_statuses()?;
            let removed = medications::delete_entry(&mut entries, &mut statuses, id)?;
            repo.save_entries(&entries)?;
            repo.save_statuses(&statuses)?;
            removed
        };
        if let Err(e) = self.os.cancel(&[id]) {
            log::error!("[Scheduler] cancelling OS notification {} failed: {}", id, e);
        }
        log::info!("[Medications] deleted {}", removed.name);
        self.wake();
        Ok(removed)
    }

    /// User acknowledgement; only the scheduler marks entries awaiting
    pub fn set_status(&self, id: EntryId, state: StatusState) -> AppResult<MedicationStatus> {
        let title = match state {
            StatusState::Taken => "Medicine taken",
            StatusState::NotTaken => "Medicine not taken",
            StatusState::Awaiting => {
                return Err(AppError::InvalidInput(
                    "status can only be set to taken or not_taken".to_string(),
                ))
            }
        };

        let (entry, status) = {
            let mut repo = self.repo()?;
            let entries = repo.load_entries()?;
            let entry = entries
                .into_iter()
                .find(|e| e.id == id)
                .ok_or_else(|| AppError::NotFound(format!("medication entry {}", id)))?;
            let mut statuses = repo.load_statuses()?;
            statuses.set(id, state, Utc::now());
            repo.save_statuses(&statuses)?;
            let status = statuses
                .get(id)
                .cloned()
                .ok_or_else(|| AppError::Custom("status not stored".to_string()))?;
            (entry, status)
        };

        self.output
            .notice(Notice::new(NoticeKind::StatusChanged, title, entry.name));
        self.wake();
        Ok(status)
    }

    pub fn settings(&self) -> AppResult<NotificationSettings> {
        self.repo()?.load_settings()
    }

    pub fn update_settings(&self, settings: &NotificationSettings) -> AppResult<()> {
        self.repo()?.save_settings(settings)?;
        log::info!("[Scheduler] settings updated: {:?}", settings);
        self.wake();
        Ok(())
    }

    /// Play the current alert once
    pub fn test_alert(&self) -> AppResult<AlertPlan> {
        let plan = AlertPlan::from_settings(&self.settings()?);
        self.output.alert(&plan, None)?;
        Ok(plan)
    }

    pub fn snapshot(&self) -> AppResult<SchedulerSnapshot> {
        let scheduler = self.scheduler()?;
        Ok(SchedulerSnapshot {
            date: scheduler.selected_date(),
            enabled: scheduler.is_enabled(),
            follow_today: scheduler.follows_today(),
            notified: scheduler.notified_count(),
        })
    }

    /// Pin the scheduler to `date`
    pub fn select_date(&self, date: NaiveDate) -> AppResult<()> {
        {
            let mut scheduler = self.scheduler()?;
            scheduler.set_follow_today(false);
            scheduler.select_date(date);
        }
        self.wake();
        Ok(())
    }

    /// Track the current day again
    pub fn follow_today(&self, today: NaiveDate) -> AppResult<()> {
        {
            let mut scheduler = self.scheduler()?;
            scheduler.set_follow_today(true);
            scheduler.select_date(today);
        }
        self.wake();
        Ok(())
    }

    pub fn set_enabled(&self, enabled: bool) -> AppResult<()> {
        let day_ids = {
            let mut repo = self.repo()?;
            let entries = repo.load_entries()?;
            let mut scheduler = self.scheduler()?;
            scheduler.set_enabled(enabled);
            entries_for_date(&entries, scheduler.selected_date())
                .iter()
                .map(|e| e.id)
                .collect::<Vec<_>>()
        };
        log::info!("[Scheduler] notifications {}", if enabled { "on" } else { "off" });
        if !enabled {
            if let Err(e) = self.os.cancel(&day_ids) {
                log::error!("[Scheduler] cancelling OS notifications failed: {}", e);
            }
        }
        self.wake();
        Ok(())
    }
}

/// Background loop: fixed interval plus wake-ups on state changes
pub async fn run_scheduler(service: Arc<ReminderService>, period: Duration) {
    service.start().await;

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    log::info!("[Scheduler] background task every {:?}", period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = service.wake.notified() => {}
        }

        if !service.is_running().await {
            log::info!("[Scheduler] stop requested, exiting");
            break;
        }

        if let Err(e) = service.tick(Local::now()) {
            log::error!("[Scheduler] pass failed: {}", e);
        }
    }
}
