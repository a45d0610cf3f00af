//! Alert output
//!
//! Turns notification settings into a concrete sound / vibration plan and
//! defines the seams the reminder scheduler talks to: the local alert
//! output (sound, haptics, in-app notice) and the OS notification scheduler.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::AppResult;
use crate::models::{EntryId, MedicationEntry, Notice, NotificationSettings, SoundKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HapticStyle {
    Light,
    Medium,
    Heavy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Waveform {
    Sine,
    Triangle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VibrationPlan {
    pub style: HapticStyle,
    pub pulses: u32,
    pub pulse_ms: u32,
    pub gap_ms: u32,
    /// Spacing of native haptic impacts
    pub haptic_spacing_ms: u32,
}

impl VibrationPlan {
    /// Flat on/off pattern for plain vibration APIs
    pub fn pattern(&self) -> Vec<u32> {
        (0..self.pulses)
            .flat_map(|_| [self.pulse_ms, self.gap_ms])
            .collect()
    }
}

/// One oscillator note
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tone {
    pub frequency_hz: f32,
    pub start_ms: u32,
    pub duration_ms: u32,
    pub gain: f32,
    pub waveform: Waveform,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPlan {
    pub vibration: Option<VibrationPlan>,
    pub tones: Vec<Tone>,
}

impl AlertPlan {
    pub fn from_settings(settings: &NotificationSettings) -> Self {
        Self {
            vibration: vibration_plan(settings.vibration_intensity),
            tones: tone_plan(settings.sound_kind, settings.sound_volume),
        }
    }
}

fn vibration_plan(intensity: u8) -> Option<VibrationPlan> {
    if intensity == 0 {
        return None;
    }
    let style = match intensity {
        0..=33 => HapticStyle::Light,
        34..=66 => HapticStyle::Medium,
        _ => HapticStyle::Heavy,
    };
    let pulses = match intensity {
        0..=25 => 1,
        26..=50 => 2,
        51..=75 => 3,
        _ => 4,
    };
    Some(VibrationPlan {
        style,
        pulses,
        pulse_ms: 100 + u32::from(intensity) * 2,
        gap_ms: 100,
        haptic_spacing_ms: 200,
    })
}

const BELL_PARTIALS: [f32; 3] = [523.25, 659.25, 783.99];
const MELODY: [(f32, u32); 4] = [(523.25, 150), (587.33, 150), (659.25, 150), (783.99, 300)];

fn tone_plan(kind: SoundKind, volume: u8) -> Vec<Tone> {
    if volume == 0 {
        return Vec::new();
    }
    let gain = f32::from(volume) / 100.0;

    match kind {
        SoundKind::Beep => vec![Tone {
            frequency_hz: 800.0,
            start_ms: 0,
            duration_ms: 500,
            gain,
            waveform: Waveform::Sine,
        }],
        SoundKind::Bell => BELL_PARTIALS
            .iter()
            .enumerate()
            .map(|(i, &frequency_hz)| Tone {
                frequency_hz,
                start_ms: i as u32 * 50,
                duration_ms: 800,
                gain: gain * 0.7,
                waveform: Waveform::Sine,
            })
            .collect(),
        SoundKind::Melody => {
            let mut start_ms = 0;
            MELODY
                .iter()
                .map(|&(frequency_hz, duration_ms)| {
                    let tone = Tone {
                        frequency_hz,
                        start_ms,
                        duration_ms,
                        gain,
                        waveform: Waveform::Triangle,
                    };
                    start_ms += duration_ms;
                    tone
                })
                .collect()
        }
    }
}

// ============ Output seams ============

/// Local alert output: sound / haptics and in-app notices
pub trait ReminderOutput: Send + Sync {
    fn alert(&self, plan: &AlertPlan, entry: Option<&MedicationEntry>) -> AppResult<()>;
    fn notice(&self, notice: Notice);
}

/// One-shot OS notification keyed by entry id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledNotification {
    pub id: EntryId,
    pub title: String,
    pub body: String,
    pub fire_at: NaiveDateTime,
}

pub trait OsNotifier: Send + Sync {
    fn schedule(&self, notifications: &[ScheduledNotification]) -> AppResult<()>;
    fn cancel(&self, ids: &[EntryId]) -> AppResult<()>;
}

/// Recent notices, newest last
pub struct NoticeBoard {
    notices: Mutex<VecDeque<Notice>>,
    capacity: usize,
}

impl NoticeBoard {
    pub fn new(capacity: usize) -> Self {
        Self {
            notices: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, notice: Notice) {
        if let Ok(mut notices) = self.notices.lock() {
            if notices.len() == self.capacity {
                notices.pop_front();
            }
            notices.push_back(notice);
        }
    }

    pub fn recent(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .map(|n| n.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Daemon output: logs the alert, keeps notices on the board
pub struct LogOutput {
    board: std::sync::Arc<NoticeBoard>,
}

impl LogOutput {
    pub fn new(board: std::sync::Arc<NoticeBoard>) -> Self {
        Self { board }
    }
}

impl ReminderOutput for LogOutput {
    fn alert(&self, plan: &AlertPlan, entry: Option<&MedicationEntry>) -> AppResult<()> {
        let what = entry.map(|e| e.name.as_str()).unwrap_or("test");
        match &plan.vibration {
            Some(v) => log::info!(
                "[Alert] {}: vibrate {:?} x{} ({:?})",
                what,
                v.style,
                v.pulses,
                v.pattern()
            ),
            None => log::debug!("[Alert] {}: vibration off", what),
        }
        if plan.tones.is_empty() {
            log::debug!("[Alert] {}: sound off", what);
        } else {
            log::info!("[Alert] {}: {} tone(s)", what, plan.tones.len());
        }
        Ok(())
    }

    fn notice(&self, notice: Notice) {
        log::info!("[Notice] {} - {}", notice.title, notice.body);
        self.board.push(notice);
    }
}

/// Desktop hosts have no OS alarm API; pending alerts are only logged
pub struct LogOsNotifier;

impl OsNotifier for LogOsNotifier {
    fn schedule(&self, notifications: &[ScheduledNotification]) -> AppResult<()> {
        for n in notifications {
            log::debug!("[OS Notify] scheduled #{} '{}' at {}", n.id, n.body, n.fire_at);
        }
        Ok(())
    }

    fn cancel(&self, ids: &[EntryId]) -> AppResult<()> {
        if !ids.is_empty() {
            log::debug!("[OS Notify] cancelled {} notification(s)", ids.len());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NoticeKind;

    fn settings(vibration: u8, volume: u8, kind: SoundKind) -> NotificationSettings {
        NotificationSettings {
            vibration_intensity: vibration,
            sound_volume: volume,
            sound_kind: kind,
        }
    }

    #[test]
    fn test_vibration_thresholds() {
        let cases = [
            (10, HapticStyle::Light, 1),
            (25, HapticStyle::Light, 1),
            (33, HapticStyle::Light, 2),
            (50, HapticStyle::Medium, 2),
            (66, HapticStyle::Medium, 3),
            (75, HapticStyle::Heavy, 3),
            (100, HapticStyle::Heavy, 4),
        ];
        for (intensity, style, pulses) in cases {
            let plan = vibration_plan(intensity).unwrap();
            assert_eq!(plan.style, style, "intensity {}", intensity);
            assert_eq!(plan.pulses, pulses, "intensity {}", intensity);
        }
        assert!(vibration_plan(0).is_none());
    }

    #[test]
    fn test_vibration_pattern() {
        let plan = vibration_plan(70).unwrap();
        assert_eq!(plan.pulse_ms, 240);
        assert_eq!(plan.pattern(), vec![240, 100, 240, 100, 240, 100]);
    }

    #[test]
    fn test_default_settings_plan() {
        let plan = AlertPlan::from_settings(&NotificationSettings::default());
        assert_eq!(plan.vibration.as_ref().unwrap().style, HapticStyle::Heavy);
        assert_eq!(plan.tones.len(), 1);
        assert_eq!(plan.tones[0].frequency_hz, 800.0);
        assert_eq!(plan.tones[0].gain, 0.5);
    }

    #[test]
    fn test_bell_and_melody() {
        let bell = AlertPlan::from_settings(&settings(0, 100, SoundKind::Bell));
        assert!(bell.vibration.is_none());
        let starts: Vec<u32> = bell.tones.iter().map(|t| t.start_ms).collect();
        assert_eq!(starts, vec![0, 50, 100]);
        assert!((bell.tones[0].gain - 0.7).abs() < f32::EPSILON);

        let melody = AlertPlan::from_settings(&settings(0, 40, SoundKind::Melody));
        let starts: Vec<u32> = melody.tones.iter().map(|t| t.start_ms).collect();
        assert_eq!(starts, vec![0, 150, 300, 450]);
        assert_eq!(melody.tones[3].duration_ms, 300);
        assert!(melody.tones.iter().all(|t| t.waveform == Waveform::Triangle));
    }

    #[test]
    fn test_silent_when_everything_off() {
        let plan = AlertPlan::from_settings(&settings(0, 0, SoundKind::Beep));
        assert!(plan.vibration.is_none());
        assert!(plan.tones.is_empty());
    }

    #[test]
    fn test_notice_board_drops_oldest() {
        let board = NoticeBoard::new(2);
        for i in 0..3 {
            board.push(Notice::new(NoticeKind::Reminder, "t", format!("n{}", i)));
        }
        let bodies: Vec<String> = board.recent().into_iter().map(|n| n.body).collect();
        assert_eq!(bodies, vec!["n1", "n2"]);
    }
}
