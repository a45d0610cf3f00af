use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Creation-time derived entry id (milliseconds since the epoch)
pub type EntryId = i64;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

/// Scheduled medication intake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationEntry {
    pub id: EntryId,
    pub name: String,
    pub date: String, // YYYY-MM-DD
    pub time: String, // HH:MM
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusState {
    Awaiting, // scheduled time passed, not acknowledged
    Taken,
    NotTaken,
}

impl StatusState {
    /// Taken and not-taken are user acknowledgements
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, StatusState::Taken | StatusState::NotTaken)
    }
}

/// Acknowledgement status of one entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationStatus {
    pub entry_id: EntryId,
    pub state: StatusState,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoundKind {
    Beep,
    Bell,
    Melody,
}

/// Alert settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub vibration_intensity: u8, // 0-100, 0 = off
    pub sound_volume: u8,        // 0-100, 0 = off
    pub sound_kind: SoundKind,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            vibration_intensity: 70,
            sound_volume: 50,
            sound_kind: SoundKind::Beep,
        }
    }
}

impl NotificationSettings {
    pub fn validate(&self) -> AppResult<()> {
        if self.vibration_intensity > 100 {
            return Err(AppError::InvalidInput(format!(
                "vibration_intensity must be 0-100, got {}",
                self.vibration_intensity
            )));
        }
        if self.sound_volume > 100 {
            return Err(AppError::InvalidInput(format!(
                "sound_volume must be 0-100, got {}",
                self.sound_volume
            )));
        }
        Ok(())
    }
}

/// Blood pressure / glucose reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalsReading {
    pub id: i64,
    pub date: String,
    pub systolic: Option<u16>,  // mmHg
    pub diastolic: Option<u16>, // mmHg
    pub glucose: Option<f64>,   // mg/dl
    pub created_at: DateTime<Utc>,
}

/// Values of a locally cached blood analysis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisValues {
    pub glucose: Option<f64>,
    pub cholesterol: Option<f64>,
    pub triglycerides: Option<f64>,
    pub hemoglobin: Option<f64>,
    pub white_cells: Option<f64>,
    pub red_cells: Option<f64>,
    pub platelets: Option<f64>,
}

impl AnalysisValues {
    pub fn is_empty(&self) -> bool {
        [
            self.glucose,
            self.cholesterol,
            self.triglycerides,
            self.hemoglobin,
            self.white_cells,
            self.red_cells,
            self.platelets,
        ]
        .iter()
        .all(Option::is_none)
    }
}

/// Locally cached blood analysis, one per date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloodAnalysis {
    pub id: i64,
    pub date: String,
    #[serde(flatten)]
    pub values: AnalysisValues,
    pub created_at: DateTime<Utc>,
}

/// Lab fields of a backend blood test panel (column names of `blood_tests`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabValues {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub globuli_rossi: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emoglobina: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ematocrito: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub globuli_bianchi: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub piastrine: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub glicemia: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emoglobina_glicata: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creatinina: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub azotemia: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub got_ast: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpt_alt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gamma_gt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colesterolo_totale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colesterolo_hdl: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colesterolo_ldl: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigliceridi: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sodio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub potassio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vitamina_d: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vitamina_b12: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tsh: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ft3: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ft4: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ferritina: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pcr: Option<f64>,
}

/// New blood test panel as submitted by the user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloodTestInput {
    pub test_date: chrono::NaiveDate,
    pub notes: Option<String>,
    #[serde(flatten)]
    pub values: LabValues,
}

/// Blood test panel row (Supabase `blood_tests`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloodTest {
    pub id: String,
    pub user_id: String,
    pub test_date: String,
    pub notes: Option<String>,
    #[serde(flatten)]
    pub values: LabValues,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// User profile row (Supabase `profiles`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Reminder,
    StatusChanged,
    Error,
}

/// Transient in-app notice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Notice {
    pub fn new(kind: NoticeKind, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            body: body.into(),
            created_at: Utc::now(),
        }
    }
}
