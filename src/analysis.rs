//! Locally cached blood analyses, at most one per date

use chrono::{DateTime, Utc};

use crate::error::{AppError, AppResult};
use crate::medications::{format_date, parse_date};
use crate::models::{AnalysisValues, BloodAnalysis};

/// Store `values` for `date`, replacing that date's previous record
pub fn save_analysis(
    mut analyses: Vec<BloodAnalysis>,
    date: &str,
    values: AnalysisValues,
    now: DateTime<Utc>,
) -> AppResult<(Vec<BloodAnalysis>, BloodAnalysis)> {
    let date = format_date(parse_date(date)?);
    if values.is_empty() {
        return Err(AppError::InvalidInput(
            "enter at least one analysis value".to_string(),
        ));
    }
    validate(&values)?;

    analyses.retain(|a| a.date != date);

    let mut id = now.timestamp_millis();
    while analyses.iter().any(|a| a.id == id) {
        id += 1;
    }
    let analysis = BloodAnalysis {
        id,
        date,
        values,
        created_at: now,
    };
    analyses.push(analysis.clone());
    log::debug!("[Analysis] saved {} ({} records)", analysis.date, analyses.len());
    Ok((analyses, analysis))
}

fn validate(values: &AnalysisValues) -> AppResult<()> {
    let all = [
        ("glucose", values.glucose),
        ("cholesterol", values.cholesterol),
        ("triglycerides", values.triglycerides),
        ("hemoglobin", values.hemoglobin),
        ("white_cells", values.white_cells),
        ("red_cells", values.red_cells),
        ("platelets", values.platelets),
    ];
    for (name, value) in all {
        if let Some(v) = value {
            if !v.is_finite() || v < 0.0 {
                return Err(AppError::InvalidInput(format!("{} must be a non-negative number", name)));
            }
        }
    }
    Ok(())
}

pub fn delete_analysis(analyses: &mut Vec<BloodAnalysis>, id: i64) -> AppResult<BloodAnalysis> {
    let pos = analyses
        .iter()
        .position(|a| a.id == id)
        .ok_or_else(|| AppError::NotFound(format!("analysis {}", id)))?;
    Ok(analyses.remove(pos))
}

/// Newest date first
pub fn sorted_newest_first(analyses: &[BloodAnalysis]) -> Vec<BloodAnalysis> {
    let mut sorted = analyses.to_vec();
    sorted.sort_by(|a, b| b.date.cmp(&a.date));
    sorted
}
