//! Blood pressure / glucose readings and the weekly trend

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::backend::parse_lab_value;
use crate::error::{AppError, AppResult};
use crate::medications::{format_date, parse_date};
use crate::models::VitalsReading;

const PRESSURE_RANGE: std::ops::RangeInclusive<u16> = 20..=300;

/// `"120/80"` -> (120, 80); a lone number is the systolic value
pub fn parse_blood_pressure(text: &str) -> AppResult<(Option<u16>, Option<u16>)> {
    let text = text.trim();
    if text.is_empty() {
        return Ok((None, None));
    }

    let mut parts = text.splitn(2, '/');
    let systolic = parse_pressure(parts.next().unwrap_or_default(), text)?;
    let diastolic = match parts.next() {
        Some(part) => parse_pressure(part, text)?,
        None => None,
    };
    if systolic.is_none() && diastolic.is_some() {
        return Err(AppError::InvalidInput(format!(
            "blood pressure '{}' has no systolic value",
            text
        )));
    }
    Ok((systolic, diastolic))
}

fn parse_pressure(part: &str, whole: &str) -> AppResult<Option<u16>> {
    let part = part.trim();
    if part.is_empty() {
        return Ok(None);
    }
    let value: u16 = part
        .parse()
        .map_err(|_| AppError::InvalidInput(format!("invalid blood pressure '{}'", whole)))?;
    if !PRESSURE_RANGE.contains(&value) {
        return Err(AppError::InvalidInput(format!(
            "blood pressure value {} out of range",
            value
        )));
    }
    Ok(Some(value))
}

pub fn record_reading(
    existing: &[VitalsReading],
    date: &str,
    blood_pressure: Option<&str>,
    glucose: Option<&str>,
    now: DateTime<Utc>,
) -> AppResult<VitalsReading> {
    let date = parse_date(date)?;
    let (systolic, diastolic) = parse_blood_pressure(blood_pressure.unwrap_or_default())?;
    let glucose = parse_lab_value(glucose.unwrap_or_default())?;
    if matches!(glucose, Some(g) if g <= 0.0) {
        return Err(AppError::InvalidInput("glucose must be positive".to_string()));
    }
    if systolic.is_none() && glucose.is_none() {
        return Err(AppError::InvalidInput(
            "enter blood pressure or glucose".to_string(),
        ));
    }

    let mut id = now.timestamp_millis();
    while existing.iter().any(|r| r.id == id) {
        id += 1;
    }

    Ok(VitalsReading {
        id,
        date: format_date(date),
        systolic,
        diastolic,
        glucose,
        created_at: now,
    })
}

/// One day of the weekly chart
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub label: String,
    pub systolic: Option<f64>,
    pub diastolic: Option<f64>,
    pub glucose: Option<f64>,
}

/// Daily averages for `today - 6 ..= today`, oldest first
pub fn weekly_trend(readings: &[VitalsReading], today: NaiveDate) -> Vec<TrendPoint> {
    (0..7)
        .rev()
        .map(|days_back| {
            let date = today - Duration::days(days_back);
            let key = format_date(date);
            let day: Vec<&VitalsReading> = readings.iter().filter(|r| r.date == key).collect();

            TrendPoint {
                date,
                label: date.format("%a").to_string(),
                systolic: average(day.iter().filter_map(|r| r.systolic.map(f64::from))),
                diastolic: average(day.iter().filter_map(|r| r.diastolic.map(f64::from))),
                glucose: average(day.iter().filter_map(|r| r.glucose)),
            }
        })
        .collect()
}

fn average(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0u32), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / f64::from(count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 7, 9, 0, 0).unwrap()
    }

    fn reading(date: &str, bp: Option<&str>, glucose: Option<&str>) -> VitalsReading {
        record_reading(&[], date, bp, glucose, now()).unwrap()
    }

    #[test]
    fn test_parse_blood_pressure() {
        assert_eq!(parse_blood_pressure("120/80").unwrap(), (Some(120), Some(80)));
        assert_eq!(parse_blood_pressure(" 135 / 85 ").unwrap(), (Some(135), Some(85)));
        assert_eq!(parse_blood_pressure("130").unwrap(), (Some(130), None));
        assert_eq!(parse_blood_pressure("").unwrap(), (None, None));
        assert!(parse_blood_pressure("/80").is_err());
        assert!(parse_blood_pressure("abc/80").is_err());
        assert!(parse_blood_pressure("900/80").is_err());
    }

    #[test]
    fn test_record_reading() {
        let r = reading("2026-05-07", Some("120/80"), Some("98,5"));
        assert_eq!(r.systolic, Some(120));
        assert_eq!(r.glucose, Some(98.5));
        assert_eq!(r.id, now().timestamp_millis());

        let second = record_reading(&[r.clone()], "2026-05-07", None, Some("101"), now()).unwrap();
        assert_eq!(second.id, r.id + 1);
        assert_eq!(second.systolic, None);
    }

    #[test]
    fn test_record_reading_needs_a_value() {
        assert!(record_reading(&[], "2026-05-07", None, None, now()).is_err());
        assert!(record_reading(&[], "2026-05-07", Some(" "), Some(""), now()).is_err());
        assert!(record_reading(&[], "2026-05-07", None, Some("-3"), now()).is_err());
        assert!(record_reading(&[], "07/05/2026", Some("120/80"), None, now()).is_err());
    }

    #[test]
    fn test_weekly_trend_averages() {
        let readings = vec![
            reading("2026-05-07", Some("120/80"), Some("100")),
            reading("2026-05-07", Some("130/90"), None),
            reading("2026-05-01", None, Some("90")),
            reading("2026-04-30", Some("150/95"), None), // outside the window
        ];
        let today = NaiveDate::from_ymd_opt(2026, 5, 7).unwrap();
        let trend = weekly_trend(&readings, today);

        assert_eq!(trend.len(), 7);
        assert_eq!(trend[0].date, NaiveDate::from_ymd_opt(2026, 5, 1).unwrap());
        assert_eq!(trend[0].label, "Fri");
        assert_eq!(trend[0].glucose, Some(90.0));
        assert_eq!(trend[0].systolic, None);

        let last = &trend[6];
        assert_eq!(last.date, today);
        assert_eq!(last.systolic, Some(125.0));
        assert_eq!(last.diastolic, Some(85.0));
        assert_eq!(last.glucose, Some(100.0));

        assert!(trend[1..6].iter().all(|p| p.systolic.is_none() && p.glucose.is_none()));
    }
}
