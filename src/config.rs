//! Runtime configuration from environment variables

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::assistant::{DEFAULT_GATEWAY_URL, DEFAULT_MODEL};
use crate::backend::BackendConfig;
use crate::error::{AppError, AppResult};
use crate::storage::default_data_dir;

pub const DEFAULT_PORT: u16 = 3030;
pub const DEFAULT_POLL_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub port: u16,
    pub poll_interval: Duration,
    pub notifications_enabled: bool,
    pub backend: Option<BackendConfig>,
    pub chat_endpoint: Option<String>,
    pub gateway_url: String,
    pub gateway_key: Option<String>,
    pub model: String,
}

impl AppConfig {
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Blank values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let data_dir = match get("VITA_SANA_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir()?,
        };

        let port = parse_or("VITA_SANA_PORT", get("VITA_SANA_PORT"), DEFAULT_PORT)?;
        let poll_secs = parse_or("VITA_SANA_POLL_SECS", get("VITA_SANA_POLL_SECS"), DEFAULT_POLL_SECS)?;
        if poll_secs == 0 {
            return Err(AppError::Config("VITA_SANA_POLL_SECS must be at least 1".to_string()));
        }

        let notifications_enabled = match get("VITA_SANA_NOTIFICATIONS") {
            None => true,
            Some(v) => parse_bool("VITA_SANA_NOTIFICATIONS", &v)?,
        };

        let backend = match (get("SUPABASE_URL"), get("SUPABASE_ANON_KEY")) {
            (Some(url), Some(key)) => Some(BackendConfig::new(&url, &key)),
            (None, None) => None,
            _ => {
                return Err(AppError::Config(
                    "SUPABASE_URL and SUPABASE_ANON_KEY must be set together".to_string(),
                ))
            }
        };

        Ok(Self {
            data_dir,
            port,
            poll_interval: Duration::from_secs(poll_secs),
            notifications_enabled,
            backend,
            chat_endpoint: get("CHAT_ENDPOINT_URL"),
            gateway_url: get("AI_GATEWAY_URL").unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string()),
            gateway_key: get("AI_GATEWAY_KEY"),
            model: get("AI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }
}

fn parse_or<T: FromStr>(key: &str, value: Option<String>, default: T) -> AppResult<T> {
    match value {
        None => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|_| AppError::Config(format!("{} has an invalid value '{}'", key, v))),
    }
}

fn parse_bool(key: &str, value: &str) -> AppResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AppError::Config(format!("{} has an invalid value '{}'", key, value))),
    }
}
