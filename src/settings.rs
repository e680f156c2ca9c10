use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::http_client::RetryPolicy;

const DEFAULT_RACES_DIR: &str = "races";
const DEFAULT_PREDICTIONS_DIR: &str = "predictions";
const DEFAULT_OPENF1_BASE_URL: &str = "https://api.openf1.org/v1";
const DEFAULT_FETCH_ATTEMPTS: u32 = 3;
const DEFAULT_FETCH_BACKOFF_MS: u64 = 500;
const DEFAULT_FETCH_DEADLINE_SECS: u64 = 60;
const PLACEHOLDER_API_KEY: &str = "YOURAPIKEY";

#[derive(Debug, Clone)]
pub struct Settings {
    pub races_dir: PathBuf,
    pub predictions_dir: PathBuf,
    pub openweather_api_key: Option<String>,
    pub openf1_base_url: String,
    pub retry: RetryPolicy,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let opt = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let races_dir = opt("F1_RACES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RACES_DIR));
        let predictions_dir = opt("F1_PREDICTIONS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PREDICTIONS_DIR));
        let openweather_api_key =
            opt("OPENWEATHER_API_KEY").filter(|key| key != PLACEHOLDER_API_KEY);
        let openf1_base_url = opt("OPENF1_BASE_URL")
            .unwrap_or_else(|| DEFAULT_OPENF1_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let attempts = opt("F1_FETCH_ATTEMPTS")
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(DEFAULT_FETCH_ATTEMPTS)
            .clamp(1, 10);
        let backoff_ms = opt("F1_FETCH_BACKOFF_MS")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_FETCH_BACKOFF_MS)
            .min(30_000);
        let deadline_secs = opt("F1_FETCH_DEADLINE_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_FETCH_DEADLINE_SECS)
            .clamp(1, 600);

        Self {
            races_dir,
            predictions_dir,
            openweather_api_key,
            openf1_base_url,
            retry: RetryPolicy {
                attempts,
                base_delay: Duration::from_millis(backoff_ms),
                deadline: Duration::from_secs(deadline_secs),
            },
        }
    }
}
