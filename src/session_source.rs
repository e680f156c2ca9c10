use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PipelineError;
use crate::http_client::{RetryPolicy, get_json, http_client, with_retry};
use crate::race_config::SessionIdentifier;

/// One lap of a historical session, times in seconds. Any field may be
/// missing in the raw data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LapRecord {
    pub driver: String,
    #[serde(default)]
    pub lap_time: Option<f64>,
    #[serde(default)]
    pub sector1: Option<f64>,
    #[serde(default)]
    pub sector2: Option<f64>,
    #[serde(default)]
    pub sector3: Option<f64>,
}

pub trait SessionSource {
    fn fetch_session(
        &self,
        year: i32,
        identifier: &SessionIdentifier,
        session_type: &str,
    ) -> Result<Vec<LapRecord>, PipelineError>;
}

/// Reads a fixed lap snapshot (JSON array of `LapRecord`) from disk.
#[derive(Debug, Clone)]
pub struct FileSessionSource {
    path: PathBuf,
}

impl FileSessionSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SessionSource for FileSessionSource {
    fn fetch_session(
        &self,
        year: i32,
        identifier: &SessionIdentifier,
        session_type: &str,
    ) -> Result<Vec<LapRecord>, PipelineError> {
        tracing::info!(
            path = %self.path.display(),
            year,
            %identifier,
            session_type,
            "loading historical laps from snapshot"
        );
        let raw = fs::read_to_string(&self.path).map_err(|err| {
            PipelineError::DataSource(format!(
                "read lap snapshot {}: {err}",
                self.path.display()
            ))
        })?;
        serde_json::from_str::<Vec<LapRecord>>(raw.trim()).map_err(|err| {
            PipelineError::DataSource(format!(
                "invalid lap snapshot {}: {err}",
                self.path.display()
            ))
        })
    }
}

#[derive(Debug, Clone)]
pub struct OpenF1Source {
    base_url: String,
    retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub session_key: u64,
    pub date_start: Option<DateTime<Utc>>,
    pub country_name: String,
    pub location: String,
    pub circuit_short_name: String,
}

impl OpenF1Source {
    pub fn new(base_url: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            base_url: base_url.into(),
            retry,
        }
    }

    fn fetch(&self, label: &str, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let client = http_client()?;
        let url = format!("{}/{path}", self.base_url);
        with_retry(&self.retry, label, || get_json(client, &url, query))
    }

    fn fetch_laps(
        &self,
        year: i32,
        identifier: &SessionIdentifier,
        session_type: &str,
    ) -> Result<Vec<LapRecord>> {
        let session_name = session_name_for(session_type)?;
        let sessions = self.fetch(
            "openf1 sessions",
            "sessions",
            &[
                ("year", year.to_string()),
                ("session_name", session_name.to_string()),
            ],
        )?;
        let sessions = parse_sessions_json(&sessions)?;
        let session = select_session(&sessions, identifier).ok_or_else(|| {
            anyhow!("no {session_name} session for {identifier} in {year}")
        })?;
        tracing::info!(
            session_key = session.session_key,
            country = %session.country_name,
            "resolved historical session"
        );

        let key = session.session_key.to_string();
        let drivers = self.fetch("openf1 drivers", "drivers", &[("session_key", key.clone())])?;
        let acronyms = parse_driver_numbers_json(&drivers)?;
        let laps = self.fetch("openf1 laps", "laps", &[("session_key", key)])?;
        parse_laps_json(&laps, &acronyms)
    }
}

impl SessionSource for OpenF1Source {
    fn fetch_session(
        &self,
        year: i32,
        identifier: &SessionIdentifier,
        session_type: &str,
    ) -> Result<Vec<LapRecord>, PipelineError> {
        self.fetch_laps(year, identifier, session_type)
            .map_err(|err| PipelineError::DataSource(format!("{err:#}")))
    }
}

pub fn session_name_for(session_type: &str) -> Result<&'static str> {
    let name = match session_type.trim().to_ascii_uppercase().as_str() {
        "R" | "RACE" => "Race",
        "Q" | "QUALIFYING" => "Qualifying",
        "S" | "SPRINT" => "Sprint",
        "SQ" | "SPRINT QUALIFYING" => "Sprint Qualifying",
        "FP1" => "Practice 1",
        "FP2" => "Practice 2",
        "FP3" => "Practice 3",
        other => return Err(anyhow!("unknown session type '{other}'")),
    };
    Ok(name)
}

pub fn parse_sessions_json(value: &Value) -> Result<Vec<SessionSummary>> {
    let arr = value
        .as_array()
        .ok_or_else(|| anyhow!("sessions payload is not an array"))?;
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        let Some(session_key) = item.get("session_key").and_then(as_u64_any) else {
            continue;
        };
        let date_start = item
            .get("date_start")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        out.push(SessionSummary {
            session_key,
            date_start,
            country_name: str_field(item, "country_name"),
            location: str_field(item, "location"),
            circuit_short_name: str_field(item, "circuit_short_name"),
        });
    }
    out.sort_by(|a, b| {
        a.date_start
            .cmp(&b.date_start)
            .then(a.session_key.cmp(&b.session_key))
    });
    Ok(out)
}

/// Round numbers are 1-based positions in start-date order.
pub fn select_session<'a>(
    sessions: &'a [SessionSummary],
    identifier: &SessionIdentifier,
) -> Option<&'a SessionSummary> {
    match identifier {
        SessionIdentifier::Round(round) => {
            let idx = usize::try_from(*round).ok()?.checked_sub(1)?;
            sessions.get(idx)
        }
        SessionIdentifier::Name(name) => {
            if let Ok(round) = name.trim().parse::<u32>() {
                return select_session(sessions, &SessionIdentifier::Round(round));
            }
            let wanted = name.trim().to_lowercase();
            sessions.iter().find(|s| {
                [&s.country_name, &s.location, &s.circuit_short_name]
                    .iter()
                    .any(|field| field.to_lowercase() == wanted)
            })
        }
    }
}

pub fn parse_driver_numbers_json(value: &Value) -> Result<HashMap<u64, String>> {
    let arr = value
        .as_array()
        .ok_or_else(|| anyhow!("drivers payload is not an array"))?;
    let mut out = HashMap::new();
    for item in arr {
        let Some(number) = item.get("driver_number").and_then(as_u64_any) else {
            continue;
        };
        let acronym = str_field(item, "name_acronym");
        if !acronym.is_empty() {
            out.insert(number, acronym);
        }
    }
    Ok(out)
}

pub fn parse_laps_json(value: &Value, acronyms: &HashMap<u64, String>) -> Result<Vec<LapRecord>> {
    let arr = value
        .as_array()
        .context("laps payload is not an array")?;
    let mut unknown_numbers = Vec::new();
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        let Some(number) = item.get("driver_number").and_then(as_u64_any) else {
            continue;
        };
        let driver = match acronyms.get(&number) {
            Some(code) => code.clone(),
            None => {
                if !unknown_numbers.contains(&number) {
                    unknown_numbers.push(number);
                }
                number.to_string()
            }
        };
        out.push(LapRecord {
            driver,
            lap_time: item.get("lap_duration").and_then(Value::as_f64),
            sector1: item.get("duration_sector_1").and_then(Value::as_f64),
            sector2: item.get("duration_sector_2").and_then(Value::as_f64),
            sector3: item.get("duration_sector_3").and_then(Value::as_f64),
        });
    }
    if !unknown_numbers.is_empty() {
        tracing::warn!(?unknown_numbers, "laps reference driver numbers missing from driver list");
    }
    Ok(out)
}

fn str_field(item: &Value, key: &str) -> String {
    item.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn as_u64_any(v: &Value) -> Option<u64> {
    if let Some(n) = v.as_u64() {
        return Some(n);
    }
    v.as_str()?.trim().parse::<u64>().ok()
}
