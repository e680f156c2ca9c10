use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{PipelineError, Result};

pub const DEFAULT_N_ESTIMATORS: usize = 200;
pub const DEFAULT_LEARNING_RATE: f64 = 0.1;
pub const DEFAULT_MAX_DEPTH: usize = 3;
pub const DEFAULT_RANDOM_STATE: u64 = 42;
pub const DEFAULT_SUBSAMPLE: f64 = 1.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceConfig {
    pub race_id: String,
    pub race_name: String,
    pub year: i32,
    pub training_race: TrainingRace,
    pub qualifying_data: Vec<QualifyingEntry>,
    #[serde(default, alias = "weather")]
    pub weather_location: Option<WeatherLocation>,
    #[serde(alias = "features")]
    pub feature_list: Vec<String>,
    #[serde(default)]
    pub model_params: Option<ModelParamsConfig>,
    #[serde(default)]
    pub season_points: HashMap<String, f64>,
    #[serde(default)]
    pub average_position_change: HashMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRace {
    pub year: i32,
    #[serde(alias = "identifier")]
    pub session_identifier: SessionIdentifier,
    #[serde(alias = "type", default = "default_session_type")]
    pub session_type: String,
}

/// A round number or an event name ("Australia", "Suzuka").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SessionIdentifier {
    Round(u32),
    Name(String),
}

impl std::fmt::Display for SessionIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionIdentifier::Round(round) => write!(f, "round {round}"),
            SessionIdentifier::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualifyingEntry {
    pub driver: String,
    #[serde(default)]
    pub qualifying_time: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub forecast_time: String,
}

/// Fully resolved training parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    /// `None` is unlimited depth.
    pub max_depth: Option<usize>,
    pub random_state: u64,
    pub subsample: f64,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            n_estimators: DEFAULT_N_ESTIMATORS,
            learning_rate: DEFAULT_LEARNING_RATE,
            max_depth: Some(DEFAULT_MAX_DEPTH),
            random_state: DEFAULT_RANDOM_STATE,
            subsample: DEFAULT_SUBSAMPLE,
        }
    }
}

/// `model_params` as written in the config. Every key may be left out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelParamsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_estimators: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_rate: Option<f64>,
    // Outer `None` is an absent key; `Some(None)` is an explicit null.
    #[serde(
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_depth: Option<Option<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_state: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subsample: Option<f64>,
}

fn present_or_null<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Option<usize>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<usize>::deserialize(deserializer).map(Some)
}

impl ModelParamsConfig {
    /// Fills absent keys from `ModelParams::default()` and names the keys that
    /// were filled.
    pub fn resolve(&self) -> (ModelParams, Vec<&'static str>) {
        let base = ModelParams::default();
        let defaulted = [
            ("n_estimators", self.n_estimators.is_none()),
            ("learning_rate", self.learning_rate.is_none()),
            ("max_depth", self.max_depth.is_none()),
            ("random_state", self.random_state.is_none()),
            ("subsample", self.subsample.is_none()),
        ]
        .into_iter()
        .filter_map(|(key, absent)| absent.then_some(key))
        .collect();
        let params = ModelParams {
            n_estimators: self.n_estimators.unwrap_or(base.n_estimators),
            learning_rate: self.learning_rate.unwrap_or(base.learning_rate),
            max_depth: self.max_depth.unwrap_or(base.max_depth),
            random_state: self.random_state.unwrap_or(base.random_state),
            subsample: self.subsample.unwrap_or(base.subsample),
        };
        (params, defaulted)
    }
}

fn default_session_type() -> String {
    "R".to_string()
}

impl RaceConfig {
    pub fn effective_model_params(&self) -> ModelParams {
        let Some(raw) = &self.model_params else {
            tracing::info!(race_id = %self.race_id, "no model_params in config, using defaults");
            return ModelParams::default();
        };
        let (params, defaulted) = raw.resolve();
        for key in defaulted {
            tracing::info!(race_id = %self.race_id, key, "model_params key absent, using default");
        }
        params
    }

    /// Structural checks that do not need the driver table or feature catalogue.
    pub fn validate(&self) -> Result<()> {
        validate_race_id(&self.race_id)?;
        if self.race_name.trim().is_empty() {
            return Err(PipelineError::Config("race_name is empty".to_string()));
        }
        if self.qualifying_data.is_empty() {
            return Err(PipelineError::Config(
                "qualifying_data must contain at least one entry".to_string(),
            ));
        }
        for (idx, entry) in self.qualifying_data.iter().enumerate() {
            if entry.driver.trim().is_empty() {
                return Err(PipelineError::Config(format!(
                    "qualifying_data[{idx}].driver is empty"
                )));
            }
            if let Some(t) = entry.qualifying_time
                && (!t.is_finite() || t <= 0.0)
            {
                return Err(PipelineError::Config(format!(
                    "qualifying_data[{idx}].qualifying_time must be positive, got {t}"
                )));
            }
        }
        if self.feature_list.is_empty() {
            return Err(PipelineError::Config("feature_list is empty".to_string()));
        }
        let mut seen = HashSet::new();
        for name in &self.feature_list {
            if !seen.insert(name.as_str()) {
                return Err(PipelineError::Config(format!(
                    "feature_list contains '{name}' more than once"
                )));
            }
        }
        if let Some(raw) = &self.model_params {
            validate_model_params(&raw.resolve().0)?;
        }
        Ok(())
    }
}

pub fn validate_model_params(params: &ModelParams) -> Result<()> {
    if params.n_estimators == 0 {
        return Err(PipelineError::Config(
            "model_params.n_estimators must be at least 1".to_string(),
        ));
    }
    if !params.learning_rate.is_finite()
        || params.learning_rate <= 0.0
        || params.learning_rate > 1.0
    {
        return Err(PipelineError::Config(format!(
            "model_params.learning_rate must be in (0, 1], got {}",
            params.learning_rate
        )));
    }
    if !params.subsample.is_finite() || params.subsample <= 0.0 || params.subsample > 1.0 {
        return Err(PipelineError::Config(format!(
            "model_params.subsample must be in (0, 1], got {}",
            params.subsample
        )));
    }
    if params.max_depth == Some(0) {
        return Err(PipelineError::Config(
            "model_params.max_depth must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Race ids name files in the config and prediction directories.
pub fn validate_race_id(race_id: &str) -> Result<()> {
    if race_id.is_empty() {
        return Err(PipelineError::Config("race_id is empty".to_string()));
    }
    let ok = race_id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if !ok {
        return Err(PipelineError::Config(format!(
            "race_id '{race_id}' may only contain a-z, 0-9, '_' and '-'"
        )));
    }
    Ok(())
}

pub fn config_path(races_dir: &Path, race_id: &str) -> PathBuf {
    races_dir.join(format!("{race_id}.json"))
}

pub fn parse_race_config(raw: &str) -> Result<RaceConfig> {
    serde_json::from_str::<RaceConfig>(raw.trim())
        .map_err(|err| PipelineError::Config(format!("malformed race config: {err}")))
}

pub fn load_race_config(races_dir: &Path, race_id: &str) -> Result<RaceConfig> {
    validate_race_id(race_id)?;
    let path = config_path(races_dir, race_id);
    let raw = fs::read_to_string(&path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => {
            PipelineError::Config(format!("race config not found: {}", path.display()))
        }
        _ => PipelineError::Config(format!("read race config {}: {err}", path.display())),
    })?;
    let config = parse_race_config(&raw)?;
    if config.race_id != race_id {
        return Err(PipelineError::Config(format!(
            "{} declares race_id '{}', expected '{race_id}'",
            path.display(),
            config.race_id
        )));
    }
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "race_id": "japan",
        "race_name": "Japanese GP 2025",
        "year": 2025,
        "training_race": {"year": 2024, "identifier": "Japan", "type": "R"},
        "qualifying_data": [{"driver": "VER", "qualifying_time": 86.983}],
        "features": ["QualifyingTime (s)"]
    }"#;

    #[test]
    fn parses_aliases_and_defaults() {
        let cfg = parse_race_config(MINIMAL).expect("minimal config should parse");
        assert_eq!(
            cfg.training_race.session_identifier,
            SessionIdentifier::Name("Japan".to_string())
        );
        assert_eq!(cfg.training_race.session_type, "R");
        assert_eq!(cfg.feature_list, vec!["QualifyingTime (s)".to_string()]);
        assert!(cfg.weather_location.is_none());
        assert!(cfg.model_params.is_none());
        assert_eq!(cfg.effective_model_params(), ModelParams::default());
        cfg.validate().expect("minimal config is valid");
    }

    #[test]
    fn numeric_identifier_is_a_round() {
        let raw = MINIMAL.replace("\"identifier\": \"Japan\"", "\"identifier\": 3");
        let cfg = parse_race_config(&raw).expect("should parse");
        assert_eq!(cfg.training_race.session_identifier, SessionIdentifier::Round(3));
    }

    #[test]
    fn missing_required_field_is_config_error() {
        let raw = MINIMAL.replace("\"year\": 2025,", "");
        let err = parse_race_config(&raw).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn partial_model_params_fill_documented_defaults() {
        let raw = MINIMAL.replace(
            "\"features\"",
            "\"model_params\": {\"n_estimators\": 50, \"max_depth\": null}, \"features\"",
        );
        let cfg = parse_race_config(&raw).expect("should parse");
        let (params, defaulted) = cfg.model_params.as_ref().expect("params present").resolve();
        assert_eq!(params.n_estimators, 50);
        assert_eq!(params.max_depth, None);
        assert_eq!(params.random_state, DEFAULT_RANDOM_STATE);
        assert_eq!(defaulted, vec!["learning_rate", "random_state", "subsample"]);
        assert_eq!(cfg.effective_model_params(), params);
    }

    #[test]
    fn absent_max_depth_is_the_default_not_unlimited() {
        let raw = MINIMAL.replace(
            "\"features\"",
            "\"model_params\": {\"n_estimators\": 50}, \"features\"",
        );
        let cfg = parse_race_config(&raw).expect("should parse");
        let (params, defaulted) = cfg.model_params.as_ref().expect("params present").resolve();
        assert_eq!(params.max_depth, Some(DEFAULT_MAX_DEPTH));
        assert!(defaulted.contains(&"max_depth"));
        assert!(!defaulted.contains(&"n_estimators"));
    }

    #[test]
    fn rejects_bad_values() {
        let mut cfg = parse_race_config(MINIMAL).unwrap();
        cfg.feature_list.clear();
        assert!(matches!(cfg.validate(), Err(PipelineError::Config(_))));

        let mut cfg = parse_race_config(MINIMAL).unwrap();
        cfg.feature_list = vec!["A".to_string(), "A".to_string()];
        assert!(cfg.validate().is_err());

        let mut cfg = parse_race_config(MINIMAL).unwrap();
        cfg.qualifying_data[0].qualifying_time = Some(-1.0);
        assert!(cfg.validate().is_err());

        let mut cfg = parse_race_config(MINIMAL).unwrap();
        cfg.model_params = Some(ModelParamsConfig {
            learning_rate: Some(0.0),
            ..ModelParamsConfig::default()
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn race_id_is_path_safe() {
        assert!(validate_race_id("abu_dhabi").is_ok());
        assert!(validate_race_id("las-vegas-2025").is_ok());
        assert!(validate_race_id("../etc").is_err());
        assert!(validate_race_id("Monaco").is_err());
        assert!(validate_race_id("").is_err());
    }

    #[test]
    fn load_reports_missing_file_as_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_race_config(dir.path(), "nowhere").unwrap_err();
        assert!(matches!(err, PipelineError::Config(msg) if msg.contains("not found")));
    }

    #[test]
    fn load_rejects_mismatched_race_id() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("suzuka.json"), MINIMAL).unwrap();
        let err = load_race_config(dir.path(), "suzuka").unwrap_err();
        assert!(matches!(err, PipelineError::Config(msg) if msg.contains("expected 'suzuka'")));
    }
}
