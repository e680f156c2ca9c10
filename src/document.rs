use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

pub const MODEL_TYPE: &str = "GradientBoostingRegressor";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub driver: String,
    pub predicted_time: f64,
    pub qualifying_time: f64,
    pub team: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub mae: f64,
    pub features_used: Vec<String>,
    pub model_type: String,
    #[serde(default)]
    pub mae_held_out: bool,
}

/// The persisted per-race artifact read by the serving side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionDocument {
    pub race: String,
    pub year: i32,
    pub predictions: Vec<PredictionRecord>,
    pub model_metadata: ModelMetadata,
}

pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

impl PredictionDocument {
    pub fn new(
        race: impl Into<String>,
        year: i32,
        mut predictions: Vec<PredictionRecord>,
        mae: f64,
        features_used: Vec<String>,
        mae_held_out: bool,
    ) -> Self {
        predictions.sort_by(|a, b| {
            a.predicted_time
                .partial_cmp(&b.predicted_time)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.driver.cmp(&b.driver))
        });
        Self {
            race: race.into(),
            year,
            predictions,
            model_metadata: ModelMetadata {
                mae: round3(mae),
                features_used,
                model_type: MODEL_TYPE.to_string(),
                mae_held_out,
            },
        }
    }

    pub fn podium(&self) -> impl Iterator<Item = &PredictionRecord> {
        self.predictions.iter().take(3)
    }
}
