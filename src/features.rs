use std::collections::HashMap;
use std::fmt;

use crate::drivers::{self, DriverIdentity};
use crate::error::{PipelineError, Result};
use crate::historical::{AlignedHistoricalRecord, median};
use crate::weather::WeatherForecast;

pub const RAIN_ADJUSTMENT_THRESHOLD: f64 = 0.75;
pub const NEUTRAL_LAP_SECONDS: f64 = 90.0;
const NEUTRAL_SECTOR_SECONDS: f64 = 30.0;
const NEUTRAL_CLEAN_AIR_PACE: f64 = 95.5;
const NEUTRAL_WET_FACTOR: f64 = 0.98;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    QualifyingTime,
    WeatherAdjustedQualifying,
    Sector1Time,
    Sector2Time,
    Sector3Time,
    TotalSectorTime,
    CleanAirRacePace,
    WetPerformanceFactor,
    TeamPerformanceScore,
    RainProbability,
    Temperature,
    SeasonPoints,
    AveragePositionChange,
}

impl Feature {
    pub const ALL: [Feature; 13] = [
        Feature::QualifyingTime,
        Feature::WeatherAdjustedQualifying,
        Feature::Sector1Time,
        Feature::Sector2Time,
        Feature::Sector3Time,
        Feature::TotalSectorTime,
        Feature::CleanAirRacePace,
        Feature::WetPerformanceFactor,
        Feature::TeamPerformanceScore,
        Feature::RainProbability,
        Feature::Temperature,
        Feature::SeasonPoints,
        Feature::AveragePositionChange,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Feature::QualifyingTime => "QualifyingTime (s)",
            Feature::WeatherAdjustedQualifying => "QualifyingTime",
            Feature::Sector1Time => "Sector1Time (s)",
            Feature::Sector2Time => "Sector2Time (s)",
            Feature::Sector3Time => "Sector3Time (s)",
            Feature::TotalSectorTime => "TotalSectorTime (s)",
            Feature::CleanAirRacePace => "CleanAirRacePace (s)",
            Feature::WetPerformanceFactor => "WetPerformanceFactor",
            Feature::TeamPerformanceScore => "TeamPerformanceScore",
            Feature::RainProbability => "RainProbability",
            Feature::Temperature => "Temperature",
            Feature::SeasonPoints => "SeasonPoints",
            Feature::AveragePositionChange => "AveragePositionChange",
        }
    }

    pub fn from_name(name: &str) -> Option<Feature> {
        Feature::ALL.into_iter().find(|f| f.name() == name)
    }

    fn imputation(self, column: &[Option<f64>]) -> f64 {
        let column_median = || {
            let present: Vec<f64> = column.iter().flatten().copied().collect();
            median(&present)
        };
        match self {
            Feature::QualifyingTime
            | Feature::WeatherAdjustedQualifying
            | Feature::TotalSectorTime => column_median().unwrap_or(NEUTRAL_LAP_SECONDS),
            Feature::Sector1Time | Feature::Sector2Time | Feature::Sector3Time => {
                column_median().unwrap_or(NEUTRAL_SECTOR_SECONDS)
            }
            Feature::CleanAirRacePace => column_median().unwrap_or(NEUTRAL_CLEAN_AIR_PACE),
            Feature::WetPerformanceFactor => NEUTRAL_WET_FACTOR,
            Feature::TeamPerformanceScore
            | Feature::SeasonPoints
            | Feature::AveragePositionChange
            | Feature::RainProbability
            | Feature::Temperature => 0.0,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered, validated column list shared by the training and current matrices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureList(Vec<Feature>);

impl FeatureList {
    pub fn parse(names: &[String]) -> Result<FeatureList> {
        if names.is_empty() {
            return Err(PipelineError::FeatureDerivation(
                "feature list is empty".to_string(),
            ));
        }
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let feature = Feature::from_name(name).ok_or_else(|| {
                let known: Vec<&str> = Feature::ALL.iter().map(|f| f.name()).collect();
                PipelineError::FeatureDerivation(format!(
                    "unknown feature '{name}' (known: {})",
                    known.join(", ")
                ))
            })?;
            if out.contains(&feature) {
                return Err(PipelineError::FeatureDerivation(format!(
                    "feature '{name}' listed twice"
                )));
            }
            out.push(feature);
        }
        Ok(FeatureList(out))
    }

    pub fn features(&self) -> &[Feature] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|f| f.name().to_string()).collect()
    }
}

/// Everything known about one driver before feature derivation.
#[derive(Debug, Clone)]
pub struct DriverInputs {
    pub identity: DriverIdentity,
    pub qualifying_time: Option<f64>,
    pub qualifying_imputed: bool,
    pub historical: Option<AlignedHistoricalRecord>,
}

/// Race-wide inputs; team scores are fixed for the whole field, not per row.
#[derive(Debug, Clone)]
pub struct RaceContext {
    pub weather: WeatherForecast,
    pub season_points: HashMap<String, f64>,
    pub position_change: HashMap<String, f64>,
    pub team_scores: HashMap<String, f64>,
}

impl RaceContext {
    pub fn new(
        weather: WeatherForecast,
        season_points: HashMap<String, f64>,
        position_change: HashMap<String, f64>,
        field: &[DriverIdentity],
    ) -> Self {
        let team_scores = team_scores(&season_points, field);
        Self {
            weather,
            season_points,
            position_change,
            team_scores,
        }
    }
}

/// Team points normalized by the best team. Driver points from the config are
/// summed per team when present, otherwise the constructor table is used.
pub fn team_scores(
    season_points: &HashMap<String, f64>,
    field: &[DriverIdentity],
) -> HashMap<String, f64> {
    let totals: HashMap<String, f64> = if season_points.is_empty() {
        drivers::constructor_points()
    } else {
        let mut totals = HashMap::new();
        for identity in field {
            let pts = season_points.get(&identity.code).copied().unwrap_or(0.0);
            *totals.entry(identity.team.clone()).or_insert(0.0) += pts;
        }
        totals
    };
    let best = totals.values().copied().fold(0.0_f64, f64::max);
    if best <= 0.0 {
        return HashMap::new();
    }
    totals
        .into_iter()
        .map(|(team, pts)| (team, pts / best))
        .collect()
}

/// Fills qualifying gaps from training pace: best historical lap scaled by the
/// field's typical qualifying/best-lap ratio, else the median known time, else
/// a neutral constant.
pub fn fill_missing_qualifying(inputs: &mut [DriverInputs]) {
    let ratios: Vec<f64> = inputs
        .iter()
        .filter_map(|d| {
            let q = d.qualifying_time?;
            let best = d.historical.as_ref()?.best_lap_time;
            Some(q / best)
        })
        .collect();
    let ratio = median(&ratios).unwrap_or(1.0);
    let known: Vec<f64> = inputs.iter().filter_map(|d| d.qualifying_time).collect();
    let field_median = median(&known);

    for driver in inputs.iter_mut().filter(|d| d.qualifying_time.is_none()) {
        let (value, source) = match (&driver.historical, field_median) {
            (Some(hist), _) => (hist.best_lap_time * ratio, "training pace"),
            (None, Some(m)) => (m, "field median"),
            (None, None) => (NEUTRAL_LAP_SECONDS, "neutral constant"),
        };
        tracing::warn!(
            driver = %driver.identity.code,
            qualifying_time = value,
            source,
            "imputed missing qualifying time"
        );
        driver.qualifying_time = Some(value);
        driver.qualifying_imputed = true;
    }
}

/// Rows are drivers, columns follow `features` exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub features: FeatureList,
    pub drivers: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }
}

fn raw_value(feature: Feature, driver: &DriverInputs, ctx: &RaceContext) -> Option<f64> {
    let code = driver.identity.code.as_str();
    let hist = driver.historical.as_ref();
    match feature {
        Feature::QualifyingTime => driver.qualifying_time,
        Feature::WeatherAdjustedQualifying => {
            let q = driver.qualifying_time?;
            if ctx.weather.rain_probability >= RAIN_ADJUSTMENT_THRESHOLD {
                Some(q * drivers::wet_performance_factor(code).unwrap_or(NEUTRAL_WET_FACTOR))
            } else {
                Some(q)
            }
        }
        Feature::Sector1Time => hist.map(|h| h.sector_times[0]),
        Feature::Sector2Time => hist.map(|h| h.sector_times[1]),
        Feature::Sector3Time => hist.map(|h| h.sector_times[2]),
        Feature::TotalSectorTime => hist.map(AlignedHistoricalRecord::total_sector_time),
        Feature::CleanAirRacePace => drivers::clean_air_race_pace(code),
        Feature::WetPerformanceFactor => drivers::wet_performance_factor(code),
        Feature::TeamPerformanceScore => ctx.team_scores.get(&driver.identity.team).copied(),
        Feature::RainProbability => Some(ctx.weather.rain_probability),
        Feature::Temperature => Some(ctx.weather.temperature),
        Feature::SeasonPoints => ctx.season_points.get(code).copied(),
        Feature::AveragePositionChange => ctx.position_change.get(code).copied(),
    }
}

/// Derives every column, then imputes gaps so no cell is left undefined.
pub fn build(features: &FeatureList, inputs: &[DriverInputs], ctx: &RaceContext) -> FeatureMatrix {
    let mut rows = vec![Vec::with_capacity(features.len()); inputs.len()];

    for &feature in features.features() {
        let column: Vec<Option<f64>> = inputs
            .iter()
            .map(|d| raw_value(feature, d, ctx).filter(|v| v.is_finite()))
            .collect();
        let missing: Vec<&str> = inputs
            .iter()
            .zip(&column)
            .filter(|(_, v)| v.is_none())
            .map(|(d, _)| d.identity.code.as_str())
            .collect();
        let fill = if missing.is_empty() {
            0.0
        } else {
            let fill = feature.imputation(&column);
            tracing::warn!(
                %feature,
                fill,
                drivers = %missing.join(","),
                "imputed missing feature values"
            );
            fill
        };
        for (row, value) in rows.iter_mut().zip(&column) {
            row.push(value.unwrap_or(fill));
        }
    }

    FeatureMatrix {
        features: features.clone(),
        drivers: inputs.iter().map(|d| d.identity.code.clone()).collect(),
        rows,
    }
}
