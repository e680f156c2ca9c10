use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::document::PredictionDocument;
use crate::drivers::{DriverIdentity, DriverRegistry};
use crate::error::{PipelineError, Result};
use crate::features::{self, DriverInputs, FeatureList, RaceContext};
use crate::historical::{self, AlignedHistoricalRecord};
use crate::persist::PredictionStore;
use crate::predictor;
use crate::race_config::{RaceConfig, validate_model_params};
use crate::schema;
use crate::session_source::SessionSource;
use crate::trainer;
use crate::weather::{self, WeatherForecast, WeatherSource};

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub path: PathBuf,
    pub document: PredictionDocument,
    pub weather: WeatherForecast,
    pub training_rows: usize,
    /// Full names of drivers whose qualifying time was imputed.
    pub imputed_qualifying: Vec<String>,
    /// Per-driver config keys (season points, position change) that reached no driver.
    pub ignored_driver_keys: Vec<String>,
}

/// Resolves every qualifying entry. Unknown drivers are kept with a warning;
/// duplicates and an all-unknown field are config errors.
fn resolve_field(
    config: &RaceConfig,
    registry: &DriverRegistry,
) -> Result<Vec<(DriverIdentity, Option<f64>)>> {
    let mut seen = HashSet::new();
    let mut known = 0;
    let mut field = Vec::with_capacity(config.qualifying_data.len());
    for entry in &config.qualifying_data {
        let resolved = registry.resolve(&entry.driver);
        match &resolved.warning {
            Some(warning) => tracing::warn!(%warning, "qualifying driver not in driver table"),
            None => known += 1,
        }
        if !seen.insert(resolved.identity.code.clone()) {
            return Err(PipelineError::Config(format!(
                "driver {} appears more than once in qualifying_data",
                resolved.identity.code
            )));
        }
        field.push((resolved.identity, entry.qualifying_time));
    }
    if known == 0 {
        return Err(PipelineError::Config(
            "no qualifying driver resolves to a known identity".to_string(),
        ));
    }
    Ok(field)
}

/// Re-keys a per-driver map by canonical code so names and codes both work.
/// Keys that reach no driver in the field are logged and returned.
fn by_code(
    section: &str,
    map: &HashMap<String, f64>,
    registry: &DriverRegistry,
    field: &[DriverIdentity],
) -> (HashMap<String, f64>, Vec<String>) {
    let mut entries: Vec<(&String, &f64)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut keyed = HashMap::with_capacity(entries.len());
    let mut ignored = Vec::new();
    for (raw, value) in entries {
        let resolved = registry.resolve(raw);
        if field.iter().any(|d| d.code == resolved.identity.code) {
            keyed.insert(resolved.identity.code, *value);
            continue;
        }
        match &resolved.warning {
            Some(warning) => tracing::warn!(section, %warning, "config key ignored"),
            None => tracing::warn!(
                section,
                driver = %resolved.identity.code,
                "config key names a driver not in qualifying_data, ignored"
            ),
        }
        ignored.push(raw.clone());
    }
    (keyed, ignored)
}

fn resolve_race_weather(
    config: &RaceConfig,
    source: Option<&dyn WeatherSource>,
) -> WeatherForecast {
    if config.weather_location.is_none() {
        match weather::race_location(&config.race_id) {
            Some((lat, lon)) => tracing::warn!(
                race_id = %config.race_id,
                lat,
                lon,
                "circuit location known but config has no forecast time, using neutral weather"
            ),
            None => tracing::warn!(race_id = %config.race_id, "no weather location for race"),
        }
        return WeatherForecast::neutral();
    }
    weather::resolve_weather(source, config.weather_location.as_ref())
}

pub fn run(
    config: &RaceConfig,
    sessions: &dyn SessionSource,
    weather_source: Option<&dyn WeatherSource>,
    store: &PredictionStore,
) -> Result<RunSummary> {
    config.validate()?;
    let feature_list = FeatureList::parse(&config.feature_list)?;
    let params = config.effective_model_params();
    validate_model_params(&params)?;
    let registry = DriverRegistry::global();
    let field = resolve_field(config, registry)?;

    let training = &config.training_race;
    let laps = sessions.fetch_session(
        training.year,
        &training.session_identifier,
        &training.session_type,
    )?;
    tracing::info!(laps = laps.len(), "historical session loaded");
    let aligned: HashMap<String, AlignedHistoricalRecord> = historical::align(&laps, registry)
        .into_iter()
        .map(|rec| (rec.identity.code.clone(), rec))
        .collect();

    let mut inputs: Vec<DriverInputs> = field
        .into_iter()
        .map(|(identity, qualifying_time)| {
            let historical = aligned.get(&identity.code).cloned();
            if historical.is_none() {
                tracing::warn!(
                    driver = %identity.code,
                    "driver absent from historical session, not used for training"
                );
            }
            DriverInputs {
                identity,
                qualifying_time,
                qualifying_imputed: false,
                historical,
            }
        })
        .collect();
    features::fill_missing_qualifying(&mut inputs);

    let forecast = resolve_race_weather(config, weather_source);
    let identities: Vec<DriverIdentity> = inputs.iter().map(|d| d.identity.clone()).collect();
    let (season_points, mut ignored_driver_keys) =
        by_code("season_points", &config.season_points, registry, &identities);
    let (position_change, ignored) = by_code(
        "average_position_change",
        &config.average_position_change,
        registry,
        &identities,
    );
    ignored_driver_keys.extend(ignored);
    let ctx = RaceContext::new(forecast, season_points, position_change, &identities);

    let training_inputs: Vec<DriverInputs> = inputs
        .iter()
        .filter(|d| d.historical.is_some())
        .cloned()
        .collect();
    let targets: Vec<f64> = training_inputs
        .iter()
        .filter_map(|d| d.historical.as_ref().map(|h| h.lap_time))
        .collect();
    let training_matrix = features::build(&feature_list, &training_inputs, &ctx);
    let model = trainer::train(&training_matrix, &targets, &params)?;

    let current_matrix = features::build(model.features(), &inputs, &ctx);
    let predictions = predictor::predict(&model, &current_matrix, &inputs)?;

    let document = PredictionDocument::new(
        config.race_name.clone(),
        config.year,
        predictions,
        model.mae,
        model.feature_names(),
        model.mae_held_out,
    );
    let validated = schema::validate_document(&document)?;
    let path = store.write(&config.race_id, &validated)?;

    Ok(RunSummary {
        path,
        document: validated.into_inner(),
        weather: forecast,
        training_rows: training_matrix.n_rows(),
        imputed_qualifying: inputs
            .iter()
            .filter(|d| d.qualifying_imputed)
            .map(|d| d.identity.full_name.clone())
            .collect(),
        ignored_driver_keys,
    })
}
