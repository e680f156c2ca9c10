use crate::document::{PredictionRecord, round3};
use crate::error::{PipelineError, Result};
use crate::features::{DriverInputs, FeatureMatrix};
use crate::trainer::TrainedModel;

fn check_alignment(
    model: &TrainedModel,
    matrix: &FeatureMatrix,
    drivers: &[DriverInputs],
) -> Result<()> {
    if &matrix.features != model.features() {
        return Err(PipelineError::FeatureMismatch(format!(
            "model trained on [{}] but matrix has [{}]",
            model.feature_names().join(", "),
            matrix.features.names().join(", ")
        )));
    }
    let width = model.features().len();
    if let Some((idx, row)) = matrix.rows.iter().enumerate().find(|(_, r)| r.len() != width) {
        return Err(PipelineError::FeatureMismatch(format!(
            "row {idx} has {} columns, model expects {width}",
            row.len()
        )));
    }
    if matrix.rows.len() != drivers.len() || matrix.drivers.len() != drivers.len() {
        return Err(PipelineError::FeatureMismatch(format!(
            "matrix has {} rows for {} drivers",
            matrix.rows.len(),
            drivers.len()
        )));
    }
    for (code, driver) in matrix.drivers.iter().zip(drivers) {
        if *code != driver.identity.code {
            return Err(PipelineError::FeatureMismatch(format!(
                "matrix row for {code} lines up with driver {}",
                driver.identity.code
            )));
        }
    }
    Ok(())
}

/// One record per matrix row, in matrix order.
pub fn predict(
    model: &TrainedModel,
    matrix: &FeatureMatrix,
    drivers: &[DriverInputs],
) -> Result<Vec<PredictionRecord>> {
    check_alignment(model, matrix, drivers)?;

    let mut out = Vec::with_capacity(drivers.len());
    for (row, driver) in matrix.rows.iter().zip(drivers) {
        let code = &driver.identity.code;
        let qualifying_time = driver.qualifying_time.ok_or_else(|| {
            PipelineError::FeatureDerivation(format!("no qualifying time for {code}"))
        })?;
        let mut predicted = model.predict_row(row);
        if predicted < 0.0 {
            tracing::warn!(driver = %code, predicted, "negative prediction clamped to 0");
            predicted = 0.0;
        }
        out.push(PredictionRecord {
            driver: driver.identity.full_name.clone(),
            predicted_time: round3(predicted),
            qualifying_time: round3(qualifying_time),
            team: driver.identity.team.clone(),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::drivers::DriverRegistry;
    use crate::features::{FeatureList, RaceContext, build};
    use crate::race_config::ModelParams;
    use crate::trainer::train;
    use crate::weather::WeatherForecast;

    fn driver(code: &str, q: f64) -> DriverInputs {
        DriverInputs {
            identity: DriverRegistry::global().resolve(code).identity,
            qualifying_time: Some(q),
            qualifying_imputed: false,
            historical: None,
        }
    }

    fn list(names: &[&str]) -> FeatureList {
        let names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        FeatureList::parse(&names).unwrap()
    }

    fn fixture() -> (TrainedModel, Vec<DriverInputs>, RaceContext) {
        let drivers = vec![driver("VER", 74.5), driver("NOR", 75.096), driver("HAM", 75.8)];
        let ctx = RaceContext::new(
            WeatherForecast::neutral(),
            HashMap::from([("VER".to_string(), 10.0), ("NOR".to_string(), 25.0)]),
            HashMap::new(),
            &[],
        );
        let features = list(&["QualifyingTime (s)", "SeasonPoints"]);
        let matrix = build(&features, &drivers, &ctx);
        let model = train(&matrix, &[90.0, 90.6, 91.3], &ModelParams::default()).unwrap();
        (model, drivers, ctx)
    }

    #[test]
    fn predictions_follow_matrix_order() {
        let (model, drivers, ctx) = fixture();
        let matrix = build(model.features(), &drivers, &ctx);
        let preds = predict(&model, &matrix, &drivers).unwrap();
        let names: Vec<&str> = preds.iter().map(|p| p.driver.as_str()).collect();
        assert_eq!(names, vec!["Max Verstappen", "Lando Norris", "Lewis Hamilton"]);
        assert_eq!(preds[1].qualifying_time, 75.096);
        assert!(preds[0].predicted_time < preds[1].predicted_time);
        assert!(preds[1].predicted_time < preds[2].predicted_time);
    }

    #[test]
    fn reordered_columns_are_a_mismatch() {
        let (model, drivers, ctx) = fixture();
        let swapped = build(&list(&["SeasonPoints", "QualifyingTime (s)"]), &drivers, &ctx);
        let err = predict(&model, &swapped, &drivers).unwrap_err();
        assert!(matches!(err, PipelineError::FeatureMismatch(_)));
    }

    #[test]
    fn width_and_driver_mismatches_fail() {
        let (model, drivers, ctx) = fixture();
        let mut matrix = build(model.features(), &drivers, &ctx);
        matrix.rows[0].pop();
        assert!(matches!(
            predict(&model, &matrix, &drivers),
            Err(PipelineError::FeatureMismatch(_))
        ));

        let matrix = build(model.features(), &drivers, &ctx);
        assert!(matches!(
            predict(&model, &matrix, &drivers[..2]),
            Err(PipelineError::FeatureMismatch(_))
        ));
    }
}
