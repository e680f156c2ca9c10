use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::error::{PipelineError, Result};
use crate::features::{FeatureList, FeatureMatrix};
use crate::gbm::{GbmParams, GradientBoostingRegressor};
use crate::race_config::ModelParams;

pub const HOLDOUT_FRACTION: f64 = 0.2;
pub const MIN_ROWS_FOR_HOLDOUT: usize = 5;

/// A fitted regressor bound to the exact feature order it was trained on.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    regressor: GradientBoostingRegressor,
    features: FeatureList,
    pub mae: f64,
    pub mae_held_out: bool,
}

impl TrainedModel {
    pub fn features(&self) -> &FeatureList {
        &self.features
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.features.names()
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.regressor.predict_row(row)
    }
}

fn check_inputs(matrix: &FeatureMatrix, targets: &[f64]) -> Result<()> {
    if matrix.rows.is_empty() {
        return Err(PipelineError::ModelTraining(
            "training matrix has zero rows (no driver has historical data)".to_string(),
        ));
    }
    if matrix.rows.len() != targets.len() {
        return Err(PipelineError::ModelTraining(format!(
            "{} training rows but {} targets",
            matrix.rows.len(),
            targets.len()
        )));
    }
    let width = matrix.features.len();
    for (row, code) in matrix.rows.iter().zip(&matrix.drivers) {
        if row.len() != width {
            return Err(PipelineError::ModelTraining(format!(
                "row for {code} has {} cells, expected {width}",
                row.len()
            )));
        }
        if row.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::ModelTraining(format!(
                "row for {code} has a non-finite value"
            )));
        }
    }
    if let Some(bad) = targets.iter().position(|t| !t.is_finite()) {
        return Err(PipelineError::ModelTraining(format!(
            "target {bad} is not finite"
        )));
    }
    Ok(())
}

/// Returns whether any column varies over `rows`, logging the constant ones.
fn has_varying_column(matrix: &FeatureMatrix, rows: &[usize]) -> bool {
    let mut any = false;
    for (col, feature) in matrix.features.features().iter().enumerate() {
        let first = matrix.rows[rows[0]][col];
        if rows.iter().any(|&r| matrix.rows[r][col] != first) {
            any = true;
        } else {
            tracing::warn!(%feature, value = first, "feature is constant across training rows");
        }
    }
    any
}

fn mean_absolute_error(model: &GradientBoostingRegressor, x: &[&Vec<f64>], y: &[f64]) -> f64 {
    let total: f64 = x
        .iter()
        .zip(y)
        .map(|(row, t)| (model.predict_row(row) - t).abs())
        .sum();
    total / y.len() as f64
}

pub fn train(matrix: &FeatureMatrix, targets: &[f64], params: &ModelParams) -> Result<TrainedModel> {
    check_inputs(matrix, targets)?;

    let n = matrix.rows.len();
    let mut order: Vec<usize> = (0..n).collect();
    let (fit_idx, eval_idx, held_out) = if n >= MIN_ROWS_FOR_HOLDOUT {
        order.shuffle(&mut StdRng::seed_from_u64(params.random_state));
        let n_eval = (n as f64 * HOLDOUT_FRACTION).ceil() as usize;
        let fit = order.split_off(n_eval);
        (fit, order, true)
    } else {
        tracing::warn!(
            rows = n,
            min = MIN_ROWS_FOR_HOLDOUT,
            "too few drivers for a held-out split, reporting training MAE"
        );
        (order.clone(), order, false)
    };

    if !has_varying_column(matrix, &fit_idx) {
        return Err(PipelineError::ModelTraining(
            "every feature is constant across the training rows".to_string(),
        ));
    }

    let fit_x: Vec<Vec<f64>> = fit_idx.iter().map(|&i| matrix.rows[i].clone()).collect();
    let fit_y: Vec<f64> = fit_idx.iter().map(|&i| targets[i]).collect();
    let gbm_params = GbmParams {
        n_estimators: params.n_estimators,
        learning_rate: params.learning_rate,
        max_depth: params.max_depth,
        subsample: params.subsample,
        seed: params.random_state,
    };
    let regressor = GradientBoostingRegressor::fit(&fit_x, &fit_y, &gbm_params)?;

    let eval_x: Vec<&Vec<f64>> = eval_idx.iter().map(|&i| &matrix.rows[i]).collect();
    let eval_y: Vec<f64> = eval_idx.iter().map(|&i| targets[i]).collect();
    let mae = mean_absolute_error(&regressor, &eval_x, &eval_y);

    for (feature, importance) in matrix
        .features
        .features()
        .iter()
        .zip(regressor.feature_importances())
    {
        tracing::info!(%feature, importance = %format!("{importance:.3}"), "feature importance");
    }
    tracing::info!(
        fit_rows = fit_idx.len(),
        eval_rows = eval_idx.len(),
        mae,
        held_out,
        "model trained"
    );

    Ok(TrainedModel {
        regressor,
        features: matrix.features.clone(),
        mae,
        mae_held_out: held_out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: Vec<Vec<f64>>, names: &[&str]) -> FeatureMatrix {
        let names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        FeatureMatrix {
            features: FeatureList::parse(&names).unwrap(),
            drivers: (0..rows.len()).map(|i| format!("D{i}")).collect(),
            rows,
        }
    }

    #[test]
    fn empty_matrix_is_training_error() {
        let m = matrix(Vec::new(), &["QualifyingTime (s)"]);
        let err = train(&m, &[], &ModelParams::default()).unwrap_err();
        assert!(matches!(err, PipelineError::ModelTraining(_)));
    }

    #[test]
    fn constant_features_are_rejected() {
        let m = matrix(vec![vec![1.0], vec![1.0], vec![1.0]], &["Temperature"]);
        let err = train(&m, &[90.0, 91.0, 92.0], &ModelParams::default()).unwrap_err();
        assert!(matches!(err, PipelineError::ModelTraining(msg) if msg.contains("constant")));
    }

    #[test]
    fn small_sets_report_training_mae() {
        let m = matrix(vec![vec![74.5], vec![75.1], vec![75.8]], &["QualifyingTime (s)"]);
        let model = train(&m, &[90.0, 91.0, 92.0], &ModelParams::default()).unwrap();
        assert!(!model.mae_held_out);
        assert!(model.mae < 0.01);
        assert_eq!(model.feature_names(), vec!["QualifyingTime (s)".to_string()]);
    }

    #[test]
    fn larger_sets_hold_out_and_are_deterministic() {
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![70.0 + i as f64, (i % 3) as f64]).collect();
        let targets: Vec<f64> = rows.iter().map(|r| r[0] * 1.2).collect();
        let m = matrix(rows, &["QualifyingTime (s)", "SeasonPoints"]);
        let a = train(&m, &targets, &ModelParams::default()).unwrap();
        let b = train(&m, &targets, &ModelParams::default()).unwrap();
        assert!(a.mae_held_out);
        assert_eq!(a.mae, b.mae);
        assert_eq!(a.predict_row(&[73.0, 1.0]), b.predict_row(&[73.0, 1.0]));
    }

    #[test]
    fn non_finite_target_is_rejected() {
        let m = matrix(vec![vec![1.0], vec![2.0]], &["Temperature"]);
        assert!(train(&m, &[1.0, f64::NAN], &ModelParams::default()).is_err());
        assert!(train(&m, &[1.0], &ModelParams::default()).is_err());
    }
}
