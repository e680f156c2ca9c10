use std::collections::HashMap;

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use f1_predict::drivers::DriverRegistry;
use f1_predict::features::{DriverInputs, FeatureList, RaceContext, build};
use f1_predict::gbm::{GbmParams, GradientBoostingRegressor};
use f1_predict::historical::align;
use f1_predict::session_source::LapRecord;
use f1_predict::weather::WeatherForecast;

const CODES: [&str; 20] = [
    "VER", "TSU", "NOR", "PIA", "LEC", "HAM", "RUS", "ANT", "ALO", "STR", "GAS", "DOO", "OCO",
    "BEA", "ALB", "SAI", "HUL", "BOR", "HAD", "LAW",
];

fn sample_laps(laps_per_driver: usize) -> Vec<LapRecord> {
    let mut out = Vec::with_capacity(CODES.len() * laps_per_driver);
    for (i, code) in CODES.iter().enumerate() {
        for lap in 0..laps_per_driver {
            let t = 90.0 + i as f64 * 0.15 + (lap % 7) as f64 * 0.08;
            out.push(LapRecord {
                driver: code.to_string(),
                lap_time: Some(t),
                sector1: Some(t * 0.31),
                sector2: Some(t * 0.36),
                sector3: Some(t * 0.33),
            });
        }
    }
    out
}

fn sample_inputs() -> Vec<DriverInputs> {
    let registry = DriverRegistry::global();
    let aligned = align(&sample_laps(50), registry);
    aligned
        .into_iter()
        .enumerate()
        .map(|(i, rec)| DriverInputs {
            identity: rec.identity.clone(),
            qualifying_time: if i % 5 == 0 { None } else { Some(86.0 + i as f64 * 0.1) },
            qualifying_imputed: false,
            historical: Some(rec),
        })
        .collect()
}

fn feature_list() -> FeatureList {
    let names: Vec<String> = [
        "QualifyingTime (s)",
        "TotalSectorTime (s)",
        "CleanAirRacePace (s)",
        "TeamPerformanceScore",
        "WetPerformanceFactor",
        "RainProbability",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    FeatureList::parse(&names).expect("known features")
}

fn bench_align(c: &mut Criterion) {
    let laps = sample_laps(60);
    c.bench_function("align_historical_laps", |b| {
        b.iter(|| {
            let aligned = align(black_box(&laps), DriverRegistry::global());
            black_box(aligned.len());
        })
    });
}

fn bench_matrix_build(c: &mut Criterion) {
    let inputs = sample_inputs();
    let identities: Vec<_> = inputs.iter().map(|d| d.identity.clone()).collect();
    let ctx = RaceContext::new(
        WeatherForecast::neutral(),
        HashMap::new(),
        HashMap::new(),
        &identities,
    );
    let features = feature_list();
    c.bench_function("feature_matrix_build", |b| {
        b.iter(|| {
            let matrix = build(black_box(&features), black_box(&inputs), &ctx);
            black_box(matrix.n_rows());
        })
    });
}

fn bench_gbm_fit(c: &mut Criterion) {
    let inputs = sample_inputs();
    let identities: Vec<_> = inputs.iter().map(|d| d.identity.clone()).collect();
    let ctx = RaceContext::new(
        WeatherForecast::neutral(),
        HashMap::new(),
        HashMap::new(),
        &identities,
    );
    let matrix = build(&feature_list(), &inputs, &ctx);
    let targets: Vec<f64> = inputs
        .iter()
        .filter_map(|d| d.historical.as_ref().map(|h| h.lap_time))
        .collect();
    let params = GbmParams {
        n_estimators: 200,
        learning_rate: 0.1,
        max_depth: Some(3),
        subsample: 1.0,
        seed: 42,
    };
    c.bench_function("gbm_fit_200_trees", |b| {
        b.iter(|| {
            let model =
                GradientBoostingRegressor::fit(black_box(&matrix.rows), black_box(&targets), &params)
                    .unwrap();
            black_box(model.n_trees());
        })
    });
}

criterion_group!(perf, bench_align, bench_matrix_build, bench_gbm_fit);
criterion_main!(perf);
