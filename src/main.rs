use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use f1_predict::error::{PipelineError, USAGE_EXIT_CODE};
use f1_predict::persist::PredictionStore;
use f1_predict::pipeline::{self, RunSummary};
use f1_predict::race_config::load_race_config;
use f1_predict::session_source::{FileSessionSource, OpenF1Source, SessionSource};
use f1_predict::settings::Settings;
use f1_predict::weather::{OpenWeatherSource, WeatherOrigin, WeatherSource};

#[derive(Parser)]
#[command(name = "f1_predict")]
#[command(version, about = "Predict race times for one configured race", long_about = None)]
struct Cli {
    /// Race id, e.g. `japan` (reads `<races-dir>/<race>.json`)
    #[arg(long)]
    race: String,

    /// Directory with race configs [env: F1_RACES_DIR]
    #[arg(long)]
    races_dir: Option<PathBuf>,

    /// Prediction store directory [env: F1_PREDICTIONS_DIR]
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Read historical laps from a JSON snapshot instead of OpenF1
    #[arg(long)]
    laps_file: Option<PathBuf>,

    /// Debug logging unless RUST_LOG is set
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(cli: &Cli) -> Result<RunSummary, PipelineError> {
    let settings = Settings::from_env();
    let races_dir = cli.races_dir.clone().unwrap_or(settings.races_dir);
    let output_dir = cli.output_dir.clone().unwrap_or(settings.predictions_dir);

    let config = load_race_config(&races_dir, &cli.race)?;
    tracing::info!(race_id = %config.race_id, race = %config.race_name, "race config loaded");

    let sessions: Box<dyn SessionSource> = match &cli.laps_file {
        Some(path) => Box::new(FileSessionSource::new(path)),
        None => Box::new(OpenF1Source::new(settings.openf1_base_url, settings.retry)),
    };
    let weather = settings
        .openweather_api_key
        .map(|key| OpenWeatherSource::new(key, settings.retry));
    let store = PredictionStore::new(output_dir);

    pipeline::run(
        &config,
        sessions.as_ref(),
        weather.as_ref().map(|w| w as &dyn WeatherSource),
        &store,
    )
}

fn main() -> ExitCode {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            // --help and --version arrive here too and are not failures.
            if !err.use_stderr() {
                return ExitCode::SUCCESS;
            }
            return ExitCode::from(USAGE_EXIT_CODE as u8);
        }
    };
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(summary) => {
            let doc = &summary.document;
            println!("Predictions written to {}", summary.path.display());
            println!(
                "{} ({}) MAE {:.3}s{}",
                doc.race,
                doc.year,
                doc.model_metadata.mae,
                if doc.model_metadata.mae_held_out {
                    ""
                } else {
                    " (training set)"
                }
            );
            if summary.weather.origin == WeatherOrigin::NeutralDefault {
                println!("Weather: neutral defaults");
            }
            if !summary.imputed_qualifying.is_empty() {
                println!("Qualifying imputed: {}", summary.imputed_qualifying.join(", "));
            }
            if !summary.ignored_driver_keys.is_empty() {
                println!("Ignored driver keys: {}", summary.ignored_driver_keys.join(", "));
            }
            for (pos, p) in doc.podium().enumerate() {
                println!(
                    "P{}  {:<24} {:<14} {:>9.3}s",
                    pos + 1,
                    p.driver,
                    p.team,
                    p.predicted_time
                );
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(kind = err.kind(), "{err}");
            eprintln!("[ERROR] {err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}
