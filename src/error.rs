use thiserror::Error;

/// Exit code for a rejected command line, kept apart from every `PipelineError` code.
pub const USAGE_EXIT_CODE: i32 = 64;

/// Fatal failures of a prediction run. Each variant aborts the run before
/// anything is persisted.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("data source error: {0}")]
    DataSource(String),

    #[error("feature derivation error: {0}")]
    FeatureDerivation(String),

    #[error("model training error: {0}")]
    ModelTraining(String),

    #[error("feature mismatch: {0}")]
    FeatureMismatch(String),

    #[error("schema validation error: {0}")]
    SchemaValidation(String),

    #[error("prediction store error: {0}")]
    Persist(String),
}

impl PipelineError {
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Config(_) => 2,
            PipelineError::DataSource(_) => 3,
            PipelineError::FeatureDerivation(_) => 4,
            PipelineError::ModelTraining(_) => 5,
            PipelineError::FeatureMismatch(_) => 6,
            PipelineError::SchemaValidation(_) => 7,
            PipelineError::Persist(_) => 8,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Config(_) => "ConfigError",
            PipelineError::DataSource(_) => "DataSourceError",
            PipelineError::FeatureDerivation(_) => "FeatureDerivationError",
            PipelineError::ModelTraining(_) => "ModelTrainingError",
            PipelineError::FeatureMismatch(_) => "FeatureMismatchError",
            PipelineError::SchemaValidation(_) => "SchemaValidationError",
            PipelineError::Persist(_) => "PersistError",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::{PipelineError, USAGE_EXIT_CODE};

    #[test]
    fn exit_codes_are_distinct_and_nonzero() {
        let errs = [
            PipelineError::Config(String::new()),
            PipelineError::DataSource(String::new()),
            PipelineError::FeatureDerivation(String::new()),
            PipelineError::ModelTraining(String::new()),
            PipelineError::FeatureMismatch(String::new()),
            PipelineError::SchemaValidation(String::new()),
            PipelineError::Persist(String::new()),
        ];
        let mut codes: Vec<i32> = errs.iter().map(|e| e.exit_code()).collect();
        assert!(codes.iter().all(|c| *c != 0 && *c != USAGE_EXIT_CODE));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errs.len());
    }

    #[test]
    fn display_carries_detail() {
        let err = PipelineError::SchemaValidation("predictions[0].driver is empty".to_string());
        assert!(err.to_string().contains("predictions[0].driver"));
        assert_eq!(err.kind(), "SchemaValidationError");
    }
}
