pub mod document;
pub mod drivers;
pub mod error;
pub mod features;
pub mod gbm;
pub mod historical;
pub mod http_client;
pub mod persist;
pub mod pipeline;
pub mod predictor;
pub mod race_config;
pub mod schema;
pub mod session_source;
pub mod settings;
pub mod trainer;
pub mod weather;
