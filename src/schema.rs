use serde_json::{Map, Value};

use crate::document::PredictionDocument;
use crate::error::{PipelineError, Result};

/// A document that passed schema validation. Only `validate` and
/// `validate_document` construct it, and the prediction store only accepts it.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedDocument(PredictionDocument);

impl ValidatedDocument {
    pub fn document(&self) -> &PredictionDocument {
        &self.0
    }

    pub fn into_inner(self) -> PredictionDocument {
        self.0
    }
}

fn fail(detail: impl Into<String>) -> PipelineError {
    PipelineError::SchemaValidation(detail.into())
}

fn require<'a>(obj: &'a Map<String, Value>, key: &str, at: &str) -> Result<&'a Value> {
    obj.get(key)
        .ok_or_else(|| fail(format!("{at}: missing required key '{key}'")))
}

fn require_str<'a>(obj: &'a Map<String, Value>, key: &str, at: &str) -> Result<&'a str> {
    require(obj, key, at)?
        .as_str()
        .ok_or_else(|| fail(format!("{at}.{key} must be a string")))
}

fn require_number(obj: &Map<String, Value>, key: &str, at: &str) -> Result<f64> {
    require(obj, key, at)?
        .as_f64()
        .ok_or_else(|| fail(format!("{at}.{key} must be a number")))
}

fn check_prediction(value: &Value, idx: usize) -> Result<()> {
    let at = format!("predictions[{idx}]");
    let obj = value
        .as_object()
        .ok_or_else(|| fail(format!("{at} must be an object")))?;
    if require_str(obj, "driver", &at)?.trim().is_empty() {
        return Err(fail(format!("{at}.driver is empty")));
    }
    require_number(obj, "predicted_time", &at)?;
    require_number(obj, "qualifying_time", &at)?;
    require_str(obj, "team", &at)?;
    Ok(())
}

fn check_metadata(value: &Value) -> Result<()> {
    let at = "model_metadata";
    let obj = value
        .as_object()
        .ok_or_else(|| fail("model_metadata must be an object"))?;
    require_number(obj, "mae", at)?;
    let features = require(obj, "features_used", at)?
        .as_array()
        .ok_or_else(|| fail("model_metadata.features_used must be a list"))?;
    if let Some(idx) = features.iter().position(|f| !f.is_string()) {
        return Err(fail(format!(
            "model_metadata.features_used[{idx}] must be a string"
        )));
    }
    require_str(obj, "model_type", at)?;
    Ok(())
}

/// Checks the raw JSON shape and returns the typed document. Integer times
/// are accepted and read back as floats.
pub fn validate(value: &Value) -> Result<ValidatedDocument> {
    let root = value
        .as_object()
        .ok_or_else(|| fail("document must be a JSON object"))?;
    require_str(root, "race", "document")?;
    require(root, "year", "document")?
        .as_i64()
        .ok_or_else(|| fail("document.year must be an integer"))?;
    let predictions = require(root, "predictions", "document")?
        .as_array()
        .ok_or_else(|| fail("document.predictions must be a list"))?;
    for (idx, p) in predictions.iter().enumerate() {
        check_prediction(p, idx)?;
    }
    check_metadata(require(root, "model_metadata", "document")?)?;

    let doc = serde_json::from_value::<PredictionDocument>(value.clone())
        .map_err(|err| fail(format!("document does not match schema: {err}")))?;
    Ok(ValidatedDocument(doc))
}

pub fn validate_document(doc: &PredictionDocument) -> Result<ValidatedDocument> {
    let value = serde_json::to_value(doc)
        .map_err(|err| fail(format!("document is not serializable: {err}")))?;
    validate(&value)
}
