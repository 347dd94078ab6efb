//! Error types for webhook normalization

use thiserror::Error;

/// Reasons an inbound webhook body cannot become a [`crate::NormalizedEvent`]
#[derive(Error, Debug)]
pub enum NormalizationError {
    /// Body is not valid JSON or does not match the expected object shape
    #[error("Malformed JSON payload: {0}")]
    MalformedJson(#[from] serde_json::Error),

    /// A required field is missing or blank after trimming
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}
