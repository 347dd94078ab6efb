use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use event_schema::NormalizationError;
use rdkafka::error::KafkaError;
use serde::Serialize;
use thiserror::Error;

/// Failure to read from (or commit to) the broker; always transient for the loop
#[derive(Debug, Error)]
pub enum ConsumeError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    #[error("Broker error: {0}")]
    Broker(String),
}

/// Broker message that cannot become a `NormalizedEvent`; the message is dropped
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Message has no payload")]
    EmptyPayload,

    #[error("Invalid event: {0}")]
    Invalid(#[from] NormalizationError),
}

/// Store read/write failure
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Failure surfaced to `GET /events` callers
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Failed to fetch events: {0}")]
    Store(#[from] StoreError),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

impl ResponseError for QueryError {
    fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn error_response(&self) -> HttpResponse {
        let code = self.status_code();
        // Driver details stay in the logs
        HttpResponse::build(code).json(ErrorResponse {
            error: "Failed to fetch events".to_string(),
            code: code.as_u16(),
        })
    }
}
