use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use event_schema::NormalizationError;
use rdkafka::error::KafkaError;
use thiserror::Error;

/// Failure to append an event to the broker
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Delivery failed or was not acknowledged within the publish timeout
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    #[error("Broker unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of a rejected webhook submission
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Validation error: {0}")]
    Validation(#[from] NormalizationError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),
}

impl ResponseError for IngestError {
    fn status_code(&self) -> StatusCode {
        match self {
            IngestError::Validation(_) => StatusCode::BAD_REQUEST,
            IngestError::Publish(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            IngestError::Validation(_) => "Invalid payload",
            IngestError::Publish(_) => "Failed to publish event",
        };

        HttpResponse::build(self.status_code())
            .content_type("text/plain; charset=utf-8")
            .body(body)
    }
}
