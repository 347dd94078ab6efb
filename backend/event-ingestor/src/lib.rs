//! Event ingestor
//!
//! Accepts repository push webhooks, normalizes them and appends them to the
//! Kafka events topic. Persistence happens downstream in `event-processor`.

pub mod config;
pub mod error;
pub mod handlers;
pub mod ingress;
pub mod metrics;
pub mod publisher;

use actix_web::web;

pub use config::{Config, KafkaProducerConfig};
pub use error::{IngestError, PublishError};
pub use ingress::IngressReceiver;
pub use publisher::{EventPublisher, KafkaEventPublisher};

/// Largest webhook body accepted (push payloads with many commits get big)
pub const MAX_WEBHOOK_BYTES: usize = 5 * 1024 * 1024;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub receiver: IngressReceiver,
}

/// Register the ingestor routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::PayloadConfig::new(MAX_WEBHOOK_BYTES))
        .route("/webhook", web::post().to(handlers::receive_webhook))
        .route("/health", web::get().to(handlers::health))
        .route("/metrics", web::get().to(handlers::metrics_handler));
}
