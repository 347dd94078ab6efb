//! Event processor
//!
//! Consumes normalized push events from Kafka, stores them in PostgreSQL and
//! serves them back over `GET /events`.

pub mod config;
pub mod consumer;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod query;
pub mod store;

use actix_web::web;

pub use config::{Config, KafkaConsumerConfig};
pub use consumer::{
    CommitPolicy, ConsumerSettings, Delivery, EventConsumer, HandleOutcome, KafkaMessageSource,
    MessageSource,
};
pub use error::{ConsumeError, DecodeError, QueryError, StoreError};
pub use query::{EventsQuery, QueryService};
pub use store::{EventFilter, EventPage, EventStore, Pagination, PersistOutcome, PgEventStore};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub query: QueryService,
}

/// Register the processor routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/events", web::get().to(handlers::list_events))
        .route("/health", web::get().to(handlers::health))
        .route("/metrics", web::get().to(handlers::metrics_handler));
}
