use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, TextEncoder};

static MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "event_processor_messages_total",
            "Broker messages handled by event-processor, by outcome",
        ),
        &["outcome"],
    )
    .expect("failed to create event_processor_messages_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register event_processor_messages_total");
    counter
});

static POLL_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "event_processor_poll_errors_total",
        "Errors returned while polling the events topic",
    )
    .expect("failed to create event_processor_poll_errors_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register event_processor_poll_errors_total");
    counter
});

static COMMIT_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "event_processor_commit_errors_total",
        "Failed offset commits or rewinds",
    )
    .expect("failed to create event_processor_commit_errors_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register event_processor_commit_errors_total");
    counter
});

/// Message outcome label values
pub mod outcome {
    pub const PERSISTED: &str = "persisted";
    pub const DUPLICATE: &str = "duplicate";
    pub const DECODE_FAILED: &str = "decode_failed";
    pub const PERSIST_FAILED: &str = "persist_failed";
}

pub fn record_message(outcome: &str) {
    MESSAGES_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_poll_error() {
    POLL_ERRORS_TOTAL.inc();
}

pub fn record_commit_error() {
    COMMIT_ERRORS_TOTAL.inc();
}

/// Render the default registry in the Prometheus text format
pub fn render() -> Result<(String, Vec<u8>), prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok((encoder.format_type().to_string(), buffer))
}
