use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, Opts, TextEncoder};

static WEBHOOK_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "event_ingestor_webhook_requests_total",
            "Webhook submissions handled by event-ingestor, by outcome",
        ),
        &["outcome"],
    )
    .expect("failed to create event_ingestor_webhook_requests_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register event_ingestor_webhook_requests_total");
    counter
});

/// Webhook outcome label values
pub mod outcome {
    pub const ACCEPTED: &str = "accepted";
    pub const REJECTED: &str = "rejected";
    pub const PUBLISH_FAILED: &str = "publish_failed";
}

pub fn record_webhook(outcome: &str) {
    WEBHOOK_REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Render the default registry in the Prometheus text format
pub fn render() -> Result<(String, Vec<u8>), prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok((encoder.format_type().to_string(), buffer))
}
