//! Webhook ingress: decode, normalize, publish.
//!
//! A submission causes at most one publish attempt. Invalid bodies never reach
//! the publisher, and a failed publish is returned without retrying.

use chrono::Utc;
use event_schema::{NormalizedEvent, RawWebhookEvent};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::IngestError;
use crate::metrics::{outcome, record_webhook};
use crate::publisher::EventPublisher;

#[derive(Clone)]
pub struct IngressReceiver {
    publisher: Arc<dyn EventPublisher>,
}

impl IngressReceiver {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }

    /// Handle one webhook body, returning the event that was published
    pub async fn receive(&self, body: &[u8]) -> Result<NormalizedEvent, IngestError> {
        let event = match RawWebhookEvent::from_slice(body)
            .and_then(|raw| raw.normalize(Utc::now()))
        {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, body_len = body.len(), "Rejected webhook payload");
                record_webhook(outcome::REJECTED);
                return Err(e.into());
            }
        };

        if let Err(e) = self.publisher.publish(&event).await {
            warn!(
                error = %e,
                repo = %event.repo_name,
                pusher = %event.pusher_name,
                "Failed to send event to Kafka"
            );
            record_webhook(outcome::PUBLISH_FAILED);
            return Err(e.into());
        }

        info!(
            repo = %event.repo_name,
            pusher = %event.pusher_name,
            received_at = %event.received_at,
            "Sent event to Kafka"
        );
        record_webhook(outcome::ACCEPTED);

        Ok(event)
    }
}
