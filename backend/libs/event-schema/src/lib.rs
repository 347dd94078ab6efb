//! Event schema shared by the DevSync ingestor and processor
//!
//! Defines the raw webhook shape accepted at ingress, the canonical event that
//! travels over Kafka, and the record read back from PostgreSQL.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

mod error;
pub mod webhook;

pub use error::NormalizationError;
pub use webhook::RawWebhookEvent;

/// Kafka topic carrying normalized push events
pub const EVENTS_TOPIC: &str = "devsync.events.raw";

/// Default consumer group for the event processor
pub const PROCESSOR_GROUP_ID: &str = "event-processor-group";

/// Sub-second digits kept on `received_at` (PostgreSQL TIMESTAMPTZ resolution)
pub const TIMESTAMP_PRECISION: u16 = 6;

/// Canonical push event, one JSON document per Kafka message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub repo_name: String,
    pub pusher_name: String,
    /// Assigned at ingress, never at persistence
    pub received_at: DateTime<Utc>,
}

impl NormalizedEvent {
    pub fn new(
        repo_name: impl Into<String>,
        pusher_name: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            repo_name: repo_name.into(),
            pusher_name: pusher_name.into(),
            received_at: received_at.trunc_subsecs(TIMESTAMP_PRECISION),
        }
    }

    /// Decode a broker payload and re-check the non-empty invariant
    pub fn from_slice(payload: &[u8]) -> Result<Self, NormalizationError> {
        let event: NormalizedEvent = serde_json::from_slice(payload)?;

        if event.repo_name.is_empty() {
            return Err(NormalizationError::MissingField("repo_name"));
        }
        if event.pusher_name.is_empty() {
            return Err(NormalizationError::MissingField("pusher_name"));
        }

        Ok(event)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Content fingerprint used as the idempotency key on insert
    ///
    /// Redeliveries of one broker message hash identically; separate ingress
    /// calls differ through `received_at`. Fields are length-prefixed so
    /// `("a/b", "c")` and `("a", "b/c")` never collide.
    pub fn fingerprint(&self) -> String {
        let received_at = self
            .received_at
            .to_rfc3339_opts(SecondsFormat::Micros, true);

        let mut hasher = Sha256::new();
        for part in [
            self.repo_name.as_str(),
            self.pusher_name.as_str(),
            received_at.as_str(),
        ] {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Row stored in `github_events`; immutable once written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedEvent {
    pub id: i64,
    pub repo_name: String,
    pub pusher_name: String,
    pub received_at: DateTime<Utc>,
}

impl PersistedEvent {
    pub fn from_event(id: i64, event: NormalizedEvent) -> Self {
        Self {
            id,
            repo_name: event.repo_name,
            pusher_name: event.pusher_name,
            received_at: event.received_at,
        }
    }
}
