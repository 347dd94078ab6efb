//! Raw push webhook payload as delivered by the repository host.
//!
//! Only `repository.full_name` and `pusher.name` are read; every other field
//! of the provider payload is ignored by serde.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{NormalizationError, NormalizedEvent};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRepository {
    #[serde(default)]
    pub full_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPusher {
    #[serde(default)]
    pub name: String,
}

/// Loosely-typed push notification body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawWebhookEvent {
    #[serde(default)]
    pub repository: RawRepository,
    #[serde(default)]
    pub pusher: RawPusher,
}

impl RawWebhookEvent {
    /// Decode a request body
    pub fn from_slice(body: &[u8]) -> Result<Self, NormalizationError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Build the canonical event, stamping it with `received_at`
    ///
    /// Fails when either name is blank; nothing may be published in that case.
    pub fn normalize(
        &self,
        received_at: DateTime<Utc>,
    ) -> Result<NormalizedEvent, NormalizationError> {
        let repo_name = self.repository.full_name.trim();
        if repo_name.is_empty() {
            return Err(NormalizationError::MissingField("repository.full_name"));
        }

        let pusher_name = self.pusher.name.trim();
        if pusher_name.is_empty() {
            return Err(NormalizationError::MissingField("pusher.name"));
        }

        Ok(NormalizedEvent::new(repo_name, pusher_name, received_at))
    }
}
