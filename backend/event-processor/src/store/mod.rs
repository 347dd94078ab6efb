//! Durable event storage.
//!
//! `EventStore` is the seam between the consumer/query paths and PostgreSQL;
//! tests substitute in-memory implementations.

mod postgres;

use async_trait::async_trait;
use event_schema::{NormalizedEvent, PersistedEvent};
use serde::Serialize;

use crate::error::StoreError;

pub use postgres::PgEventStore;

/// Page size used when `limit` is absent, unparseable or out of range
pub const DEFAULT_LIMIT: i64 = 50;
/// Largest page a caller may request
pub const MAX_LIMIT: i64 = 100;

/// Result of an idempotent insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    Inserted(PersistedEvent),
    /// A row with the same fingerprint already exists; nothing was written
    Duplicate,
}

/// Equality filters for `query`; `None` matches everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub repo_name: Option<String>,
    pub pusher_name: Option<String>,
}

impl EventFilter {
    /// Build a filter from raw query values, treating empty strings as absent
    pub fn new(repo_name: Option<String>, pusher_name: Option<String>) -> Self {
        Self {
            repo_name: repo_name.filter(|v| !v.is_empty()),
            pusher_name: pusher_name.filter(|v| !v.is_empty()),
        }
    }

    pub fn matches(&self, event: &PersistedEvent) -> bool {
        self.repo_name
            .as_deref()
            .map_or(true, |repo| event.repo_name == repo)
            && self
                .pusher_name
                .as_deref()
                .map_or(true, |pusher| event.pusher_name == pusher)
    }
}

/// Page window, always within `1..=MAX_LIMIT` and `offset >= 0`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    limit: i64,
    offset: i64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl Pagination {
    /// Out-of-range values fall back to the defaults rather than clamping
    pub fn new(limit: i64, offset: i64) -> Self {
        Self {
            limit: if (1..=MAX_LIMIT).contains(&limit) {
                limit
            } else {
                DEFAULT_LIMIT
            },
            offset: offset.max(0),
        }
    }

    /// Parse raw query-string values; garbage never produces an error
    pub fn from_params(limit: Option<&str>, offset: Option<&str>) -> Self {
        let limit = limit
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(DEFAULT_LIMIT);
        let offset = offset
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(0);
        Self::new(limit, offset)
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }
}

/// One page of events plus the unpaginated match count
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventPage {
    pub total: i64,
    pub items: Vec<PersistedEvent>,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert one row; repeated calls with the same event insert repeated rows
    async fn persist(&self, event: &NormalizedEvent) -> Result<PersistedEvent, StoreError>;

    /// Insert unless a row with `fingerprint` already exists
    async fn persist_idempotent(
        &self,
        event: &NormalizedEvent,
        fingerprint: &str,
    ) -> Result<PersistOutcome, StoreError>;

    /// Matching rows ordered by `received_at` descending (ties by `id` descending)
    async fn query(
        &self,
        filter: &EventFilter,
        pagination: Pagination,
    ) -> Result<EventPage, StoreError>;
}
