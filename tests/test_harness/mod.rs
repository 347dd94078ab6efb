//! Test Harness Module
//!
//! In-process stand-ins for Kafka and PostgreSQL so the ingestor and the
//! processor can be wired together without infrastructure:
//! - `InMemoryBroker`: single-partition log with a committed offset
//! - `InMemoryStore`: `github_events` table semantics

use async_trait::async_trait;
use event_ingestor::{EventPublisher, PublishError};
use event_processor::{
    ConsumeError, Delivery, EventConsumer, EventFilter, EventPage, EventStore, MessageSource,
    Pagination, PersistOutcome, StoreError,
};
use event_schema::{NormalizedEvent, PersistedEvent};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

/// Single-partition topic shared by publisher and consumer
#[derive(Default)]
pub struct InMemoryBroker {
    log: Mutex<Vec<Vec<u8>>>,
    position: Mutex<usize>,
    committed: Mutex<usize>,
}

impl InMemoryBroker {
    pub fn published(&self) -> Vec<NormalizedEvent> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .map(|payload| NormalizedEvent::from_slice(payload).unwrap())
            .collect()
    }

    pub fn committed_offset(&self) -> usize {
        *self.committed.lock().unwrap()
    }

    /// Simulate a consumer restart that resumes from `offset`
    pub fn restart_from(&self, offset: usize) {
        *self.position.lock().unwrap() = offset;
    }

    /// Append a raw payload, bypassing the ingestor
    pub fn append_raw(&self, payload: &[u8]) {
        self.log.lock().unwrap().push(payload.to_vec());
    }

    fn next(&self) -> Option<Delivery> {
        let log = self.log.lock().unwrap();
        let mut position = self.position.lock().unwrap();
        let payload = log.get(*position)?.clone();
        let delivery = Delivery {
            topic: event_schema::EVENTS_TOPIC.to_string(),
            partition: 0,
            offset: *position as i64,
            payload: Some(payload),
        };
        *position += 1;
        Some(delivery)
    }
}

#[async_trait]
impl EventPublisher for InMemoryBroker {
    async fn publish(&self, event: &NormalizedEvent) -> Result<(), PublishError> {
        let payload = event.to_vec().map_err(PublishError::Serialization)?;
        self.log.lock().unwrap().push(payload);
        Ok(())
    }
}

#[async_trait]
impl MessageSource for InMemoryBroker {
    async fn poll(&self, timeout: Duration) -> Result<Option<Delivery>, ConsumeError> {
        match self.next() {
            Some(delivery) => Ok(Some(delivery)),
            None => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }

    fn commit(&self, delivery: &Delivery) -> Result<(), ConsumeError> {
        *self.committed.lock().unwrap() = delivery.offset as usize + 1;
        Ok(())
    }

    fn rewind(&self, delivery: &Delivery) -> Result<(), ConsumeError> {
        *self.position.lock().unwrap() = delivery.offset as usize;
        Ok(())
    }
}

/// `github_events` in memory: BIGSERIAL ids, unique fingerprints
#[derive(Default)]
pub struct InMemoryStore {
    rows: Mutex<Vec<PersistedEvent>>,
    fingerprints: Mutex<HashSet<String>>,
}

impl InMemoryStore {
    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    fn insert(&self, event: &NormalizedEvent) -> PersistedEvent {
        let mut rows = self.rows.lock().unwrap();
        let row = PersistedEvent::from_event(rows.len() as i64 + 1, event.clone());
        rows.push(row.clone());
        row
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn persist(&self, event: &NormalizedEvent) -> Result<PersistedEvent, StoreError> {
        Ok(self.insert(event))
    }

    async fn persist_idempotent(
        &self,
        event: &NormalizedEvent,
        fingerprint: &str,
    ) -> Result<PersistOutcome, StoreError> {
        if !self
            .fingerprints
            .lock()
            .unwrap()
            .insert(fingerprint.to_string())
        {
            return Ok(PersistOutcome::Duplicate);
        }
        Ok(PersistOutcome::Inserted(self.insert(event)))
    }

    async fn query(
        &self,
        filter: &EventFilter,
        pagination: Pagination,
    ) -> Result<EventPage, StoreError> {
        let mut matching: Vec<_> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect();
        matching.sort_by(|a, b| (b.received_at, b.id).cmp(&(a.received_at, a.id)));

        Ok(EventPage {
            total: matching.len() as i64,
            items: matching
                .into_iter()
                .skip(pagination.offset() as usize)
                .take(pagination.limit() as usize)
                .collect(),
        })
    }
}

/// Hand every pending broker message to the consumer
pub async fn drain(consumer: &EventConsumer, broker: &InMemoryBroker) {
    while let Some(delivery) = broker
        .poll(Duration::from_millis(1))
        .await
        .expect("in-memory poll cannot fail")
    {
        consumer.handle_delivery(&delivery).await;
    }
}
