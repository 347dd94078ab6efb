//! Events topic consumer
//!
//! Reads normalized events from the broker and appends them to the store.
//! With `CommitPolicy::AfterPersist` an offset is only committed once its
//! event is stored (or known to be undecodable); a failed insert rewinds the
//! partition so the message is redelivered after a backoff. Idempotent
//! inserts keep those redeliveries from producing duplicate rows.

mod kafka;

use async_trait::async_trait;
use event_schema::{NormalizedEvent, PersistedEvent};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::{ConsumeError, DecodeError, StoreError};
use crate::metrics::{self, outcome};
use crate::store::{EventStore, PersistOutcome};

pub use kafka::KafkaMessageSource;

/// One message read from the broker, owned so it can outlive the poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Option<Vec<u8>>,
}

/// Where deliveries come from and where their progress is recorded
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Wait up to `timeout` for the next message; `Ok(None)` when none arrived
    async fn poll(&self, timeout: Duration) -> Result<Option<Delivery>, ConsumeError>;

    /// Mark `delivery` (and everything before it on its partition) as consumed
    fn commit(&self, delivery: &Delivery) -> Result<(), ConsumeError>;

    /// Reposition the partition so `delivery` is read again
    fn rewind(&self, delivery: &Delivery) -> Result<(), ConsumeError>;
}

/// When offsets are committed relative to persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPolicy {
    /// Commit once the event is stored, a duplicate, or undecodable
    AfterPersist,
    /// Commit as soon as a message is read; failed inserts are lost
    OnRead,
}

impl FromStr for CommitPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "after_persist" | "after-persist" => Ok(Self::AfterPersist),
            "on_read" | "on-read" => Ok(Self::OnRead),
            other => Err(format!("unknown commit policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub poll_timeout: Duration,
    pub commit_policy: CommitPolicy,
    /// Insert with the event fingerprint as a conflict key
    pub idempotent_inserts: bool,
    /// Pause before re-reading a message whose insert failed
    pub persist_failure_backoff: Duration,
    pub poll_error_backoff: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            commit_policy: CommitPolicy::AfterPersist,
            idempotent_inserts: true,
            persist_failure_backoff: Duration::from_secs(1),
            poll_error_backoff: Duration::from_secs(1),
        }
    }
}

/// What happened to a single delivery
#[derive(Debug)]
pub enum HandleOutcome {
    Persisted(PersistedEvent),
    Duplicate,
    Dropped(DecodeError),
    PersistFailed(StoreError),
}

pub struct EventConsumer {
    source: Arc<dyn MessageSource>,
    store: Arc<dyn EventStore>,
    settings: ConsumerSettings,
}

impl EventConsumer {
    pub fn new(
        source: Arc<dyn MessageSource>,
        store: Arc<dyn EventStore>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            source,
            store,
            settings,
        }
    }

    /// Consume until `shutdown` fires (or its sender is dropped)
    ///
    /// Shutdown is only observed between messages, so a message that has
    /// been read is always handled and committed before the loop exits.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            commit_policy = ?self.settings.commit_policy,
            idempotent_inserts = self.settings.idempotent_inserts,
            "Starting event consumer loop"
        );

        loop {
            let polled = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                polled = self.source.poll(self.settings.poll_timeout) => polled,
            };

            let pause = match polled {
                Ok(None) => None,
                Ok(Some(delivery)) => match self.handle_delivery(&delivery).await {
                    HandleOutcome::PersistFailed(_) if self.commits_after_persist() => {
                        Some(self.settings.persist_failure_backoff)
                    }
                    _ => None,
                },
                Err(e) => {
                    error!(error = %e, "Error reading from Kafka");
                    metrics::record_poll_error();
                    Some(self.settings.poll_error_backoff)
                }
            };

            if let Some(delay) = pause {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        info!("Event consumer stopped");
    }

    /// Decode, persist and commit (or rewind) one delivery
    pub async fn handle_delivery(&self, delivery: &Delivery) -> HandleOutcome {
        if self.settings.commit_policy == CommitPolicy::OnRead {
            self.commit(delivery);
        }

        let event = match decode(delivery) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    error = %e,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "Dropping undecodable message"
                );
                metrics::record_message(outcome::DECODE_FAILED);
                if self.commits_after_persist() {
                    self.commit(delivery);
                }
                return HandleOutcome::Dropped(e);
            }
        };

        let result = if self.settings.idempotent_inserts {
            let fingerprint = event.fingerprint();
            self.store.persist_idempotent(&event, &fingerprint).await
        } else {
            self.store.persist(&event).await.map(PersistOutcome::Inserted)
        };

        match result {
            Ok(PersistOutcome::Inserted(row)) => {
                info!(
                    id = row.id,
                    repo = %row.repo_name,
                    pusher = %row.pusher_name,
                    "Saved event to database"
                );
                metrics::record_message(outcome::PERSISTED);
                if self.commits_after_persist() {
                    self.commit(delivery);
                }
                HandleOutcome::Persisted(row)
            }
            Ok(PersistOutcome::Duplicate) => {
                info!(
                    repo = %event.repo_name,
                    pusher = %event.pusher_name,
                    offset = delivery.offset,
                    "Skipping already stored event"
                );
                metrics::record_message(outcome::DUPLICATE);
                if self.commits_after_persist() {
                    self.commit(delivery);
                }
                HandleOutcome::Duplicate
            }
            Err(e) => {
                error!(
                    error = %e,
                    repo = %event.repo_name,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "Failed to insert event into DB"
                );
                metrics::record_message(outcome::PERSIST_FAILED);
                if self.commits_after_persist() {
                    self.rewind(delivery);
                }
                HandleOutcome::PersistFailed(e)
            }
        }
    }

    fn commits_after_persist(&self) -> bool {
        self.settings.commit_policy == CommitPolicy::AfterPersist
    }

    fn commit(&self, delivery: &Delivery) {
        match self.source.commit(delivery) {
            Ok(()) => debug!(
                partition = delivery.partition,
                offset = delivery.offset,
                "Committed offset"
            ),
            Err(e) => {
                warn!(error = %e, offset = delivery.offset, "Failed to commit offset");
                metrics::record_commit_error();
            }
        }
    }

    fn rewind(&self, delivery: &Delivery) {
        if let Err(e) = self.source.rewind(delivery) {
            warn!(error = %e, offset = delivery.offset, "Failed to rewind partition");
            metrics::record_commit_error();
        }
    }
}

fn decode(delivery: &Delivery) -> Result<NormalizedEvent, DecodeError> {
    let payload = delivery
        .payload
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or(DecodeError::EmptyPayload)?;
    Ok(NormalizedEvent::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EventFilter, EventPage, Pagination};
    use chrono::Utc;
    use std::collections::{HashSet, VecDeque};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Broker double: serves a script, then idles; rewinds requeue the message
    #[derive(Default)]
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<Option<Delivery>, ConsumeError>>>,
        committed: Mutex<Vec<i64>>,
        rewound: Mutex<Vec<i64>>,
    }

    impl ScriptedSource {
        fn with(items: Vec<Result<Option<Delivery>, ConsumeError>>) -> Self {
            Self {
                script: Mutex::new(items.into()),
                ..Self::default()
            }
        }

        fn remaining(&self) -> usize {
            self.script.lock().unwrap().len()
        }

        fn committed(&self) -> Vec<i64> {
            self.committed.lock().unwrap().clone()
        }

        fn rewound(&self) -> Vec<i64> {
            self.rewound.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageSource for ScriptedSource {
        async fn poll(&self, timeout: Duration) -> Result<Option<Delivery>, ConsumeError> {
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(item) => item,
                None => {
                    tokio::time::sleep(timeout).await;
                    Ok(None)
                }
            }
        }

        fn commit(&self, delivery: &Delivery) -> Result<(), ConsumeError> {
            self.committed.lock().unwrap().push(delivery.offset);
            Ok(())
        }

        fn rewind(&self, delivery: &Delivery) -> Result<(), ConsumeError> {
            self.rewound.lock().unwrap().push(delivery.offset);
            self.script
                .lock()
                .unwrap()
                .push_front(Ok(Some(delivery.clone())));
            Ok(())
        }
    }

    /// Store double with injectable failures and a slow-insert switch
    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<Vec<PersistedEvent>>,
        fingerprints: Mutex<HashSet<String>>,
        failures_remaining: AtomicUsize,
        persist_delay: Option<Duration>,
        persist_started: AtomicBool,
    }

    impl MemoryStore {
        fn failing(times: usize) -> Self {
            Self {
                failures_remaining: AtomicUsize::new(times),
                ..Self::default()
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                persist_delay: Some(delay),
                ..Self::default()
            }
        }

        fn rows(&self) -> Vec<PersistedEvent> {
            self.rows.lock().unwrap().clone()
        }

        async fn begin_insert(&self) -> Result<(), StoreError> {
            self.persist_started.store(true, Ordering::SeqCst);
            if let Some(delay) = self.persist_delay {
                tokio::time::sleep(delay).await;
            }
            let failed = self
                .failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            Ok(())
        }

        fn insert(&self, event: &NormalizedEvent) -> PersistedEvent {
            let mut rows = self.rows.lock().unwrap();
            let row = PersistedEvent::from_event(rows.len() as i64 + 1, event.clone());
            rows.push(row.clone());
            row
        }
    }

    #[async_trait]
    impl EventStore for MemoryStore {
        async fn persist(&self, event: &NormalizedEvent) -> Result<PersistedEvent, StoreError> {
            self.begin_insert().await?;
            Ok(self.insert(event))
        }

        async fn persist_idempotent(
            &self,
            event: &NormalizedEvent,
            fingerprint: &str,
        ) -> Result<PersistOutcome, StoreError> {
            self.begin_insert().await?;
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
            let matching: Vec<_> = self
                .rows()
                .into_iter()
                .filter(|row| filter.matches(row))
                .collect();
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

    fn event(repo: &str, pusher: &str) -> NormalizedEvent {
        NormalizedEvent::new(repo, pusher, Utc::now())
    }

    fn delivery(offset: i64, event: &NormalizedEvent) -> Delivery {
        Delivery {
            topic: event_schema::EVENTS_TOPIC.to_string(),
            partition: 0,
            offset,
            payload: Some(event.to_vec().unwrap()),
        }
    }

    fn settings(policy: CommitPolicy, idempotent: bool) -> ConsumerSettings {
        ConsumerSettings {
            poll_timeout: Duration::from_millis(10),
            commit_policy: policy,
            idempotent_inserts: idempotent,
            persist_failure_backoff: Duration::from_millis(5),
            poll_error_backoff: Duration::from_millis(5),
        }
    }

    async fn run_until_drained(consumer: Arc<EventConsumer>, source: Arc<ScriptedSource>) {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(async move { consumer.run(shutdown_rx).await });

        while source.remaining() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // Let the last delivery finish
        tokio::time::sleep(Duration::from_millis(30)).await;

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("consumer did not stop")
            .unwrap();
    }

    #[test]
    fn test_commit_policy_parsing() {
        assert_eq!(
            "after_persist".parse::<CommitPolicy>(),
            Ok(CommitPolicy::AfterPersist)
        );
        assert_eq!("ON_READ".parse::<CommitPolicy>(), Ok(CommitPolicy::OnRead));
        assert_eq!(" on-read ".parse::<CommitPolicy>(), Ok(CommitPolicy::OnRead));
        assert!("sometimes".parse::<CommitPolicy>().is_err());
    }

    #[tokio::test]
    async fn test_persists_and_commits_valid_message() {
        let source = Arc::new(ScriptedSource::default());
        let store = Arc::new(MemoryStore::default());
        let consumer = EventConsumer::new(
            source.clone(),
            store.clone(),
            settings(CommitPolicy::AfterPersist, true),
        );

        let ev = event("acme/widgets", "alice");
        let outcome = consumer.handle_delivery(&delivery(7, &ev)).await;

        let row = match outcome {
            HandleOutcome::Persisted(row) => row,
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert_eq!(row.repo_name, "acme/widgets");
        assert_eq!(row.pusher_name, "alice");
        assert_eq!(row.received_at, ev.received_at);
        assert_eq!(store.rows(), vec![row]);
        assert_eq!(source.committed(), vec![7]);
        assert!(source.rewound().is_empty());
    }

    #[tokio::test]
    async fn test_redelivery_duplicates_without_idempotent_inserts() {
        let source = Arc::new(ScriptedSource::default());
        let store = Arc::new(MemoryStore::default());
        let consumer = EventConsumer::new(
            source.clone(),
            store.clone(),
            settings(CommitPolicy::AfterPersist, false),
        );

        let ev = event("acme/widgets", "alice");
        consumer.handle_delivery(&delivery(3, &ev)).await;
        consumer.handle_delivery(&delivery(3, &ev)).await;

        let rows = store.rows();
        assert_eq!(rows.len(), 2);
        assert_ne!(rows[0].id, rows[1].id);
        assert_eq!(rows[0].received_at, rows[1].received_at);
    }

    #[tokio::test]
    async fn test_redelivery_is_skipped_with_idempotent_inserts() {
        let source = Arc::new(ScriptedSource::default());
        let store = Arc::new(MemoryStore::default());
        let consumer = EventConsumer::new(
            source.clone(),
            store.clone(),
            settings(CommitPolicy::AfterPersist, true),
        );

        let ev = event("acme/widgets", "alice");
        assert!(matches!(
            consumer.handle_delivery(&delivery(3, &ev)).await,
            HandleOutcome::Persisted(_)
        ));
        assert!(matches!(
            consumer.handle_delivery(&delivery(3, &ev)).await,
            HandleOutcome::Duplicate
        ));

        assert_eq!(store.rows().len(), 1);
        // Duplicates still advance the offset
        assert_eq!(source.committed(), vec![3, 3]);
    }

    #[tokio::test]
    async fn test_undecodable_message_is_dropped_and_committed() {
        let source = Arc::new(ScriptedSource::default());
        let store = Arc::new(MemoryStore::default());
        let consumer = EventConsumer::new(
            source.clone(),
            store.clone(),
            settings(CommitPolicy::AfterPersist, true),
        );

        let mut bad = delivery(1, &event("acme/widgets", "alice"));
        bad.payload = Some(b"not json".to_vec());
        assert!(matches!(
            consumer.handle_delivery(&bad).await,
            HandleOutcome::Dropped(DecodeError::Invalid(_))
        ));

        let mut empty = delivery(2, &event("acme/widgets", "alice"));
        empty.payload = None;
        assert!(matches!(
            consumer.handle_delivery(&empty).await,
            HandleOutcome::Dropped(DecodeError::EmptyPayload)
        ));

        let mut blank_repo = delivery(3, &event("acme/widgets", "alice"));
        blank_repo.payload = Some(
            br#"{"repo_name":"","pusher_name":"alice","received_at":"2024-03-01T12:00:00Z"}"#
                .to_vec(),
        );
        assert!(matches!(
            consumer.handle_delivery(&blank_repo).await,
            HandleOutcome::Dropped(_)
        ));

        assert!(store.rows().is_empty());
        assert_eq!(source.committed(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_persist_failure_rewinds_without_commit() {
        let source = Arc::new(ScriptedSource::default());
        let store = Arc::new(MemoryStore::failing(1));
        let consumer = EventConsumer::new(
            source.clone(),
            store.clone(),
            settings(CommitPolicy::AfterPersist, true),
        );

        let outcome = consumer
            .handle_delivery(&delivery(5, &event("acme/widgets", "alice")))
            .await;

        assert!(matches!(outcome, HandleOutcome::PersistFailed(_)));
        assert!(source.committed().is_empty());
        assert_eq!(source.rewound(), vec![5]);
        assert!(store.rows().is_empty());
    }

    #[tokio::test]
    async fn test_on_read_policy_commits_even_when_persist_fails() {
        let source = Arc::new(ScriptedSource::default());
        let store = Arc::new(MemoryStore::failing(1));
        let consumer = EventConsumer::new(
            source.clone(),
            store.clone(),
            settings(CommitPolicy::OnRead, false),
        );

        let outcome = consumer
            .handle_delivery(&delivery(5, &event("acme/widgets", "alice")))
            .await;

        assert!(matches!(outcome, HandleOutcome::PersistFailed(_)));
        assert_eq!(source.committed(), vec![5]);
        assert!(source.rewound().is_empty());
        assert!(store.rows().is_empty());
    }

    #[tokio::test]
    async fn test_run_retries_failed_insert_until_stored() {
        let ev = event("acme/widgets", "alice");
        let source = Arc::new(ScriptedSource::with(vec![Ok(Some(delivery(9, &ev)))]));
        let store = Arc::new(MemoryStore::failing(2));
        let consumer = Arc::new(EventConsumer::new(
            source.clone(),
            store.clone(),
            settings(CommitPolicy::AfterPersist, true),
        ));

        run_until_drained(consumer, source.clone()).await;

        assert_eq!(store.rows().len(), 1);
        assert_eq!(source.rewound(), vec![9, 9]);
        assert_eq!(source.committed(), vec![9]);
    }

    #[tokio::test]
    async fn test_run_continues_after_poll_error_and_bad_message() {
        let first = event("acme/widgets", "alice");
        let second = event("acme/gadgets", "bob");
        let mut bad = delivery(2, &first);
        bad.payload = Some(b"{".to_vec());

        let source = Arc::new(ScriptedSource::with(vec![
            Ok(Some(delivery(1, &first))),
            Err(ConsumeError::Broker("transport failure".to_string())),
            Ok(None),
            Ok(Some(bad)),
            Ok(Some(delivery(3, &second))),
        ]));
        let store = Arc::new(MemoryStore::default());
        let consumer = Arc::new(EventConsumer::new(
            source.clone(),
            store.clone(),
            settings(CommitPolicy::AfterPersist, true),
        ));

        run_until_drained(consumer, source.clone()).await;

        let repos: Vec<_> = store.rows().into_iter().map(|r| r.repo_name).collect();
        assert_eq!(repos, vec!["acme/widgets", "acme/gadgets"]);
        assert_eq!(source.committed(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_insert() {
        let ev = event("acme/widgets", "alice");
        let source = Arc::new(ScriptedSource::with(vec![Ok(Some(delivery(4, &ev)))]));
        let store = Arc::new(MemoryStore::slow(Duration::from_millis(200)));
        let consumer = Arc::new(EventConsumer::new(
            source.clone(),
            store.clone(),
            settings(CommitPolicy::AfterPersist, true),
        ));

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = {
            let consumer = consumer.clone();
            tokio::spawn(async move { consumer.run(shutdown_rx).await })
        };

        while !store.persist_started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("consumer did not stop")
            .unwrap();

        assert_eq!(store.rows().len(), 1);
        assert_eq!(source.committed(), vec![4]);
    }

    #[tokio::test]
    async fn test_run_stops_when_sender_dropped() {
        let source = Arc::new(ScriptedSource::default());
        let store = Arc::new(MemoryStore::default());
        let consumer = EventConsumer::new(
            source,
            store,
            settings(CommitPolicy::AfterPersist, true),
        );

        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        drop(shutdown_tx);

        tokio::time::timeout(Duration::from_secs(1), consumer.run(shutdown_rx))
            .await
            .expect("consumer did not stop");
    }
}
