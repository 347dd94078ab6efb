use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_schema::{NormalizedEvent, PersistedEvent};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

use super::{EventFilter, EventPage, EventStore, Pagination, PersistOutcome};
use crate::error::StoreError;

#[derive(sqlx::FromRow)]
struct EventRow {
    id: i64,
    repo_name: String,
    pusher_name: String,
    received_at: DateTime<Utc>,
}

impl From<EventRow> for PersistedEvent {
    fn from(row: EventRow) -> Self {
        Self {
            id: row.id,
            repo_name: row.repo_name,
            pusher_name: row.pusher_name,
            received_at: row.received_at,
        }
    }
}

/// PostgreSQL-backed store over the `github_events` table
#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &EventFilter) {
        builder.push(" WHERE TRUE");
        if let Some(repo_name) = &filter.repo_name {
            builder.push(" AND repo_name = ").push_bind(repo_name.clone());
        }
        if let Some(pusher_name) = &filter.pusher_name {
            builder.push(" AND pusher_name = ").push_bind(pusher_name.clone());
        }
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn persist(&self, event: &NormalizedEvent) -> Result<PersistedEvent, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO github_events (repo_name, pusher_name, received_at)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(&event.repo_name)
        .bind(&event.pusher_name)
        .bind(event.received_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(PersistedEvent::from_event(id, event.clone()))
    }

    async fn persist_idempotent(
        &self,
        event: &NormalizedEvent,
        fingerprint: &str,
    ) -> Result<PersistOutcome, StoreError> {
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO github_events (repo_name, pusher_name, received_at, fingerprint)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (fingerprint) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&event.repo_name)
        .bind(&event.pusher_name)
        .bind(event.received_at)
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;

        match id {
            Some(id) => Ok(PersistOutcome::Inserted(PersistedEvent::from_event(
                id,
                event.clone(),
            ))),
            None => {
                debug!(fingerprint = %fingerprint, "Event already stored");
                Ok(PersistOutcome::Duplicate)
            }
        }
    }

    async fn query(
        &self,
        filter: &EventFilter,
        pagination: Pagination,
    ) -> Result<EventPage, StoreError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM github_events");
        Self::push_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(
            "SELECT id, repo_name, pusher_name, received_at FROM github_events",
        );
        Self::push_filter(&mut select, filter);
        select
            .push(" ORDER BY received_at DESC, id DESC LIMIT ")
            .push_bind(pagination.limit())
            .push(" OFFSET ")
            .push_bind(pagination.offset());

        let rows: Vec<EventRow> = select.build_query_as().fetch_all(&self.pool).await?;

        Ok(EventPage {
            total,
            items: rows.into_iter().map(PersistedEvent::from).collect(),
        })
    }
}
