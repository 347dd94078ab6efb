use std::sync::Arc;
use tracing::error;

use crate::error::QueryError;
use crate::store::{EventFilter, EventPage, EventStore, Pagination};

/// Raw `GET /events` parameters
///
/// Kept as strings so malformed numbers fall back to defaults instead of
/// rejecting the request.
#[derive(Debug, Default)]
pub struct EventsQuery {
    pub repo: Option<String>,
    pub pusher: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

impl EventsQuery {
    /// Build from decoded query pairs. The first occurrence of a key wins and
    /// unknown keys are ignored.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut query = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_str() {
                "repo" => &mut query.repo,
                "pusher" => &mut query.pusher,
                "limit" => &mut query.limit,
                "offset" => &mut query.offset,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value);
            }
        }
        query
    }

    pub fn filter(&self) -> EventFilter {
        EventFilter::new(self.repo.clone(), self.pusher.clone())
    }

    pub fn pagination(&self) -> Pagination {
        Pagination::from_params(self.limit.as_deref(), self.offset.as_deref())
    }
}

/// Read side of the processor
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn EventStore>,
}

impl QueryService {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    pub async fn list_events(&self, params: &EventsQuery) -> Result<EventPage, QueryError> {
        let filter = params.filter();
        let pagination = params.pagination();

        self.store.query(&filter, pagination).await.map_err(|e| {
            error!(error = %e, ?filter, ?pagination, "Failed to fetch events");
            QueryError::from(e)
        })
    }
}
