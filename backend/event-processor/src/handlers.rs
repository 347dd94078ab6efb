use actix_web::{web, HttpResponse};
use tracing::error;

use crate::error::QueryError;
use crate::query::EventsQuery;
use crate::{metrics, AppState};

/// List stored events, newest first
/// GET /events?repo=&pusher=&limit=&offset=
///
/// Parameters are taken as raw pairs so repeated keys never reject the request.
pub async fn list_events(
    state: web::Data<AppState>,
    query: web::Query<Vec<(String, String)>>,
) -> Result<HttpResponse, QueryError> {
    let params = EventsQuery::from_pairs(query.into_inner());
    let page = state.query.list_events(&params).await?;
    Ok(HttpResponse::Ok().json(page))
}

/// GET /health
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"status": "ok"}))
}

/// GET /metrics
pub async fn metrics_handler() -> HttpResponse {
    match metrics::render() {
        Ok((content_type, body)) => HttpResponse::Ok().content_type(content_type).body(body),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            HttpResponse::InternalServerError().finish()
        }
    }
}
