use actix_web::{web, HttpResponse};
use tracing::error;

use crate::error::IngestError;
use crate::{metrics, AppState};

/// Receive a repository push webhook
/// POST /webhook
pub async fn receive_webhook(
    state: web::Data<AppState>,
    body: web::Bytes,
) -> Result<HttpResponse, IngestError> {
    state.receiver.receive(&body).await?;

    Ok(HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body("Event received"))
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
