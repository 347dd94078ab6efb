use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use event_ingestor::{AppState, Config, IngressReceiver, KafkaEventPublisher};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,actix_web=info,event_ingestor=debug".into());

    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    let config = Config::from_env();
    init_tracing();

    tracing::info!("Starting event-ingestor");

    let publisher =
        KafkaEventPublisher::new(&config.kafka).context("Failed to create Kafka producer")?;
    publisher
        .verify_connection()
        .await
        .with_context(|| format!("Kafka brokers unreachable at {}", config.kafka.brokers))?;

    let state = AppState {
        receiver: IngressReceiver::new(Arc::new(publisher)),
    };

    let bind_address = ("0.0.0.0", config.http_port);
    tracing::info!("Event ingestor listening on port {}", config.http_port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(tracing_actix_web::TracingLogger::default())
            .configure(event_ingestor::configure)
    })
    .bind(bind_address)
    .with_context(|| format!("Failed to bind HTTP port {}", config.http_port))?
    .run()
    .await
    .context("HTTP server error")?;

    tracing::info!("Event-ingestor shut down");
    Ok(())
}
