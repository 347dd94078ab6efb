use actix_web::{web, App, HttpServer};
use anyhow::{anyhow, Context, Result};
use event_processor::{
    AppState, Config, EventConsumer, EventStore, KafkaMessageSource, PgEventStore, QueryService,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,actix_web=info,sqlx=warn,event_processor=debug".into());

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

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    let config = Config::from_env().map_err(|e| anyhow!(e))?;
    init_tracing();

    tracing::info!("Starting event-processor");

    config.database.log_config();
    let pool = db_pool::create_pool(config.database.clone())
        .await
        .context("Failed to connect to PostgreSQL")?;

    let store = PgEventStore::new(pool.clone());
    store
        .run_migrations()
        .await
        .context("Failed to run database migrations")?;
    let store: Arc<dyn EventStore> = Arc::new(store);

    let source =
        KafkaMessageSource::new(&config.kafka).context("Failed to create Kafka consumer")?;
    source
        .verify_connection()
        .await
        .with_context(|| format!("Kafka brokers unreachable at {}", config.kafka.brokers))?;

    let consumer = EventConsumer::new(Arc::new(source), store.clone(), config.consumer.clone());

    let state = AppState {
        query: QueryService::new(store),
    };

    let bind_address = ("0.0.0.0", config.http_port);
    tracing::info!("Event processor listening on port {}", config.http_port);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(tracing_actix_web::TracingLogger::default())
            .configure(event_processor::configure)
    })
    .bind(bind_address)
    .with_context(|| format!("Failed to bind HTTP port {}", config.http_port))?
    .disable_signals()
    .run();

    let server_handle = server.handle();

    let (shutdown_tx, _) = broadcast::channel(1);
    let consumer_shutdown = shutdown_tx.subscribe();

    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    tasks.spawn(async move { server.await.context("HTTP server error") });

    tasks.spawn(async move {
        consumer.run(consumer_shutdown).await;
        Ok(())
    });

    let mut first_error: Option<anyhow::Error> = None;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    tokio::select! {
        result = tasks.join_next() => {
            match result {
                Some(Ok(Ok(()))) => tracing::warn!("Background task exited early"),
                Some(Ok(Err(e))) => {
                    tracing::error!("Task returned error: {:#}", e);
                    first_error = Some(e);
                }
                Some(Err(e)) => {
                    tracing::error!("Task join error: {}", e);
                    first_error = Some(e.into());
                }
                None => {}
            }
        }
        _ = &mut shutdown => {
            tracing::info!("Shutdown signal received");
        }
    }

    // Stop accepting requests, then let the consumer finish its current message
    let _ = shutdown_tx.send(());
    server_handle.stop(true).await;

    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!("Task returned error: {:#}", e);
                first_error.get_or_insert(e);
            }
            Err(e) => {
                tracing::error!("Task join error: {}", e);
                first_error.get_or_insert(e.into());
            }
        }
    }

    pool.close().await;
    tracing::info!("Event-processor shut down");

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
