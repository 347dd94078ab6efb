//! Kafka publisher for normalized push events
//!
//! One producer is created at startup and shared by every request handler.
//! `FutureProducer` is internally synchronised and cheap to clone, so no
//! locking happens here.

use async_trait::async_trait;
use event_schema::NormalizedEvent;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::KafkaProducerConfig;
use crate::error::PublishError;

/// Appends normalized events to the events topic
///
/// Implementations must be safe to call concurrently from many requests and
/// must not buffer, batch or retry: each call is one attempt whose failure
/// reaches the caller.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Resolves once the broker acknowledged the write or the attempt failed
    async fn publish(&self, event: &NormalizedEvent) -> Result<(), PublishError>;
}

pub struct KafkaEventPublisher {
    producer: FutureProducer,
    topic: String,
    publish_timeout: Duration,
}

impl KafkaEventPublisher {
    /// Create the shared producer
    ///
    /// `acks=all` with retries disabled: the acknowledgement means the write is
    /// durable, and a failure is reported once instead of being retried inside
    /// librdkafka past the publish timeout.
    pub fn new(config: &KafkaProducerConfig) -> Result<Self, PublishError> {
        let timeout_ms = config.publish_timeout.as_millis().to_string();

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", "event-ingestor")
            .set("acks", "all")
            .set("retries", "0")
            .set("linger.ms", "0")
            .set("message.timeout.ms", &timeout_ms)
            .set("request.timeout.ms", &timeout_ms)
            .create()?;

        info!(
            brokers = %config.brokers,
            topic = %config.topic,
            timeout_ms = %timeout_ms,
            "Kafka producer initialized"
        );

        Ok(Self {
            producer,
            topic: config.topic.clone(),
            publish_timeout: config.publish_timeout,
        })
    }

    /// Fail fast at startup when the brokers cannot be reached
    pub async fn verify_connection(&self) -> Result<(), PublishError> {
        let producer = self.producer.clone();
        let topic = self.topic.clone();
        let timeout = self.publish_timeout;

        let partitions = tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(Some(&topic), timeout)
                .map(|metadata| {
                    metadata
                        .topics()
                        .first()
                        .map(|t| t.partitions().len())
                        .unwrap_or(0)
                })
        })
        .await
        .map_err(|e| PublishError::Unavailable(format!("metadata task failed: {}", e)))??;

        info!(
            topic = %self.topic,
            partitions = partitions,
            "Kafka broker reachable"
        );
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish(&self, event: &NormalizedEvent) -> Result<(), PublishError> {
        let payload = event.to_vec()?;

        // No key: the broker's default partitioner picks the partition
        let record = FutureRecord::<(), _>::to(&self.topic).payload(&payload);

        match self.producer.send(record, self.publish_timeout).await {
            Ok((partition, offset)) => {
                debug!(
                    topic = %self.topic,
                    partition = partition,
                    offset = offset,
                    repo = %event.repo_name,
                    "Published push event to Kafka"
                );
                Ok(())
            }
            Err((err, _)) => {
                warn!(
                    error = ?err,
                    topic = %self.topic,
                    repo = %event.repo_name,
                    "Failed to publish push event to Kafka"
                );
                Err(PublishError::Kafka(err))
            }
        }
    }
}
