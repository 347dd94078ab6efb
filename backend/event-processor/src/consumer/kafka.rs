use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::{Delivery, MessageSource};
use crate::config::KafkaConsumerConfig;
use crate::error::ConsumeError;

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Consumer-group member on the events topic with manual offset commits
pub struct KafkaMessageSource {
    consumer: Arc<StreamConsumer>,
    topic: String,
}

impl KafkaMessageSource {
    pub fn new(config: &KafkaConsumerConfig) -> Result<Self, ConsumeError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "45000")
            .set("max.poll.interval.ms", "300000")
            .set("enable.partition.eof", "false")
            .create()?;

        consumer.subscribe(&[config.topic.as_str()])?;

        info!(
            topic = %config.topic,
            group_id = %config.group_id,
            "Kafka consumer subscribed"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            topic: config.topic.clone(),
        })
    }

    /// Fail fast when no broker answers a metadata request
    pub async fn verify_connection(&self) -> Result<(), ConsumeError> {
        let consumer = self.consumer.clone();
        let topic = self.topic.clone();

        tokio::task::spawn_blocking(move || {
            consumer
                .fetch_metadata(Some(&topic), Duration::from_secs(5))
                .map(|_| ())
        })
        .await
        .map_err(|e| ConsumeError::Broker(format!("metadata task failed: {}", e)))??;

        Ok(())
    }
}

impl From<&BorrowedMessage<'_>> for Delivery {
    fn from(message: &BorrowedMessage<'_>) -> Self {
        Self {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            payload: message.payload().map(<[u8]>::to_vec),
        }
    }
}

#[async_trait]
impl MessageSource for KafkaMessageSource {
    async fn poll(&self, timeout: Duration) -> Result<Option<Delivery>, ConsumeError> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Ok(message)) => Ok(Some(Delivery::from(&message))),
            Ok(Err(e)) => Err(e.into()),
        }
    }

    fn commit(&self, delivery: &Delivery) -> Result<(), ConsumeError> {
        // Committed offset is the next one to read
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &delivery.topic,
            delivery.partition,
            Offset::Offset(delivery.offset + 1),
        )?;
        self.consumer.commit(&tpl, CommitMode::Async)?;
        Ok(())
    }

    fn rewind(&self, delivery: &Delivery) -> Result<(), ConsumeError> {
        self.consumer.seek(
            &delivery.topic,
            delivery.partition,
            Offset::Offset(delivery.offset),
            SEEK_TIMEOUT,
        )?;
        Ok(())
    }
}
