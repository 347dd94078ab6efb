use db_pool::env_utils::{first_env_var, parse_env_bool, parse_env_millis, parse_env_with_default};
use db_pool::DbConfig;

use crate::consumer::{CommitPolicy, ConsumerSettings};

/// Kafka consumer settings
#[derive(Debug, Clone)]
pub struct KafkaConsumerConfig {
    /// Comma-separated bootstrap servers
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
}

impl Default for KafkaConsumerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            topic: event_schema::EVENTS_TOPIC.to_string(),
            group_id: event_schema::PROCESSOR_GROUP_ID.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub database: DbConfig,
    pub kafka: KafkaConsumerConfig,
    pub consumer: ConsumerSettings,
}

impl Config {
    /// Load configuration from the environment (and `.env` if present)
    ///
    /// Only the database URL is required.
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();

        let kafka_defaults = KafkaConsumerConfig::default();
        let consumer_defaults = ConsumerSettings::default();
        let commit_policy = match first_env_var(&["CONSUMER_COMMIT_POLICY"]) {
            Some(value) => value
                .parse::<CommitPolicy>()
                .map_err(|e| format!("CONSUMER_COMMIT_POLICY: {}", e))?,
            None => consumer_defaults.commit_policy,
        };

        Ok(Self {
            http_port: parse_env_with_default("PORT", 8081),
            database: DbConfig::from_env("event-processor")?,
            kafka: KafkaConsumerConfig {
                brokers: first_env_var(&["KAFKA_BROKERS", "KAFKA_BROKER"])
                    .unwrap_or(kafka_defaults.brokers),
                topic: first_env_var(&["KAFKA_EVENTS_TOPIC"]).unwrap_or(kafka_defaults.topic),
                group_id: first_env_var(&["KAFKA_GROUP_ID"]).unwrap_or(kafka_defaults.group_id),
            },
            consumer: ConsumerSettings {
                poll_timeout: parse_env_millis("KAFKA_POLL_TIMEOUT_MS", 1_000),
                commit_policy,
                idempotent_inserts: parse_env_bool(
                    "CONSUMER_IDEMPOTENT_INSERTS",
                    consumer_defaults.idempotent_inserts,
                ),
                persist_failure_backoff: parse_env_millis("CONSUMER_PERSIST_BACKOFF_MS", 1_000),
                poll_error_backoff: consumer_defaults.poll_error_backoff,
            },
        })
    }
}
