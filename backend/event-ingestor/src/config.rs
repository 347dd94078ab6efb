use db_pool::env_utils::{first_env_var, parse_env_millis, parse_env_with_default};
use std::time::Duration;

/// Kafka producer settings
#[derive(Debug, Clone)]
pub struct KafkaProducerConfig {
    /// Comma-separated bootstrap servers
    pub brokers: String,
    /// Topic every normalized event is appended to
    pub topic: String,
    /// Upper bound on waiting for the broker acknowledgement
    pub publish_timeout: Duration,
}

impl Default for KafkaProducerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            topic: event_schema::EVENTS_TOPIC.to_string(),
            publish_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub kafka: KafkaProducerConfig,
}

impl Config {
    /// Load configuration from the environment (and `.env` if present)
    ///
    /// Every setting has a default, so loading cannot fail.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = KafkaProducerConfig::default();

        Self {
            http_port: parse_env_with_default("PORT", 8080),
            kafka: KafkaProducerConfig {
                brokers: first_env_var(&["KAFKA_BROKERS", "KAFKA_BROKER"])
                    .unwrap_or(defaults.brokers),
                topic: first_env_var(&["KAFKA_EVENTS_TOPIC"]).unwrap_or(defaults.topic),
                publish_timeout: parse_env_millis("KAFKA_PUBLISH_TIMEOUT_MS", 10_000),
            },
        }
    }
}
