//! Kafka-backed update log.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer as KafkaConsumer};
use rdkafka::Message;
use tracing::info;

use super::log::{LogConfig, LogMessage, MessageLog, TransportError};

/// Consumer group member reading the update topic
pub struct KafkaLog {
    consumer: KafkaConsumer,
}

impl KafkaLog {
    /// Join the consumer group and subscribe to the topic
    pub fn connect(config: &LogConfig) -> Result<Self, TransportError> {
        let consumer: KafkaConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .set("fetch.min.bytes", "1")
            .set("fetch.message.max.bytes", "10000000")
            .create()
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        info!(
            "Subscribed to topic {} at {} as group {}",
            config.topic, config.brokers, config.group_id
        );
        Ok(Self { consumer })
    }
}

#[async_trait]
impl MessageLog for KafkaLog {
    async fn next_message(&mut self) -> Result<LogMessage, TransportError> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| TransportError::Read(e.to_string()))?;

        Ok(LogMessage {
            key: message.key().map(<[u8]>::to_vec).unwrap_or_default(),
            value: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            partition: message.partition(),
            offset: message.offset(),
        })
    }
}
