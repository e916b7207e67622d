use std::time::Duration;

use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;

use crate::core::{EngineError, EngineResult};

use super::messages::{EngineMessage, MessageBus};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka-backed message bus.
///
/// Kafka has no native scheduled delivery, so a delayed dispatch is a
/// detached sleep-then-produce. Losing one to a crash only postpones a poll:
/// the platform's scheduled sweep re-enqueues checks for stale pending
/// submissions.
pub struct KafkaBus {
    producer: FutureProducer,
    topic: String,
}

impl KafkaBus {
    pub fn new(brokers: &str, topic: impl Into<String>) -> anyhow::Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("compression.type", "snappy")
            .create()?;

        Ok(KafkaBus {
            producer,
            topic: topic.into(),
        })
    }

    async fn produce(&self, message: &EngineMessage) -> EngineResult<()> {
        let payload = serde_json::to_vec(message)
            .map_err(|e| EngineError::Transport(format!("message encode: {e}")))?;
        let key = message.key();

        self.producer
            .send(
                FutureRecord::to(&self.topic).key(&key).payload(&payload),
                Timeout::After(SEND_TIMEOUT),
            )
            .await
            .map_err(|(err, _)| EngineError::Transport(format!("kafka send: {err}")))?;

        Ok(())
    }
}

#[async_trait]
impl MessageBus for KafkaBus {
    async fn dispatch(&self, message: EngineMessage) -> EngineResult<()> {
        self.produce(&message).await
    }

    async fn dispatch_delayed(&self, message: EngineMessage, delay: Duration) -> EngineResult<()> {
        let producer = self.producer.clone();
        let topic = self.topic.clone();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let payload = match serde_json::to_vec(&message) {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::error!(error = %err, "failed to encode delayed message");
                    return;
                }
            };
            let key = message.key();

            if let Err((err, _)) = producer
                .send(
                    FutureRecord::to(&topic).key(&key).payload(&payload),
                    Timeout::After(SEND_TIMEOUT),
                )
                .await
            {
                tracing::error!(error = %err, key, "failed to produce delayed message");
            }
        });

        Ok(())
    }
}
