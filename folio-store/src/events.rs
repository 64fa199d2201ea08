use async_trait::async_trait;
use chrono::Utc;
use folio_core::notification::{
    approval_event, confirmation_event, rejection_event, ApprovalNotice, Notifier, NotifyError,
};
use folio_core::order::{Order, OrderItem};
use folio_shared::models::events::NotificationEvent;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{error, info};

#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(brokers: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self { producer })
    }

    pub async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                info!(
                    "Sent message to {}/{}: partition {} offset {}",
                    topic, key, delivery.partition, delivery.offset
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", topic, e);
                Err(e)
            }
        }
    }
}

/// Hands transactional emails to the mailer service over Kafka, keyed by order number
/// so all mail for one order stays on one partition.
#[derive(Clone)]
pub struct KafkaNotifier {
    producer: EventProducer,
    topic: String,
}

impl KafkaNotifier {
    pub fn new(producer: EventProducer, topic: impl Into<String>) -> Self {
        Self { producer, topic: topic.into() }
    }

    async fn emit(&self, event: NotificationEvent) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(&event).map_err(|e| NotifyError::Delivery(e.to_string()))?;
        self.producer
            .publish(&self.topic, event.order_number(), &payload)
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))
    }
}

#[async_trait]
impl Notifier for KafkaNotifier {
    async fn send_order_confirmation(&self, order: &Order, items: &[OrderItem]) -> Result<(), NotifyError> {
        self.emit(confirmation_event(order, items, Utc::now())).await
    }

    async fn send_approval(&self, order: &Order, notice: &ApprovalNotice) -> Result<(), NotifyError> {
        self.emit(approval_event(order, notice, Utc::now())).await
    }

    async fn send_rejection(&self, order: &Order, reason: &str) -> Result<(), NotifyError> {
        self.emit(rejection_event(order, reason, Utc::now())).await
    }
}
