//! Outbound notifications
//!
//! Delivery is fire-and-forget: a failed publish is logged and never undoes
//! the committed work that produced the event.

use async_trait::async_trait;

use crate::domain::events::DomainEvent;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: DomainEvent);
}

/// Logs events; used when no broker is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, event: DomainEvent) {
        match serde_json::to_string(&event) {
            Ok(payload) => tracing::info!(event_type = event.kind(), %payload, "Domain event"),
            Err(e) => tracing::warn!(event_type = event.kind(), error = %e, "Unserialisable domain event"),
        }
    }
}

/// Publishes events as JSON on `<prefix>.<kind>`.
#[derive(Clone)]
pub struct NatsNotifier {
    client: async_nats::Client,
    prefix: String,
}

impl NatsNotifier {
    pub const DEFAULT_PREFIX: &'static str = "commerce.events";

    pub fn new(client: async_nats::Client) -> Self {
        Self { client, prefix: Self::DEFAULT_PREFIX.to_string() }
    }

    pub async fn connect(url: &str) -> Result<Self, async_nats::ConnectError> {
        Ok(Self::new(async_nats::connect(url).await?))
    }

    pub fn subject(&self, event: &DomainEvent) -> String {
        format!("{}.{}", self.prefix, event.kind())
    }
}

#[async_trait]
impl Notifier for NatsNotifier {
    async fn notify(&self, event: DomainEvent) {
        let subject = self.subject(&event);
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(%subject, error = %e, "Unserialisable domain event");
                return;
            }
        };
        if let Err(e) = self.client.publish(subject.clone(), payload.into()).await {
            tracing::warn!(%subject, error = %e, "Failed to publish domain event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{OrderEvent, WalletEvent};
    use crate::domain::value_objects::{Money, OrderNumber};
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_event_payload_shape() {
        let event = DomainEvent::Wallet(WalletEvent::Refunded {
            user_id: Uuid::nil(),
            amount: Money::from_major(450),
            order_number: OrderNumber::generate(Utc::now()),
        });
        assert_eq!(event.kind(), "wallet.refunded");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["domain"], "wallet");
        assert_eq!(json["event"]["type"], "refunded");

        let failed = DomainEvent::Order(OrderEvent::PaymentFailed { order_number: OrderNumber::generate(Utc::now()), user_id: Uuid::nil() });
        assert_eq!(failed.kind(), "order.payment_failed");
    }
}
