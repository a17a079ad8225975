//! Domain events, handed to the notifier once the owning transaction commits
use serde::Serialize;
use uuid::Uuid;
use crate::domain::aggregates::{OrderStatus, PaymentMethod};
use crate::domain::value_objects::{Money, OrderNumber};

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "domain", content = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    Order(OrderEvent),
    Wallet(WalletEvent),
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_number: OrderNumber, user_id: Uuid, email: String, total: Money, payment_method: PaymentMethod, status: OrderStatus },
    PaymentConfirmed { order_number: OrderNumber, user_id: Uuid, amount: Money },
    PaymentFailed { order_number: OrderNumber, user_id: Uuid },
    StatusChanged { order_number: OrderNumber, user_id: Uuid, from: OrderStatus, to: OrderStatus },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WalletEvent {
    Refunded { user_id: Uuid, amount: Money, order_number: OrderNumber },
}

impl DomainEvent {
    /// Routing key segment, e.g. `order.placed`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Order(OrderEvent::Placed { .. }) => "order.placed",
            Self::Order(OrderEvent::PaymentConfirmed { .. }) => "order.payment_confirmed",
            Self::Order(OrderEvent::PaymentFailed { .. }) => "order.payment_failed",
            Self::Order(OrderEvent::StatusChanged { .. }) => "order.status_changed",
            Self::Wallet(WalletEvent::Refunded { .. }) => "wallet.refunded",
        }
    }
}
