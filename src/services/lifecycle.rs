//! Order lifecycle
//!
//! The legal moves live on [`OrderStatus::allowed_targets`]. This service
//! applies a move together with its stock and wallet side effects in one
//! store transaction.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::{Order, OrderItem, OrderStatus, Payment};
use crate::domain::events::{DomainEvent, OrderEvent, WalletEvent};
use crate::domain::value_objects::OrderNumber;
use crate::services::notify::Notifier;
use crate::services::stock::StockLedger;
use crate::services::wallet::WalletLedger;
use crate::store::{OrderFilter, PageRequest, Store, StoreTx};
use crate::{CommerceError, Result};

#[derive(Clone, Debug, Serialize)]
pub struct OrderDetails {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub payments: Vec<Payment>,
}

/// One page of orders, in the shape the catalog listings use.
#[derive(Clone, Debug, Serialize)]
pub struct OrderPage {
    pub data: Vec<Order>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

#[derive(Clone)]
pub struct OrderLifecycle {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
}

impl OrderLifecycle {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// The order with its items and payment attempts, if `user_id` owns it.
    pub async fn details(&self, user_id: Uuid, order_number: &OrderNumber) -> Result<OrderDetails> {
        let mut tx = self.store.begin().await?;
        let order = tx
            .find_order(order_number)
            .await?
            .filter(|o| o.user_id == user_id)
            .ok_or(CommerceError::OrderNotFound)?;
        let items = tx.order_items(order.id).await?;
        let payments = tx.payments_for_order(order.id).await?;
        Ok(OrderDetails { order, items, payments })
    }

    /// The user's orders, newest first. `number` matches part of the order number.
    pub async fn history(
        &self,
        user_id: Uuid,
        status: Option<OrderStatus>,
        number: Option<&str>,
        page: Option<u32>,
    ) -> Result<OrderPage> {
        let filter = OrderFilter {
            user_id: Some(user_id),
            status,
            number_contains: number.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string),
            ..Default::default()
        };
        self.list(&filter, page).await
    }

    /// Orders across all users, for back-office screens.
    pub async fn list(&self, filter: &OrderFilter, page: Option<u32>) -> Result<OrderPage> {
        let page = PageRequest::new(page);
        let mut tx = self.store.begin().await?;
        let (data, total) = tx.list_orders(filter, page).await?;
        Ok(OrderPage { data, total, page: page.page, per_page: page.per_page })
    }

    /// Move an order to `target`, applying the move's side effects.
    #[tracing::instrument(skip(self))]
    pub async fn transition(&self, order_number: &OrderNumber, target: OrderStatus, reason: Option<&str>) -> Result<Order> {
        self.run(None, order_number, target, reason).await
    }

    pub async fn cancel(&self, user_id: Uuid, order_number: &OrderNumber, reason: &str) -> Result<Order> {
        let reason = required(reason)?;
        self.run(Some(user_id), order_number, OrderStatus::Cancelled, Some(reason)).await
    }

    pub async fn request_return(&self, user_id: Uuid, order_number: &OrderNumber, reason: &str) -> Result<Order> {
        let reason = required(reason)?;
        self.run(Some(user_id), order_number, OrderStatus::ReturnRequested, Some(reason)).await
    }

    pub async fn approve_return(&self, order_number: &OrderNumber) -> Result<Order> {
        self.transition(order_number, OrderStatus::ReturnProcessing, None).await
    }

    pub async fn reject_return(&self, order_number: &OrderNumber, reason: &str) -> Result<Order> {
        self.transition(order_number, OrderStatus::Delivered, Some(reason)).await
    }

    pub async fn complete_return(&self, order_number: &OrderNumber) -> Result<Order> {
        self.transition(order_number, OrderStatus::Returned, None).await
    }

    async fn run(
        &self,
        owner: Option<Uuid>,
        order_number: &OrderNumber,
        target: OrderStatus,
        reason: Option<&str>,
    ) -> Result<Order> {
        let mut tx = self.store.begin().await?;
        let mut order = tx
            .lock_order(order_number)
            .await?
            .filter(|o| owner.map_or(true, |user| o.user_id == user))
            .ok_or(CommerceError::OrderNotFound)?;
        let events = Self::apply(tx.as_mut(), &mut order, target, reason).await?;
        tx.commit().await?;

        for event in events {
            self.notifier.notify(event).await;
        }
        Ok(order)
    }

    async fn apply(
        tx: &mut dyn StoreTx,
        order: &mut Order,
        target: OrderStatus,
        reason: Option<&str>,
    ) -> Result<Vec<DomainEvent>> {
        let reason = match (order.status(), target) {
            (OrderStatus::ReturnRequested, OrderStatus::Delivered) => Some(required(reason.unwrap_or_default())?),
            _ => reason,
        };
        let from = order.transition_to(target)?;
        let mut events = Vec::new();

        match (from, target) {
            (_, OrderStatus::Cancelled) => {
                if order.stock_committed() {
                    Self::restock(tx, order).await?;
                }
                if order.is_paid() {
                    let description = format!("Refund for cancelled order {}", order.order_number);
                    WalletLedger::credit(tx, order.user_id, order.total(), &description, Some(order.id)).await?;
                    events.push(DomainEvent::Wallet(WalletEvent::Refunded {
                        user_id: order.user_id,
                        amount: order.total(),
                        order_number: order.order_number.clone(),
                    }));
                }
                order.cancellation_reason = reason.map(str::to_string);
            }
            (OrderStatus::Pending, OrderStatus::Confirmed) if !order.stock_committed() => {
                let reservations = StockLedger::reserve_order(tx, order.id).await?;
                StockLedger::commit_all(tx, &reservations).await?;
                order.mark_stock_committed();
            }
            (OrderStatus::Delivered, OrderStatus::ReturnRequested) => {
                order.return_reason = reason.map(str::to_string);
            }
            (OrderStatus::ReturnRequested, OrderStatus::Delivered) => {
                order.return_rejection_reason = reason.map(str::to_string);
            }
            (OrderStatus::ReturnProcessing, OrderStatus::Returned) => {
                Self::restock(tx, order).await?;
            }
            _ => {}
        }

        tx.save_order(order).await?;
        tracing::info!(order_number = %order.order_number, %from, to = %target, "Order status changed");
        events.push(DomainEvent::Order(OrderEvent::StatusChanged {
            order_number: order.order_number.clone(),
            user_id: order.user_id,
            from,
            to: target,
        }));
        Ok(events)
    }

    async fn restock(tx: &mut dyn StoreTx, order: &mut Order) -> Result<()> {
        let mut items = tx.order_items(order.id).await?;
        items.sort_by_key(|i| i.variant_id);
        for item in &items {
            StockLedger::release(tx, item.variant_id, item.quantity).await?;
        }
        order.mark_stock_released();
        Ok(())
    }
}

fn required(reason: &str) -> Result<&str> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(CommerceError::MissingReason);
    }
    Ok(reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_required() {
        assert!(matches!(required("   "), Err(CommerceError::MissingReason)));
        assert_eq!(required(" changed my mind ").unwrap(), "changed my mind");
    }
}
