//! Checkout: turning a cart into an order
//!
//! `place_order` runs as one store transaction. Stock is reserved under row
//! locks, the coupon claim and the order insert happen together, and the
//! payment method decides whether stock is taken now (COD, WALLET) or when
//! the gateway confirms (GATEWAY). Any error before commit leaves no trace.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::aggregates::{
    CouponUsage, Order, OrderItem, PaymentMethod, PriceBreakdown, ShippingSnapshot,
};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::{Money, OrderNumber};
use crate::services::coupon::{AppliedCoupon, CouponRef, CouponRejection, CouponValidator};
use crate::services::notify::Notifier;
use crate::services::payment::{PaymentHandoff, PaymentService};
use crate::services::pricing::{PricingEngine, Quote};
use crate::services::stock::{Reservation, StockLedger};
use crate::services::wallet::WalletLedger;
use crate::store::{Store, StoreTx};
use crate::{CommerceError, Result};

/// Candidates tried before trusting the unique constraint.
const ORDER_NUMBER_ATTEMPTS: usize = 5;

/// Checkout choices carried between requests, e.g. the applied coupon.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCheckoutState {
    pub coupon_id: Option<Uuid>,
    pub coupon_code: Option<String>,
}

impl PendingCheckoutState {
    pub fn clear(&mut self) {
        self.coupon_id = None;
        self.coupon_code = None;
    }
}

/// Per-user pending state, kept in process.
#[derive(Clone, Default)]
pub struct PendingCheckoutStore {
    inner: Arc<DashMap<Uuid, PendingCheckoutState>>,
}

impl PendingCheckoutStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: Uuid) -> PendingCheckoutState {
        self.inner.get(&user_id).map(|s| s.clone()).unwrap_or_default()
    }

    pub fn set(&self, user_id: Uuid, state: PendingCheckoutState) {
        if state == PendingCheckoutState::default() {
            self.inner.remove(&user_id);
        } else {
            self.inner.insert(user_id, state);
        }
    }

    pub fn clear(&self, user_id: Uuid) {
        self.inner.remove(&user_id);
    }
}

/// Side-effect free quote of what placing the order now would charge.
#[derive(Clone, Debug, Serialize)]
pub struct CheckoutPreview {
    pub quote: Quote,
    pub coupon: Option<AppliedCoupon>,
    pub coupon_rejection: Option<CouponRejection>,
    pub pricing: PriceBreakdown,
}

#[derive(Clone, Debug, Serialize)]
pub struct PlacedOrder {
    pub order: Order,
    pub items: Vec<OrderItem>,
    /// Gateway orders only; `None` when initiation failed and must be retried.
    pub payment: Option<PaymentHandoff>,
}

#[derive(Clone)]
pub struct CheckoutService {
    store: Arc<dyn Store>,
    payments: PaymentService,
    notifier: Arc<dyn Notifier>,
    pending: PendingCheckoutStore,
}

impl CheckoutService {
    pub fn new(store: Arc<dyn Store>, payments: PaymentService, notifier: Arc<dyn Notifier>, pending: PendingCheckoutStore) -> Self {
        Self { store, payments, notifier, pending }
    }

    pub fn pending(&self) -> &PendingCheckoutStore {
        &self.pending
    }

    pub async fn preview(&self, user_id: Uuid, state: &PendingCheckoutState) -> Result<CheckoutPreview> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let lines = tx.cart_lines(user_id).await?;
        if lines.is_empty() {
            return Err(CommerceError::EmptyCart);
        }
        let quote = PricingEngine::quote_lines(tx.as_mut(), &lines, now).await?;
        let (coupon, coupon_rejection) = match state.coupon_id {
            Some(id) => match CouponValidator::validate(tx.as_mut(), CouponRef::Id(id), user_id, quote.subtotal, now).await {
                Ok(applied) => (Some(applied), None),
                Err(CommerceError::InvalidCoupon(reason)) => (None, Some(reason)),
                Err(e) => return Err(e),
            },
            None => (None, None),
        };
        let discount = coupon.as_ref().map(|c| c.discount).unwrap_or(Money::ZERO);
        let pricing = PriceBreakdown::compute(quote.subtotal, Money::ZERO, Money::ZERO, discount);
        Ok(CheckoutPreview { quote, coupon, coupon_rejection, pricing })
    }

    /// Validate a coupon against the current cart and remember it for checkout.
    #[tracing::instrument(skip(self))]
    pub async fn apply_coupon(&self, user_id: Uuid, code: &str) -> Result<AppliedCoupon> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let lines = tx.cart_lines(user_id).await?;
        if lines.is_empty() {
            return Err(CommerceError::EmptyCart);
        }
        let quote = PricingEngine::quote_lines(tx.as_mut(), &lines, now).await?;
        let applied = CouponValidator::validate(tx.as_mut(), CouponRef::Code(code), user_id, quote.subtotal, now).await?;
        drop(tx);

        self.pending.set(
            user_id,
            PendingCheckoutState { coupon_id: Some(applied.coupon_id), coupon_code: Some(applied.code.clone()) },
        );
        tracing::info!(coupon = %applied.code, discount = %applied.discount, "Coupon applied");
        Ok(applied)
    }

    pub fn remove_coupon(&self, user_id: Uuid) {
        self.pending.clear(user_id);
    }

    /// Place using the state remembered in [`PendingCheckoutStore`].
    pub async fn place_pending_order(&self, user_id: Uuid, address_id: Uuid, method: PaymentMethod) -> Result<PlacedOrder> {
        let mut state = self.pending.get(user_id);
        let result = self.place_order(user_id, address_id, method, &mut state).await;
        if result.is_ok() {
            state.clear();
        }
        self.pending.set(user_id, state);
        result
    }

    #[tracing::instrument(skip(self, state), fields(coupon_id = ?state.coupon_id))]
    pub async fn place_order(
        &self,
        user_id: Uuid,
        address_id: Uuid,
        method: PaymentMethod,
        state: &mut PendingCheckoutState,
    ) -> Result<PlacedOrder> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let lines = tx.lock_cart_lines(user_id).await?;
        if lines.is_empty() {
            return Err(CommerceError::EmptyCart);
        }
        let mut reservations = Vec::with_capacity(lines.len());
        for line in &lines {
            reservations.push(StockLedger::reserve(tx.as_mut(), line.variant.id, line.item.quantity).await?);
        }

        let quote = PricingEngine::quote_lines(tx.as_mut(), &lines, now).await?;
        let pending_coupon = state.coupon_id;
        let mut coupon = match pending_coupon {
            Some(id) => match CouponValidator::validate(tx.as_mut(), CouponRef::Id(id), user_id, quote.subtotal, now).await {
                Ok(applied) => Some(applied),
                Err(CommerceError::InvalidCoupon(reason)) => {
                    tracing::warn!(%reason, "Coupon no longer valid, placing order without it");
                    state.clear();
                    None
                }
                Err(e) => return Err(e),
            },
            None => None,
        };

        let address = tx
            .find_address(address_id)
            .await?
            .filter(|a| a.is_usable_by(user_id))
            .ok_or(CommerceError::InvalidAddress)?;

        let order_number = Self::allocate_order_number(tx.as_mut(), now).await?;
        let discount = coupon.as_ref().map(|c| c.discount).unwrap_or(Money::ZERO);
        let mut order = Order::place(
            order_number,
            user_id,
            ShippingSnapshot::from_address(&address),
            PriceBreakdown::compute(quote.subtotal, Money::ZERO, Money::ZERO, discount),
            method,
            coupon.as_ref().map(|c| c.coupon_id),
        );

        if let Some(applied) = &coupon {
            let usage = CouponUsage { user_id, coupon_id: applied.coupon_id, order_id: order.id, used_at: now };
            if !tx.claim_coupon(&usage).await? {
                tracing::warn!(coupon = %applied.code, "Coupon claimed concurrently, placing order without it");
                order.pricing = PriceBreakdown::compute(quote.subtotal, Money::ZERO, Money::ZERO, Money::ZERO);
                order.coupon_id = None;
                coupon = None;
                state.clear();
            }
        }

        let items: Vec<OrderItem> = quote
            .lines
            .iter()
            .map(|l| {
                OrderItem::snapshot(order.id, l.product_id, l.variant_id, &l.product_name, &l.variant_label, l.unit_price, l.quantity)
            })
            .collect();
        tx.insert_order(&order, &items).await?;

        match method {
            PaymentMethod::Cod => {
                Self::settle(tx.as_mut(), &mut order, &reservations).await?;
            }
            PaymentMethod::Wallet => {
                let description = format!("Payment for order {}", order.order_number);
                WalletLedger::debit(tx.as_mut(), user_id, order.total(), &description, Some(order.id)).await?;
                Self::settle(tx.as_mut(), &mut order, &reservations).await?;
            }
            // Stock and cart wait for the gateway callback.
            PaymentMethod::Gateway => {}
        }
        tx.commit().await?;

        tracing::info!(
            order_number = %order.order_number,
            total = %order.total(),
            discount = %order.pricing.discount,
            method = %method,
            status = %order.status(),
            coupon = coupon.as_ref().map(|c| c.code.as_str()).unwrap_or(""),
            "Order placed"
        );

        let payment = match method {
            PaymentMethod::Gateway => match self.payments.initiate(&order.order_number).await {
                Ok(handoff) => Some(handoff),
                Err(e) => {
                    tracing::error!(order_number = %order.order_number, error = %e, "Payment initiation failed; order left pending");
                    None
                }
            },
            _ => None,
        };

        self.notifier
            .notify(DomainEvent::Order(OrderEvent::Placed {
                order_number: order.order_number.clone(),
                user_id,
                email: order.shipping.email.clone(),
                total: order.total(),
                payment_method: method,
                status: order.status(),
            }))
            .await;

        Ok(PlacedOrder { order, items, payment })
    }

    /// Take the reserved stock, empty the cart and mark the order paid.
    async fn settle(tx: &mut dyn StoreTx, order: &mut Order, reservations: &[Reservation]) -> Result<()> {
        for reservation in reservations {
            StockLedger::commit(tx, reservation).await?;
        }
        tx.clear_cart(order.user_id).await?;
        order.confirm_paid()?;
        tx.save_order(order).await?;
        Ok(())
    }

    async fn allocate_order_number(tx: &mut dyn StoreTx, now: DateTime<Utc>) -> Result<OrderNumber> {
        for _ in 0..ORDER_NUMBER_ATTEMPTS {
            let candidate = OrderNumber::generate(now);
            if !tx.order_number_taken(&candidate).await? {
                return Ok(candidate);
            }
            tracing::debug!(%candidate, "Order number collision");
        }
        Ok(OrderNumber::generate(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_store_drops_empty_state() {
        let store = PendingCheckoutStore::new();
        let user = Uuid::new_v4();
        assert_eq!(store.get(user), PendingCheckoutState::default());
        store.set(user, PendingCheckoutState { coupon_id: Some(Uuid::new_v4()), coupon_code: Some("SAVE10".into()) });
        assert!(store.get(user).coupon_id.is_some());
        store.set(user, PendingCheckoutState::default());
        assert!(store.inner.is_empty());
    }
}
