//! Payment gateway adapter
//!
//! Gateway checkout runs in two legs. `initiate` opens a Payment attempt for
//! a PENDING order after the placing transaction has committed; `confirm`
//! handles the signed callback and settles the order. No store lock is held
//! while the gateway is being called.

use std::sync::Arc;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;
use validator::Validate;

use crate::config::CommerceSettings;
use crate::domain::aggregates::{Order, OrderStatus, Payment, PaymentMethod, PaymentStatus};
use crate::domain::events::{DomainEvent, OrderEvent, WalletEvent};
use crate::domain::value_objects::{Money, OrderNumber};
use crate::services::notify::Notifier;
use crate::services::stock::StockLedger;
use crate::services::wallet::WalletLedger;
use crate::store::Store;
use crate::{CommerceError, Result};

type HmacSha256 = Hmac<Sha256>;

const SOLD_OUT_REASON: &str = "Out of stock when payment arrived";

/// Reference the gateway assigned to one payment attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GatewayOrder {
    pub reference: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(&self, order: &Order) -> Result<GatewayOrder>;

    async fn verify(&self, gateway_order_ref: &str, gateway_payment_ref: &str, signature: &str) -> Result<bool>;
}

/// Gateway whose callbacks carry an HMAC-SHA256 over `"<order_ref>|<payment_ref>"`,
/// hex encoded.
#[derive(Clone)]
pub struct SignedCallbackGateway {
    secret: Vec<u8>,
}

impl SignedCallbackGateway {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self { secret: secret.into() }
    }

    fn mac(&self, gateway_order_ref: &str, gateway_payment_ref: &str) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|e| CommerceError::Gateway(e.to_string()))?;
        mac.update(format!("{}|{}", gateway_order_ref, gateway_payment_ref).as_bytes());
        Ok(mac)
    }

    /// Signature the gateway would send for this pair.
    pub fn sign(&self, gateway_order_ref: &str, gateway_payment_ref: &str) -> Result<String> {
        Ok(hex::encode(self.mac(gateway_order_ref, gateway_payment_ref)?.finalize().into_bytes()))
    }
}

#[async_trait]
impl PaymentGateway for SignedCallbackGateway {
    async fn create_order(&self, _order: &Order) -> Result<GatewayOrder> {
        Ok(GatewayOrder { reference: format!("gw_{}", Uuid::new_v4().simple()) })
    }

    async fn verify(&self, gateway_order_ref: &str, gateway_payment_ref: &str, signature: &str) -> Result<bool> {
        let Ok(expected) = hex::decode(signature.trim()) else {
            return Ok(false);
        };
        // verify_slice compares in constant time
        Ok(self.mac(gateway_order_ref, gateway_payment_ref)?.verify_slice(&expected).is_ok())
    }
}

/// What the client needs to open the gateway checkout.
#[derive(Clone, Debug, Serialize)]
pub struct PaymentHandoff {
    pub order_number: OrderNumber,
    pub payment_id: Uuid,
    pub gateway: String,
    pub gateway_order_ref: String,
    pub key_id: String,
    /// Amount in the currency's smallest unit
    pub amount_minor: i64,
    pub currency: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
}

/// Signed callback from the gateway.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct PaymentCallback {
    #[validate(length(min = 1))]
    pub gateway_order_ref: String,
    #[validate(length(min = 1))]
    pub gateway_payment_ref: String,
    #[validate(length(min = 1))]
    pub signature: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    /// The order moved PENDING -> CONFIRMED.
    Confirmed { order: Order },
    /// This attempt was settled before; nothing changed.
    AlreadyConfirmed { order: Order },
    /// The order was no longer awaiting payment, or its stock ran out; the
    /// amount went to the wallet.
    Refunded { order: Order, amount: Money },
}

#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    settings: CommerceSettings,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        settings: CommerceSettings,
    ) -> Self {
        Self { store, gateway, notifier, settings }
    }

    /// Open a new payment attempt for a PENDING, unpaid gateway order.
    #[tracing::instrument(skip(self))]
    pub async fn initiate(&self, order_number: &OrderNumber) -> Result<PaymentHandoff> {
        let order = {
            let mut tx = self.store.begin().await?;
            tx.find_order(order_number).await?.ok_or(CommerceError::OrderNotFound)?
        };
        Self::ensure_awaiting_payment(&order)?;

        let gateway_order = self.gateway.create_order(&order).await?;
        let payment = Payment::open(
            order.id,
            &self.settings.gateway_name,
            order.total(),
            &self.settings.currency,
            gateway_order.reference,
        );

        let mut tx = self.store.begin().await?;
        tx.insert_payment(&payment).await?;
        tx.commit().await?;

        tracing::info!(payment_id = %payment.id, gateway_order_ref = %payment.gateway_order_ref, amount = %payment.amount, "Payment initiated");
        Ok(PaymentHandoff {
            order_number: order.order_number.clone(),
            payment_id: payment.id,
            gateway: payment.gateway,
            gateway_order_ref: payment.gateway_order_ref,
            key_id: self.settings.gateway_key_id.clone(),
            amount_minor: payment.amount.to_minor_units(),
            currency: payment.currency,
            customer_name: order.shipping.full_name,
            customer_email: order.shipping.email,
            customer_phone: order.shipping.phone,
        })
    }

    /// Retry from the order's owner.
    pub async fn initiate_for(&self, user_id: Uuid, order_number: &OrderNumber) -> Result<PaymentHandoff> {
        {
            let mut tx = self.store.begin().await?;
            tx.find_order(order_number).await?.filter(|o| o.user_id == user_id).ok_or(CommerceError::OrderNotFound)?;
        }
        self.initiate(order_number).await
    }

    /// Settle a signed callback. A forged callback changes nothing. Capture
    /// failures mark the attempt FAILED and leave the order PENDING so the
    /// customer can retry.
    #[tracing::instrument(skip(self, callback), fields(gateway_order_ref = %callback.gateway_order_ref))]
    pub async fn confirm(&self, callback: &PaymentCallback) -> Result<PaymentOutcome> {
        let verified = self
            .gateway
            .verify(&callback.gateway_order_ref, &callback.gateway_payment_ref, &callback.signature)
            .await?;
        if !verified {
            tracing::warn!(gateway_payment_ref = %callback.gateway_payment_ref, "Payment signature mismatch, callback ignored");
            return Err(CommerceError::SignatureMismatch);
        }

        match self.capture(callback).await {
            Ok(outcome) => {
                self.announce(&outcome).await;
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(error = %e, "Payment capture failed");
                if let Err(mark_err) = self.fail_attempt(&callback.gateway_order_ref).await {
                    tracing::error!(error = %mark_err, "Could not mark payment attempt failed");
                }
                Err(e)
            }
        }
    }

    /// Record a verified payment. The money has been taken by now, so it ends
    /// up either on the order or in the customer's wallet.
    async fn capture(&self, callback: &PaymentCallback) -> Result<PaymentOutcome> {
        let mut tx = self.store.begin().await?;
        let mut payment = tx
            .lock_payment_by_ref(&callback.gateway_order_ref)
            .await?
            .ok_or(CommerceError::PaymentNotFound)?;
        let mut order = tx.lock_order_by_id(payment.order_id).await?.ok_or(CommerceError::OrderNotFound)?;

        if payment.status() == PaymentStatus::Success {
            tracing::info!(payment_id = %payment.id, "Duplicate payment callback ignored");
            return Ok(PaymentOutcome::AlreadyConfirmed { order });
        }

        payment.succeed(&callback.gateway_payment_ref, &callback.signature);
        tx.save_payment(&payment).await?;

        if order.status() == OrderStatus::Pending && !order.is_paid() {
            // cart rows before variants, as checkout takes them
            tx.lock_cart_items(order.user_id).await?;
            match StockLedger::reserve_order(tx.as_mut(), order.id).await {
                Ok(reservations) => {
                    StockLedger::commit_all(tx.as_mut(), &reservations).await?;
                    tx.clear_cart(order.user_id).await?;
                    order.confirm_paid()?;
                    tx.save_order(&order).await?;
                    tx.commit().await?;
                    tracing::info!(order_number = %order.order_number, amount = %payment.amount, "Gateway payment confirmed");
                    return Ok(PaymentOutcome::Confirmed { order });
                }
                Err(e @ (CommerceError::InsufficientStock { .. } | CommerceError::VariantUnavailable)) => {
                    tracing::warn!(order_number = %order.order_number, error = %e, "Stock ran out before payment arrived, cancelling order");
                    order.transition_to(OrderStatus::Cancelled)?;
                    order.cancellation_reason = Some(SOLD_OUT_REASON.to_string());
                    tx.save_order(&order).await?;
                }
                Err(e) => return Err(e),
            }
        }

        let description = format!("Refund of payment for order {}", order.order_number);
        WalletLedger::credit(tx.as_mut(), order.user_id, payment.amount, &description, Some(order.id)).await?;
        tx.commit().await?;
        tracing::warn!(order_number = %order.order_number, status = %order.status(), amount = %payment.amount, "Payment could not be applied, credited to wallet");
        Ok(PaymentOutcome::Refunded { order, amount: payment.amount })
    }

    /// Pay a PENDING, unpaid order from the owner's wallet. Stock is taken and
    /// the cart cleared in the same transaction as the debit.
    #[tracing::instrument(skip(self))]
    pub async fn pay_with_wallet(&self, user_id: Uuid, order_number: &OrderNumber) -> Result<Order> {
        let mut tx = self.store.begin().await?;
        let mut order = tx
            .lock_order(order_number)
            .await?
            .filter(|o| o.user_id == user_id)
            .ok_or(CommerceError::OrderNotFound)?;
        if order.status() != OrderStatus::Pending || order.is_paid() {
            return Err(CommerceError::IllegalStatusTransition { from: order.status(), to: OrderStatus::Confirmed });
        }

        tx.lock_cart_items(user_id).await?;
        let reservations = StockLedger::reserve_order(tx.as_mut(), order.id).await?;
        StockLedger::commit_all(tx.as_mut(), &reservations).await?;
        let description = format!("Payment for order {}", order.order_number);
        WalletLedger::debit(tx.as_mut(), user_id, order.total(), &description, Some(order.id)).await?;
        tx.clear_cart(user_id).await?;
        order.payment_method = PaymentMethod::Wallet;
        order.confirm_paid()?;
        tx.save_order(&order).await?;
        tx.commit().await?;

        tracing::info!(order_number = %order.order_number, amount = %order.total(), "Order paid from wallet");
        self.announce(&PaymentOutcome::Confirmed { order: order.clone() }).await;
        Ok(order)
    }

    /// Mark the attempt FAILED; a captured attempt is left alone.
    async fn fail_attempt(&self, gateway_order_ref: &str) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let Some(mut payment) = tx.lock_payment_by_ref(gateway_order_ref).await? else {
            return Ok(());
        };
        if !payment.fail() {
            return Ok(());
        }
        tx.save_payment(&payment).await?;
        let order = tx.lock_order_by_id(payment.order_id).await?;
        tx.commit().await?;

        if let Some(order) = order.filter(|o| o.status() == OrderStatus::Pending) {
            self.notifier
                .notify(DomainEvent::Order(OrderEvent::PaymentFailed { order_number: order.order_number, user_id: order.user_id }))
                .await;
        }
        Ok(())
    }

    async fn announce(&self, outcome: &PaymentOutcome) {
        let event = match outcome {
            PaymentOutcome::Confirmed { order } => DomainEvent::Order(OrderEvent::PaymentConfirmed {
                order_number: order.order_number.clone(),
                user_id: order.user_id,
                amount: order.total(),
            }),
            PaymentOutcome::Refunded { order, amount } => DomainEvent::Wallet(WalletEvent::Refunded {
                user_id: order.user_id,
                amount: *amount,
                order_number: order.order_number.clone(),
            }),
            PaymentOutcome::AlreadyConfirmed { .. } => return,
        };
        self.notifier.notify(event).await;
    }

    fn ensure_awaiting_payment(order: &Order) -> Result<()> {
        if order.payment_method != PaymentMethod::Gateway || order.status() != OrderStatus::Pending || order.is_paid() {
            return Err(CommerceError::IllegalStatusTransition { from: order.status(), to: OrderStatus::Confirmed });
        }
        Ok(())
    }
}
