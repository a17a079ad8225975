//! Order Aggregate
//!
//! An order is a snapshot: shipping fields and line items are copied at
//! placement so later catalog or address edits never rewrite history. After
//! placement only the status, payment flag and reason fields change, and the
//! status only moves along [`OrderStatus::allowed_targets`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use crate::domain::aggregates::address::Address;
use crate::domain::value_objects::{Money, OrderNumber};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: OrderNumber,
    pub user_id: Uuid,
    pub shipping: ShippingSnapshot,
    pub pricing: PriceBreakdown,
    pub(crate) status: OrderStatus,
    pub(crate) is_paid: bool,
    pub payment_method: PaymentMethod,
    pub coupon_id: Option<Uuid>,
    /// Whether stock has been taken for this order's items.
    pub(crate) stock_committed: bool,
    pub cancellation_reason: Option<String>,
    pub return_reason: Option<String>,
    pub return_rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub product_name: String,
    pub variant_label: String,
    pub unit_price: Money,
    pub quantity: u32,
    pub line_total: Money,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingSnapshot {
    pub full_name: String,
    pub phone: String,
    pub email: String,
    pub address_line: String,
    pub city: String,
    pub state: String,
    pub pincode: String,
    pub country: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub subtotal: Money,
    pub tax: Money,
    pub shipping: Money,
    pub discount: Money,
    pub total: Money,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Shipped,
    OutForDelivery,
    Delivered,
    ReturnRequested,
    ReturnProcessing,
    Returned,
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cod,
    Wallet,
    Gateway,
}

/// Smallest amount an order may ever charge.
pub const MINIMUM_PAYABLE: Money = Money::ONE;

impl OrderStatus {
    pub const ALL: [OrderStatus; 9] = [
        Self::Pending, Self::Confirmed, Self::Shipped, Self::OutForDelivery, Self::Delivered,
        Self::ReturnRequested, Self::ReturnProcessing, Self::Returned, Self::Cancelled,
    ];

    pub fn allowed_targets(&self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Pending => &[Confirmed, Cancelled],
            Confirmed => &[Shipped, Cancelled],
            Shipped => &[OutForDelivery],
            OutForDelivery => &[Delivered],
            Delivered => &[ReturnRequested],
            // Delivered here means the return was rejected.
            ReturnRequested => &[ReturnProcessing, Delivered],
            ReturnProcessing => &[Returned],
            Returned | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: OrderStatus) -> bool { self.allowed_targets().contains(&target) }
    pub fn is_terminal(&self) -> bool { self.allowed_targets().is_empty() }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Shipped => "SHIPPED",
            Self::OutForDelivery => "OUT_FOR_DELIVERY",
            Self::Delivered => "DELIVERED",
            Self::ReturnRequested => "RETURN_REQUESTED",
            Self::ReturnProcessing => "RETURN_PROCESSING",
            Self::Returned => "RETURNED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for OrderStatus {
    type Err = OrderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|st| st.as_str().eq_ignore_ascii_case(s.trim())).ok_or_else(|| OrderError::UnknownStatus(s.to_string()))
    }
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Cod => "COD", Self::Wallet => "WALLET", Self::Gateway => "GATEWAY" }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for PaymentMethod {
    type Err = OrderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "COD" => Ok(Self::Cod),
            "WALLET" => Ok(Self::Wallet),
            "GATEWAY" => Ok(Self::Gateway),
            other => Err(OrderError::UnknownPaymentMethod(other.to_string())),
        }
    }
}

impl PriceBreakdown {
    /// `total = subtotal + tax + shipping - discount`, never below [`MINIMUM_PAYABLE`].
    pub fn compute(subtotal: Money, tax: Money, shipping: Money, discount: Money) -> Self {
        let total = (subtotal + tax + shipping - discount).max(MINIMUM_PAYABLE);
        Self { subtotal, tax, shipping, discount, total }
    }
}

impl ShippingSnapshot {
    pub fn from_address(address: &Address) -> Self {
        Self {
            full_name: format!("{} {}", address.first_name, address.last_name).trim().to_string(),
            phone: address.phone.clone(),
            email: address.email.clone(),
            address_line: address.street_address.clone(),
            city: address.city.clone(),
            state: address.state.clone(),
            pincode: address.pin_code.clone(),
            country: address.country.clone(),
        }
    }
}

impl Order {
    pub fn place(
        order_number: OrderNumber,
        user_id: Uuid,
        shipping: ShippingSnapshot,
        pricing: PriceBreakdown,
        payment_method: PaymentMethod,
        coupon_id: Option<Uuid>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(), order_number, user_id, shipping, pricing,
            status: OrderStatus::Pending, is_paid: false, payment_method, coupon_id, stock_committed: false,
            cancellation_reason: None, return_reason: None, return_rejection_reason: None,
            created_at: now, updated_at: now,
        }
    }

    pub fn status(&self) -> OrderStatus { self.status }
    pub fn is_paid(&self) -> bool { self.is_paid }
    pub fn stock_committed(&self) -> bool { self.stock_committed }
    pub fn total(&self) -> Money { self.pricing.total }

    /// Move along the transition table. Illegal moves leave the order untouched.
    pub fn transition_to(&mut self, target: OrderStatus) -> Result<OrderStatus, OrderError> {
        let from = self.status;
        if !from.can_transition_to(target) {
            return Err(OrderError::IllegalTransition { from, to: target });
        }
        self.status = target;
        self.touch();
        Ok(from)
    }

    /// Payment captured and stock taken: PENDING -> CONFIRMED.
    pub fn confirm_paid(&mut self) -> Result<(), OrderError> {
        self.transition_to(OrderStatus::Confirmed)?;
        self.is_paid = true;
        self.stock_committed = true;
        Ok(())
    }

    pub(crate) fn mark_stock_committed(&mut self) { self.stock_committed = true; self.touch(); }
    pub(crate) fn mark_stock_released(&mut self) { self.stock_committed = false; self.touch(); }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

impl OrderItem {
    pub fn snapshot(order_id: Uuid, product_id: Uuid, variant_id: Uuid, product_name: &str, variant_label: &str, unit_price: Money, quantity: u32) -> Self {
        Self {
            id: Uuid::now_v7(), order_id, product_id, variant_id,
            product_name: product_name.to_string(), variant_label: variant_label.to_string(),
            unit_price, quantity, line_total: unit_price.multiply(quantity), created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderError { IllegalTransition { from: OrderStatus, to: OrderStatus }, UnknownStatus(String), UnknownPaymentMethod(String) }
impl std::error::Error for OrderError {}
impl fmt::Display for OrderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IllegalTransition { from, to } => write!(f, "Cannot change order status from {} to {}", from, to),
            Self::UnknownStatus(s) => write!(f, "Unknown order status {}", s),
            Self::UnknownPaymentMethod(s) => write!(f, "Unknown payment method {}", s),
        }
    }
}
