//! OpenSASE Commerce Core
//!
//! Transaction core of a self-hosted shop.
//!
//! ## Features
//! - Cart with per-line quantity caps
//! - Checkout with row-locked stock control
//! - Product/category offers and single-use coupons
//! - Order lifecycle: payment, fulfilment, cancellation, returns
//! - Wallet ledger for refunds and wallet payments
//! - Signed gateway callbacks

pub mod config;
pub mod domain;
pub mod http;
pub mod services;
pub mod store;

use thiserror::Error;
use uuid::Uuid;

use domain::aggregates::{CartError, OrderError, OrderStatus, WalletError};
use domain::value_objects::Money;
use services::coupon::CouponRejection;
use store::StoreError;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum CommerceError {
    #[error("Your cart is empty")]
    EmptyCart,

    #[error("Insufficient stock for variant {variant_id}: requested {requested}, available {available}")]
    InsufficientStock { variant_id: Uuid, requested: u32, available: u32 },

    #[error("Insufficient wallet balance: required {required}, available {available}")]
    InsufficientFunds { required: Money, available: Money },

    #[error("Invalid coupon: {0}")]
    InvalidCoupon(CouponRejection),

    #[error("Invalid shipping address")]
    InvalidAddress,

    #[error("Cannot change order status from {from} to {to}")]
    IllegalStatusTransition { from: OrderStatus, to: OrderStatus },

    #[error("Invalid quantity {0}")]
    InvalidQuantity(u32),

    #[error("Amount must be positive, got {0}")]
    InvalidAmount(Money),

    #[error("This variant is unavailable")]
    VariantUnavailable,

    #[error("A reason is required")]
    MissingReason,

    #[error("Order not found")]
    OrderNotFound,

    #[error("Item not found in cart")]
    CartItemNotFound,

    #[error("Payment not found")]
    PaymentNotFound,

    #[error("Payment signature mismatch")]
    SignatureMismatch,

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl CommerceError {
    /// Whether the caller can fix the request; systemic failures are not.
    pub fn is_user_recoverable(&self) -> bool {
        !matches!(self, Self::Gateway(_) | Self::Storage(_))
    }
}

impl From<OrderError> for CommerceError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::IllegalTransition { from, to } => Self::IllegalStatusTransition { from, to },
            other => Self::Storage(StoreError::Corrupt(other.to_string())),
        }
    }
}

impl From<WalletError> for CommerceError {
    fn from(e: WalletError) -> Self {
        match e {
            WalletError::InsufficientFunds { required, available } => Self::InsufficientFunds { required, available },
            WalletError::NonPositiveAmount(amount) => Self::InvalidAmount(amount),
            other => Self::Storage(StoreError::Corrupt(other.to_string())),
        }
    }
}

impl From<CartError> for CommerceError {
    fn from(e: CartError) -> Self {
        match e {
            CartError::ItemNotFound => Self::CartItemNotFound,
            CartError::OutOfStock => Self::VariantUnavailable,
            CartError::InvalidQuantity(q) => Self::InvalidQuantity(q),
        }
    }
}

pub type Result<T> = std::result::Result<T, CommerceError>;
