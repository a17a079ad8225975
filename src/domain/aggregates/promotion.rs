//! Offers and coupons

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::{Money, Percentage};

/// What an offer discounts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum OfferScope {
    Product(Uuid),
    Category(Uuid),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Offer {
    pub id: Uuid,
    pub scope: OfferScope,
    pub discount: Percentage,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Offer {
    pub fn new(scope: OfferScope, discount: Percentage, start_date: DateTime<Utc>, end_date: DateTime<Utc>) -> Result<Self, PromotionError> {
        if end_date < start_date { return Err(PromotionError::InvertedWindow); }
        Ok(Self { id: Uuid::now_v7(), scope, discount, start_date, end_date, is_active: true, created_at: Utc::now() })
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.start_date <= now && now <= self.end_date
    }

    /// At most one active offer may exist per product and per category.
    pub fn check_exclusive(&self, existing: &[Offer]) -> Result<(), PromotionError> {
        if !self.is_active { return Ok(()); }
        let clash = existing.iter().any(|o| o.id != self.id && o.is_active && o.scope == self.scope);
        if clash { Err(PromotionError::ActiveOfferExists(self.scope)) } else { Ok(()) }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    pub discount: Percentage,
    pub min_order_amount: Money,
    pub expiry_date: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Coupon {
    pub fn new(code: &str, discount: Percentage, min_order_amount: Money, expiry_date: DateTime<Utc>) -> Result<Self, PromotionError> {
        let code = Self::normalize_code(code);
        if code.is_empty() { return Err(PromotionError::EmptyCode); }
        Ok(Self { id: Uuid::now_v7(), code, discount, min_order_amount, expiry_date, is_active: true, created_at: Utc::now() })
    }

    pub fn normalize_code(code: &str) -> String { code.trim().to_uppercase() }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool { now > self.expiry_date }
}

/// One row per (user, coupon); its existence means the coupon is spent for that user.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CouponUsage {
    pub user_id: Uuid,
    pub coupon_id: Uuid,
    pub order_id: Uuid,
    pub used_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum PromotionError { InvertedWindow, EmptyCode, ActiveOfferExists(OfferScope) }
impl std::error::Error for PromotionError {}
impl std::fmt::Display for PromotionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvertedWindow => write!(f, "Offer ends before it starts"),
            Self::EmptyCode => write!(f, "Coupon code empty"),
            Self::ActiveOfferExists(OfferScope::Product(_)) => write!(f, "An active offer already exists for this product"),
            Self::ActiveOfferExists(OfferScope::Category(_)) => write!(f, "An active offer already exists for this category"),
        }
    }
}
