//! Coupon validation

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::{Coupon, MINIMUM_PAYABLE};
use crate::domain::value_objects::{Money, Percentage};
use crate::store::StoreTx;
use crate::{CommerceError, Result};

/// Why a coupon cannot be used. Checked in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CouponRejection {
    #[error("coupon does not exist or is no longer active")]
    NotFound,

    #[error("coupon has expired")]
    Expired,

    #[error("order subtotal is below the coupon minimum of {minimum}")]
    BelowMinimum { minimum: Money },

    #[error("coupon has already been used")]
    AlreadyUsed,
}

/// How the caller refers to a coupon.
#[derive(Clone, Copy, Debug)]
pub enum CouponRef<'a> {
    Code(&'a str),
    Id(Uuid),
}

/// A coupon that passed validation, with its discount for the given subtotal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AppliedCoupon {
    pub coupon_id: Uuid,
    pub code: String,
    pub percentage: Percentage,
    pub discount: Money,
}

pub struct CouponValidator;

impl CouponValidator {
    #[tracing::instrument(skip(tx))]
    pub async fn validate(
        tx: &mut dyn StoreTx,
        coupon: CouponRef<'_>,
        user_id: Uuid,
        subtotal: Money,
        now: DateTime<Utc>,
    ) -> Result<AppliedCoupon> {
        let found = match coupon {
            CouponRef::Code(code) => tx.find_coupon_by_code(&Coupon::normalize_code(code)).await?,
            CouponRef::Id(id) => tx.find_coupon(id).await?,
        };
        let coupon = found.filter(|c| c.is_active).ok_or(CommerceError::InvalidCoupon(CouponRejection::NotFound))?;
        Self::check(&coupon, subtotal, now).map_err(CommerceError::InvalidCoupon)?;
        if tx.coupon_used(user_id, coupon.id).await? {
            return Err(CommerceError::InvalidCoupon(CouponRejection::AlreadyUsed));
        }
        Ok(AppliedCoupon {
            coupon_id: coupon.id,
            code: coupon.code,
            percentage: coupon.discount,
            discount: Self::discount_for(subtotal, coupon.discount),
        })
    }

    /// Checks that need no store access.
    pub fn check(coupon: &Coupon, subtotal: Money, now: DateTime<Utc>) -> std::result::Result<(), CouponRejection> {
        if !coupon.is_active {
            return Err(CouponRejection::NotFound);
        }
        if coupon.is_expired(now) {
            return Err(CouponRejection::Expired);
        }
        if subtotal < coupon.min_order_amount {
            return Err(CouponRejection::BelowMinimum { minimum: coupon.min_order_amount });
        }
        Ok(())
    }

    /// `subtotal * pct / 100`, clamped so at least [`MINIMUM_PAYABLE`] remains.
    pub fn discount_for(subtotal: Money, pct: Percentage) -> Money {
        subtotal.percent(pct).min(subtotal - MINIMUM_PAYABLE).max(Money::ZERO)
    }
}
