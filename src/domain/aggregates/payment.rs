//! Payment attempts against gateway orders

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use crate::domain::value_objects::Money;

/// One row per attempt; an order may collect several.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub gateway: String,
    pub amount: Money,
    pub currency: String,
    pub(crate) status: PaymentStatus,
    pub gateway_order_ref: String,
    pub gateway_payment_ref: Option<String>,
    pub signature: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus { #[default] Pending, Success, Failed }

impl Payment {
    pub fn open(order_id: Uuid, gateway: &str, amount: Money, currency: &str, gateway_order_ref: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(), order_id, gateway: gateway.to_string(), amount, currency: currency.to_string(),
            status: PaymentStatus::Pending, gateway_order_ref: gateway_order_ref.into(),
            gateway_payment_ref: None, signature: None, created_at: now, updated_at: now,
        }
    }

    pub fn status(&self) -> PaymentStatus { self.status }

    pub fn succeed(&mut self, gateway_payment_ref: &str, signature: &str) {
        self.status = PaymentStatus::Success;
        self.gateway_payment_ref = Some(gateway_payment_ref.to_string());
        self.signature = Some(signature.to_string());
        self.updated_at = Utc::now();
    }

    /// A captured payment is never downgraded.
    pub fn fail(&mut self) -> bool {
        if self.status == PaymentStatus::Success { return false; }
        self.status = PaymentStatus::Failed;
        self.updated_at = Utc::now();
        true
    }
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Pending => "PENDING", Self::Success => "SUCCESS", Self::Failed => "FAILED" }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for PaymentStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("Unknown payment status {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_is_sticky() {
        let mut p = Payment::open(Uuid::new_v4(), "RAZORPAY", Money::from_major(450), "INR", "gw_1");
        p.succeed("pay_1", "sig");
        assert!(!p.fail());
        assert_eq!(p.status(), PaymentStatus::Success);
    }
}
