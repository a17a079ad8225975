//! Wallet Aggregate
//!
//! The transaction rows are the ledger; `balance` is a cache that must change
//! in the same unit of work as the row that explains it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use crate::domain::value_objects::Money;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: Uuid,
    balance: Money,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub kind: TransactionKind,
    pub amount: Money,
    pub description: String,
    pub order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind { Credit, Debit }

impl Wallet {
    pub fn open(user_id: Uuid) -> Self {
        Self { id: Uuid::now_v7(), user_id, balance: Money::ZERO, updated_at: Utc::now() }
    }

    /// Rebuild from storage.
    pub fn restore(id: Uuid, user_id: Uuid, balance: Money, updated_at: DateTime<Utc>) -> Self {
        Self { id, user_id, balance, updated_at }
    }

    pub fn balance(&self) -> Money { self.balance }

    pub fn credit(&mut self, amount: Money, description: impl Into<String>, order_id: Option<Uuid>) -> Result<WalletTransaction, WalletError> {
        if !amount.is_positive() { return Err(WalletError::NonPositiveAmount(amount)); }
        self.balance = self.balance + amount;
        Ok(self.record(TransactionKind::Credit, amount, description.into(), order_id))
    }

    pub fn debit(&mut self, amount: Money, description: impl Into<String>, order_id: Option<Uuid>) -> Result<WalletTransaction, WalletError> {
        if !amount.is_positive() { return Err(WalletError::NonPositiveAmount(amount)); }
        if self.balance < amount {
            return Err(WalletError::InsufficientFunds { required: amount, available: self.balance });
        }
        self.balance = self.balance - amount;
        Ok(self.record(TransactionKind::Debit, amount, description.into(), order_id))
    }

    fn record(&mut self, kind: TransactionKind, amount: Money, description: String, order_id: Option<Uuid>) -> WalletTransaction {
        let now = Utc::now();
        self.updated_at = now;
        WalletTransaction { id: Uuid::now_v7(), wallet_id: self.id, kind, amount, description, order_id, created_at: now }
    }
}

/// Signed sum of a ledger; equals the wallet balance when the ledger is consistent.
pub fn ledger_balance(transactions: &[WalletTransaction]) -> Money {
    transactions.iter().fold(Money::ZERO, |acc, t| match t.kind {
        TransactionKind::Credit => acc + t.amount,
        TransactionKind::Debit => acc - t.amount,
    })
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str { match self { Self::Credit => "CREDIT", Self::Debit => "DEBIT" } }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for TransactionKind {
    type Err = WalletError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s { "CREDIT" => Ok(Self::Credit), "DEBIT" => Ok(Self::Debit), other => Err(WalletError::UnknownKind(other.to_string())) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletError { InsufficientFunds { required: Money, available: Money }, NonPositiveAmount(Money), UnknownKind(String) }
impl std::error::Error for WalletError {}
impl fmt::Display for WalletError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientFunds { required, available } => write!(f, "Insufficient wallet balance: required {}, available {}", required, available),
            Self::NonPositiveAmount(a) => write!(f, "Amount must be positive, got {}", a),
            Self::UnknownKind(k) => write!(f, "Unknown transaction type {}", k),
        }
    }
}
