//! Wallet ledger and wallet queries
//!
//! The balance and the transaction row that explains it are always written in
//! the same store transaction.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::{Wallet, WalletTransaction};
use crate::domain::value_objects::Money;
use crate::store::{Store, StoreTx};
use crate::{CommerceError, Result};

pub struct WalletLedger;

impl WalletLedger {
    pub async fn credit(
        tx: &mut dyn StoreTx,
        user_id: Uuid,
        amount: Money,
        description: &str,
        order_id: Option<Uuid>,
    ) -> Result<WalletTransaction> {
        if !amount.is_positive() {
            return Err(CommerceError::InvalidAmount(amount));
        }
        let mut wallet = tx.lock_or_open_wallet(user_id).await?;
        let entry = wallet.credit(amount, description, order_id)?;
        tx.append_wallet_entry(&wallet, &entry).await?;
        tracing::info!(user_id = %user_id, amount = %amount, balance = %wallet.balance(), "Wallet credited");
        Ok(entry)
    }

    pub async fn debit(
        tx: &mut dyn StoreTx,
        user_id: Uuid,
        amount: Money,
        description: &str,
        order_id: Option<Uuid>,
    ) -> Result<WalletTransaction> {
        if !amount.is_positive() {
            return Err(CommerceError::InvalidAmount(amount));
        }
        let mut wallet = tx.lock_or_open_wallet(user_id).await?;
        let entry = wallet.debit(amount, description, order_id)?;
        tx.append_wallet_entry(&wallet, &entry).await?;
        tracing::info!(user_id = %user_id, amount = %amount, balance = %wallet.balance(), "Wallet debited");
        Ok(entry)
    }
}

/// Balance plus history, newest last.
#[derive(Clone, Debug, Serialize)]
pub struct WalletStatement {
    pub balance: Money,
    pub transactions: Vec<WalletTransaction>,
}

#[derive(Clone)]
pub struct WalletService {
    store: Arc<dyn Store>,
}

impl WalletService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn balance(&self, user_id: Uuid) -> Result<Money> {
        let mut tx = self.store.begin().await?;
        Ok(tx.find_wallet(user_id).await?.map(|w| w.balance()).unwrap_or(Money::ZERO))
    }

    pub async fn transactions(&self, user_id: Uuid) -> Result<Vec<WalletTransaction>> {
        Ok(self.statement(user_id).await?.transactions)
    }

    pub async fn statement(&self, user_id: Uuid) -> Result<WalletStatement> {
        let mut tx = self.store.begin().await?;
        let Some(wallet) = tx.find_wallet(user_id).await? else {
            return Ok(WalletStatement { balance: Money::ZERO, transactions: vec![] });
        };
        let transactions = tx.wallet_transactions(wallet.id).await?;
        Ok(WalletStatement { balance: wallet.balance(), transactions })
    }

    /// Credit in a transaction of its own, for admin refunds.
    #[tracing::instrument(skip(self))]
    pub async fn credit(&self, user_id: Uuid, amount: Money, description: &str) -> Result<Wallet> {
        let mut tx = self.store.begin().await?;
        WalletLedger::credit(tx.as_mut(), user_id, amount, description, None).await?;
        let wallet = tx.lock_or_open_wallet(user_id).await?;
        tx.commit().await?;
        Ok(wallet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::ledger_balance;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_ledger_matches_balance() {
        let store = Arc::new(MemoryStore::new());
        let wallets = WalletService::new(store.clone());
        let user = Uuid::new_v4();
        wallets.credit(user, Money::from_major(300), "Top up").await.unwrap();

        let mut tx = store.begin().await.unwrap();
        WalletLedger::debit(tx.as_mut(), user, Money::from_minor(12050), "Order", None).await.unwrap();
        tx.commit().await.unwrap();

        let statement = wallets.statement(user).await.unwrap();
        assert_eq!(statement.balance, Money::from_minor(17950));
        assert_eq!(ledger_balance(&statement.transactions), statement.balance);
    }

    #[tokio::test]
    async fn test_overdraft_leaves_balance() {
        let store = Arc::new(MemoryStore::new());
        let wallets = WalletService::new(store.clone());
        let user = Uuid::new_v4();
        wallets.credit(user, Money::from_major(10), "Top up").await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = WalletLedger::debit(tx.as_mut(), user, Money::from_major(25), "Order", None).await.unwrap_err();
        assert!(matches!(err, CommerceError::InsufficientFunds { .. }));
        drop(tx);
        assert_eq!(wallets.balance(user).await.unwrap(), Money::from_major(10));
        assert_eq!(wallets.transactions(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_non_positive_amount_rejected() {
        let store = Arc::new(MemoryStore::new());
        let wallets = WalletService::new(store);
        let err = wallets.credit(Uuid::new_v4(), Money::ZERO, "Nothing").await.unwrap_err();
        assert!(matches!(err, CommerceError::InvalidAmount(_)));
    }
}
