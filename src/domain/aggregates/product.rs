//! Product Aggregate
//!
//! A product is sold through one or more variants (SKUs). Stock lives on the
//! variant; the product keeps a cached total that the stock ledger refreshes
//! after every variant mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::Money;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub category_id: Option<Uuid>,
    pub price: Money,
    /// Sum of non-deleted variant stock.
    pub stock: u32,
    pub is_listed: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Variant {
    pub id: Uuid,
    pub product_id: Uuid,
    pub label: String,
    pub stock: u32,
    pub is_listed: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn create(name: impl Into<String>, category_id: Option<Uuid>, price: Money) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(), name: name.into(), category_id, price,
            stock: 0, is_listed: false, deleted_at: None, created_at: now, updated_at: now,
        }
    }

    pub fn is_deleted(&self) -> bool { self.deleted_at.is_some() }

    /// Refresh the cached stock and listing from the product's variants.
    /// Variants of other products and soft-deleted variants are ignored.
    pub fn recompute_from(&mut self, variants: &[Variant]) {
        let live = variants.iter().filter(|v| v.product_id == self.id && !v.is_deleted());
        let (stock, listed) = live.fold((0u32, false), |(stock, listed), v| {
            (stock.saturating_add(v.stock), listed || v.is_listed)
        });
        self.stock = stock;
        self.is_listed = listed;
        self.touch();
    }

    pub fn soft_delete(&mut self) { self.deleted_at = Some(Utc::now()); self.is_listed = false; self.touch(); }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

impl Variant {
    pub fn create(product_id: Uuid, label: impl Into<String>, stock: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(), product_id, label: label.into(), stock, is_listed: stock > 0,
            deleted_at: None, created_at: now, updated_at: now,
        }
    }

    pub fn is_deleted(&self) -> bool { self.deleted_at.is_some() }

    /// Units that may still be bought.
    pub fn available(&self) -> u32 { if self.is_deleted() { 0 } else { self.stock } }

    pub fn remove_stock(&mut self, qty: u32) -> Result<(), ProductError> {
        self.stock = self.stock.checked_sub(qty).ok_or(ProductError::InsufficientInventory { requested: qty, available: self.stock })?;
        self.refresh_listing();
        Ok(())
    }

    pub fn add_stock(&mut self, qty: u32) {
        self.stock = self.stock.saturating_add(qty);
        self.refresh_listing();
    }

    pub fn soft_delete(&mut self) { self.deleted_at = Some(Utc::now()); self.is_listed = false; self.touch(); }

    // A variant with no stock is never listed.
    fn refresh_listing(&mut self) {
        self.is_listed = self.stock > 0 && !self.is_deleted();
        self.touch();
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum ProductError { InsufficientInventory { requested: u32, available: u32 } }
impl std::error::Error for ProductError {}
impl std::fmt::Display for ProductError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientInventory { requested, available } => write!(f, "Insufficient inventory: requested {}, available {}", requested, available),
        }
    }
}
