//! Transactional persistence seam
//!
//! Every core operation runs inside one [`StoreTx`]. Locking reads
//! (`lock_*`) hold the row until the transaction ends; dropping a transaction
//! without [`StoreTx::commit`] rolls all of its writes back.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::{
    Address, Cart, CartItem, Coupon, CouponUsage, Offer, Order, OrderItem, OrderStatus, Payment, Product, Variant,
    Wallet, WalletTransaction,
};
use crate::domain::value_objects::OrderNumber;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Storage error types
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// A cart line joined with the variant and product it points at.
#[derive(Clone, Debug)]
pub struct CartLine {
    pub item: CartItem,
    pub variant: Variant,
    pub product: Product,
}

/// Which orders a listing returns. Empty fields do not filter.
#[derive(Clone, Debug, Default)]
pub struct OrderFilter {
    pub user_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
    /// Case-insensitive substring of the order number.
    pub number_contains: Option<String>,
    /// Case-insensitive substring of the order number, shipping email or
    /// shipping name.
    pub search: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub created_before: Option<DateTime<Utc>>,
    pub sort: OrderSort,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OrderSort {
    #[default]
    NewestFirst,
    OldestFirst,
    TotalAsc,
    TotalDesc,
}

impl OrderSort {
    /// Parses `created_at`, `-created_at`, `total_amount` or `-total_amount`.
    pub fn from_param(value: &str) -> Option<Self> {
        match value {
            "-created_at" => Some(Self::NewestFirst),
            "created_at" => Some(Self::OldestFirst),
            "total_amount" => Some(Self::TotalAsc),
            "-total_amount" => Some(Self::TotalDesc),
            _ => None,
        }
    }
}

/// 1-based page of a listing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    pub const DEFAULT_PER_PAGE: u32 = 10;

    pub fn new(page: Option<u32>) -> Self {
        Self { page: page.unwrap_or(1).max(1), per_page: Self::DEFAULT_PER_PAGE }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.per_page)
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;
}

#[async_trait]
pub trait StoreTx: Send {
    // ---- catalog -------------------------------------------------------
    async fn find_active_product(&mut self, id: Uuid) -> StoreResult<Option<Product>>;
    async fn find_any_product(&mut self, id: Uuid) -> StoreResult<Option<Product>>;
    async fn find_active_variant(&mut self, id: Uuid) -> StoreResult<Option<Variant>>;
    /// Locks the variant row, deleted or not.
    async fn lock_variant(&mut self, id: Uuid) -> StoreResult<Option<Variant>>;
    async fn save_variant_stock(&mut self, variant: &Variant) -> StoreResult<()>;
    async fn variants_of_product(&mut self, product_id: Uuid) -> StoreResult<Vec<Variant>>;
    async fn save_product_stock(&mut self, product: &Product) -> StoreResult<()>;
    /// Active offers targeting the product or its category; time window not applied.
    async fn offers_for(&mut self, product_id: Uuid, category_id: Option<Uuid>) -> StoreResult<Vec<Offer>>;

    // ---- cart ----------------------------------------------------------
    async fn cart(&mut self, user_id: Uuid) -> StoreResult<Cart>;
    /// Lines whose variant and product are live, without locks.
    async fn cart_lines(&mut self, user_id: Uuid) -> StoreResult<Vec<CartLine>>;
    /// Lines whose variant and product are live, variants locked in id order.
    async fn lock_cart_lines(&mut self, user_id: Uuid) -> StoreResult<Vec<CartLine>>;
    /// Locks the user's raw cart rows in variant order, without touching variants.
    async fn lock_cart_items(&mut self, user_id: Uuid) -> StoreResult<Vec<CartItem>>;
    async fn save_cart_item(&mut self, item: &CartItem) -> StoreResult<()>;
    async fn delete_cart_item(&mut self, user_id: Uuid, variant_id: Uuid) -> StoreResult<bool>;
    async fn clear_cart(&mut self, user_id: Uuid) -> StoreResult<u64>;

    // ---- addresses -----------------------------------------------------
    async fn find_address(&mut self, id: Uuid) -> StoreResult<Option<Address>>;

    // ---- coupons -------------------------------------------------------
    async fn find_coupon(&mut self, id: Uuid) -> StoreResult<Option<Coupon>>;
    async fn find_coupon_by_code(&mut self, code: &str) -> StoreResult<Option<Coupon>>;
    async fn coupon_used(&mut self, user_id: Uuid, coupon_id: Uuid) -> StoreResult<bool>;
    /// Inserts the usage row unless (user, coupon) already has one. Returns
    /// whether this call inserted it.
    async fn claim_coupon(&mut self, usage: &CouponUsage) -> StoreResult<bool>;

    // ---- orders --------------------------------------------------------
    async fn order_number_taken(&mut self, number: &OrderNumber) -> StoreResult<bool>;
    async fn insert_order(&mut self, order: &Order, items: &[OrderItem]) -> StoreResult<()>;
    async fn find_order(&mut self, number: &OrderNumber) -> StoreResult<Option<Order>>;
    async fn lock_order(&mut self, number: &OrderNumber) -> StoreResult<Option<Order>>;
    async fn lock_order_by_id(&mut self, id: Uuid) -> StoreResult<Option<Order>>;
    async fn order_items(&mut self, order_id: Uuid) -> StoreResult<Vec<OrderItem>>;
    async fn save_order(&mut self, order: &Order) -> StoreResult<()>;
    /// One page of matching orders plus the total match count.
    async fn list_orders(&mut self, filter: &OrderFilter, page: PageRequest) -> StoreResult<(Vec<Order>, u64)>;

    // ---- wallets -------------------------------------------------------
    async fn find_wallet(&mut self, user_id: Uuid) -> StoreResult<Option<Wallet>>;
    /// Locks the user's wallet, opening an empty one first if needed.
    async fn lock_or_open_wallet(&mut self, user_id: Uuid) -> StoreResult<Wallet>;
    /// Persists the new balance and its ledger row together.
    async fn append_wallet_entry(&mut self, wallet: &Wallet, entry: &WalletTransaction) -> StoreResult<()>;
    async fn wallet_transactions(&mut self, wallet_id: Uuid) -> StoreResult<Vec<WalletTransaction>>;

    // ---- payments ------------------------------------------------------
    async fn insert_payment(&mut self, payment: &Payment) -> StoreResult<()>;
    async fn lock_payment_by_ref(&mut self, gateway_order_ref: &str) -> StoreResult<Option<Payment>>;
    async fn save_payment(&mut self, payment: &Payment) -> StoreResult<()>;
    async fn payments_for_order(&mut self, order_id: Uuid) -> StoreResult<Vec<Payment>>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
