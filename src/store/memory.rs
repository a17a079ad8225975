//! In-process store
//!
//! A transaction owns the single table lock for its whole life and works on a
//! private copy of the tables; `commit` swaps the copy in, dropping discards
//! it. Transactions are therefore fully serialised, which gives the same
//! no-oversell and no-lost-update guarantees as row locks.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{CartLine, OrderFilter, OrderSort, PageRequest, Store, StoreError, StoreResult, StoreTx};
use crate::domain::aggregates::{
    Address, Cart, CartItem, Coupon, CouponUsage, Offer, OfferScope, Order, OrderItem, Payment, Product, Variant,
    Wallet, WalletTransaction,
};
use crate::domain::value_objects::OrderNumber;

#[derive(Clone, Debug, Default)]
struct Tables {
    products: BTreeMap<Uuid, Product>,
    variants: BTreeMap<Uuid, Variant>,
    offers: Vec<Offer>,
    coupons: BTreeMap<Uuid, Coupon>,
    coupon_usages: HashMap<(Uuid, Uuid), CouponUsage>,
    addresses: HashMap<Uuid, Address>,
    cart_items: BTreeMap<(Uuid, Uuid), CartItem>,
    orders: BTreeMap<Uuid, Order>,
    order_items: Vec<OrderItem>,
    wallets: HashMap<Uuid, Wallet>,
    wallet_transactions: Vec<WalletTransaction>,
    payments: BTreeMap<Uuid, Payment>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    work: Tables,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    // Catalog seeding stands in for the catalog-management collaborator.

    pub async fn insert_product(&self, product: Product) {
        self.tables.lock().await.products.insert(product.id, product);
    }

    /// Adds a variant and refreshes its product's cached stock.
    pub async fn insert_variant(&self, variant: Variant) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        let product_id = variant.product_id;
        if !t.products.contains_key(&product_id) {
            return Err(StoreError::NotFound(format!("product {}", product_id)));
        }
        t.variants.insert(variant.id, variant);
        let variants: Vec<Variant> = t.variants.values().filter(|v| v.product_id == product_id).cloned().collect();
        if let Some(product) = t.products.get_mut(&product_id) {
            product.recompute_from(&variants);
        }
        Ok(())
    }

    pub async fn insert_offer(&self, offer: Offer) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        offer.check_exclusive(&t.offers).map_err(|e| StoreError::Duplicate(e.to_string()))?;
        t.offers.push(offer);
        Ok(())
    }

    pub async fn insert_coupon(&self, coupon: Coupon) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        if t.coupons.values().any(|c| c.code == coupon.code) {
            return Err(StoreError::Duplicate(format!("coupon code {}", coupon.code)));
        }
        t.coupons.insert(coupon.id, coupon);
        Ok(())
    }

    pub async fn insert_address(&self, address: Address) {
        self.tables.lock().await.addresses.insert(address.id, address);
    }

    pub async fn variant(&self, id: Uuid) -> Option<Variant> { self.tables.lock().await.variants.get(&id).cloned() }

    pub async fn product(&self, id: Uuid) -> Option<Product> { self.tables.lock().await.products.get(&id).cloned() }

    pub async fn coupon_usage_count(&self, user_id: Uuid) -> usize {
        self.tables.lock().await.coupon_usages.keys().filter(|(u, _)| *u == user_id).count()
    }

    pub async fn order_count(&self) -> usize { self.tables.lock().await.orders.len() }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = self.tables.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx { guard, work }))
    }
}

impl MemoryTx {
    fn live_lines(&self, user_id: Uuid) -> Vec<CartLine> {
        let t = &self.work;
        let mut lines: Vec<CartLine> = t
            .cart_items
            .range((user_id, Uuid::nil())..=(user_id, Uuid::from_u128(u128::MAX)))
            .filter_map(|(_, item)| {
                let variant = t.variants.get(&item.variant_id).filter(|v| !v.is_deleted())?;
                let product = t.products.get(&variant.product_id).filter(|p| !p.is_deleted())?;
                Some(CartLine { item: item.clone(), variant: variant.clone(), product: product.clone() })
            })
            .collect();
        lines.sort_by_key(|l| l.variant.id);
        lines
    }

    fn order_by_number(&self, number: &OrderNumber) -> Option<Order> {
        self.work.orders.values().find(|o| &o.order_number == number).cloned()
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn find_active_product(&mut self, id: Uuid) -> StoreResult<Option<Product>> {
        Ok(self.work.products.get(&id).filter(|p| !p.is_deleted()).cloned())
    }

    async fn find_any_product(&mut self, id: Uuid) -> StoreResult<Option<Product>> {
        Ok(self.work.products.get(&id).cloned())
    }

    async fn find_active_variant(&mut self, id: Uuid) -> StoreResult<Option<Variant>> {
        Ok(self.work.variants.get(&id).filter(|v| !v.is_deleted()).cloned())
    }

    async fn lock_variant(&mut self, id: Uuid) -> StoreResult<Option<Variant>> {
        Ok(self.work.variants.get(&id).cloned())
    }

    async fn save_variant_stock(&mut self, variant: &Variant) -> StoreResult<()> {
        let row = self.work.variants.get_mut(&variant.id).ok_or_else(|| StoreError::NotFound(format!("variant {}", variant.id)))?;
        row.stock = variant.stock;
        row.is_listed = variant.is_listed;
        row.updated_at = variant.updated_at;
        Ok(())
    }

    async fn variants_of_product(&mut self, product_id: Uuid) -> StoreResult<Vec<Variant>> {
        Ok(self.work.variants.values().filter(|v| v.product_id == product_id).cloned().collect())
    }

    async fn save_product_stock(&mut self, product: &Product) -> StoreResult<()> {
        let row = self.work.products.get_mut(&product.id).ok_or_else(|| StoreError::NotFound(format!("product {}", product.id)))?;
        row.stock = product.stock;
        row.is_listed = product.is_listed;
        row.updated_at = product.updated_at;
        Ok(())
    }

    async fn offers_for(&mut self, product_id: Uuid, category_id: Option<Uuid>) -> StoreResult<Vec<Offer>> {
        Ok(self
            .work
            .offers
            .iter()
            .filter(|o| o.is_active)
            .filter(|o| match o.scope {
                OfferScope::Product(id) => id == product_id,
                OfferScope::Category(id) => Some(id) == category_id,
            })
            .cloned()
            .collect())
    }

    async fn cart(&mut self, user_id: Uuid) -> StoreResult<Cart> {
        let items = self.work.cart_items.range((user_id, Uuid::nil())..=(user_id, Uuid::from_u128(u128::MAX))).map(|(_, i)| i.clone()).collect();
        Ok(Cart::with_items(user_id, items))
    }

    async fn cart_lines(&mut self, user_id: Uuid) -> StoreResult<Vec<CartLine>> {
        Ok(self.live_lines(user_id))
    }

    async fn lock_cart_lines(&mut self, user_id: Uuid) -> StoreResult<Vec<CartLine>> {
        Ok(self.live_lines(user_id))
    }

    async fn lock_cart_items(&mut self, user_id: Uuid) -> StoreResult<Vec<CartItem>> {
        Ok(self.cart(user_id).await?.items().to_vec())
    }

    async fn save_cart_item(&mut self, item: &CartItem) -> StoreResult<()> {
        self.work.cart_items.insert((item.user_id, item.variant_id), item.clone());
        Ok(())
    }

    async fn delete_cart_item(&mut self, user_id: Uuid, variant_id: Uuid) -> StoreResult<bool> {
        Ok(self.work.cart_items.remove(&(user_id, variant_id)).is_some())
    }

    async fn clear_cart(&mut self, user_id: Uuid) -> StoreResult<u64> {
        let before = self.work.cart_items.len();
        self.work.cart_items.retain(|(u, _), _| *u != user_id);
        Ok((before - self.work.cart_items.len()) as u64)
    }

    async fn find_address(&mut self, id: Uuid) -> StoreResult<Option<Address>> {
        Ok(self.work.addresses.get(&id).cloned())
    }

    async fn find_coupon(&mut self, id: Uuid) -> StoreResult<Option<Coupon>> {
        Ok(self.work.coupons.get(&id).cloned())
    }

    async fn find_coupon_by_code(&mut self, code: &str) -> StoreResult<Option<Coupon>> {
        Ok(self.work.coupons.values().find(|c| c.code == code).cloned())
    }

    async fn coupon_used(&mut self, user_id: Uuid, coupon_id: Uuid) -> StoreResult<bool> {
        Ok(self.work.coupon_usages.contains_key(&(user_id, coupon_id)))
    }

    async fn claim_coupon(&mut self, usage: &CouponUsage) -> StoreResult<bool> {
        let key = (usage.user_id, usage.coupon_id);
        if self.work.coupon_usages.contains_key(&key) {
            return Ok(false);
        }
        self.work.coupon_usages.insert(key, usage.clone());
        Ok(true)
    }

    async fn order_number_taken(&mut self, number: &OrderNumber) -> StoreResult<bool> {
        Ok(self.work.orders.values().any(|o| &o.order_number == number))
    }

    async fn insert_order(&mut self, order: &Order, items: &[OrderItem]) -> StoreResult<()> {
        if self.work.orders.values().any(|o| o.order_number == order.order_number) {
            return Err(StoreError::Duplicate(format!("order number {}", order.order_number)));
        }
        self.work.orders.insert(order.id, order.clone());
        self.work.order_items.extend_from_slice(items);
        Ok(())
    }

    async fn find_order(&mut self, number: &OrderNumber) -> StoreResult<Option<Order>> {
        Ok(self.order_by_number(number))
    }

    async fn lock_order(&mut self, number: &OrderNumber) -> StoreResult<Option<Order>> {
        Ok(self.order_by_number(number))
    }

    async fn lock_order_by_id(&mut self, id: Uuid) -> StoreResult<Option<Order>> {
        Ok(self.work.orders.get(&id).cloned())
    }

    async fn order_items(&mut self, order_id: Uuid) -> StoreResult<Vec<OrderItem>> {
        Ok(self.work.order_items.iter().filter(|i| i.order_id == order_id).cloned().collect())
    }

    async fn save_order(&mut self, order: &Order) -> StoreResult<()> {
        let row = self.work.orders.get_mut(&order.id).ok_or_else(|| StoreError::NotFound(format!("order {}", order.order_number)))?;
        *row = order.clone();
        Ok(())
    }

    async fn list_orders(&mut self, filter: &OrderFilter, page: PageRequest) -> StoreResult<(Vec<Order>, u64)> {
        let needle = filter.search.as_deref().map(str::to_lowercase);
        let number = filter.number_contains.as_deref().map(str::to_lowercase);
        let mut matches: Vec<&Order> = self
            .work
            .orders
            .values()
            .filter(|o| filter.user_id.map_or(true, |user| o.user_id == user))
            .filter(|o| filter.status.map_or(true, |status| o.status() == status))
            .filter(|o| filter.created_from.map_or(true, |from| o.created_at >= from))
            .filter(|o| filter.created_before.map_or(true, |before| o.created_at < before))
            .filter(|o| number.as_deref().map_or(true, |n| o.order_number.as_str().to_lowercase().contains(n)))
            .filter(|o| {
                needle.as_deref().map_or(true, |needle| {
                    [o.order_number.as_str(), o.shipping.email.as_str(), o.shipping.full_name.as_str()]
                        .iter()
                        .any(|field| field.to_lowercase().contains(needle))
                })
            })
            .collect();
        match filter.sort {
            OrderSort::NewestFirst => matches.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id))),
            OrderSort::OldestFirst => matches.sort_by_key(|o| (o.created_at, o.id)),
            OrderSort::TotalAsc => matches.sort_by_key(|o| o.total()),
            OrderSort::TotalDesc => matches.sort_by(|a, b| b.total().cmp(&a.total())),
        }
        let total = matches.len() as u64;
        let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        let orders = matches.into_iter().skip(offset).take(page.per_page as usize).cloned().collect();
        Ok((orders, total))
    }

    async fn find_wallet(&mut self, user_id: Uuid) -> StoreResult<Option<Wallet>> {
        Ok(self.work.wallets.get(&user_id).cloned())
    }

    async fn lock_or_open_wallet(&mut self, user_id: Uuid) -> StoreResult<Wallet> {
        Ok(self.work.wallets.entry(user_id).or_insert_with(|| Wallet::open(user_id)).clone())
    }

    async fn append_wallet_entry(&mut self, wallet: &Wallet, entry: &WalletTransaction) -> StoreResult<()> {
        self.work.wallets.insert(wallet.user_id, wallet.clone());
        self.work.wallet_transactions.push(entry.clone());
        Ok(())
    }

    async fn wallet_transactions(&mut self, wallet_id: Uuid) -> StoreResult<Vec<WalletTransaction>> {
        Ok(self.work.wallet_transactions.iter().filter(|t| t.wallet_id == wallet_id).cloned().collect())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        if self.work.payments.values().any(|p| p.gateway_order_ref == payment.gateway_order_ref) {
            return Err(StoreError::Duplicate(format!("gateway reference {}", payment.gateway_order_ref)));
        }
        self.work.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn lock_payment_by_ref(&mut self, gateway_order_ref: &str) -> StoreResult<Option<Payment>> {
        Ok(self.work.payments.values().find(|p| p.gateway_order_ref == gateway_order_ref).cloned())
    }

    async fn save_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        let row = self.work.payments.get_mut(&payment.id).ok_or_else(|| StoreError::NotFound(format!("payment {}", payment.id)))?;
        *row = payment.clone();
        Ok(())
    }

    async fn payments_for_order(&mut self, order_id: Uuid) -> StoreResult<Vec<Payment>> {
        Ok(self.work.payments.values().filter(|p| p.order_id == order_id).cloned().collect())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }
}
