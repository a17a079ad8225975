//! PostgreSQL store
//!
//! Each [`PgTx`] wraps one database transaction. Locking reads use
//! `SELECT ... FOR UPDATE`; cart lines lock their variants in id order so two
//! checkouts touching the same variants always queue instead of deadlocking.
//! Anything that clears a cart after taking stock locks the cart rows first,
//! which keeps the cart-then-variant order checkout uses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use super::{CartLine, OrderFilter, OrderSort, PageRequest, Store, StoreError, StoreResult, StoreTx};
use crate::domain::aggregates::{
    Address, Cart, CartItem, Coupon, CouponUsage, Offer, OfferScope, Order, OrderItem, Payment, PriceBreakdown,
    Product, ShippingSnapshot, Variant, Wallet, WalletTransaction,
};
use crate::domain::value_objects::{Money, OrderNumber, Percentage};

macro_rules! product_select {
    ($tail:literal) => {
        concat!(
            "SELECT id, name, category_id, price, stock, is_listed, deleted_at, created_at, updated_at FROM products ",
            $tail
        )
    };
}

macro_rules! variant_select {
    ($tail:literal) => {
        concat!(
            "SELECT id, product_id, label, stock, is_listed, deleted_at, created_at, updated_at FROM variants ",
            $tail
        )
    };
}

macro_rules! coupon_select {
    ($tail:literal) => {
        concat!(
            "SELECT id, code, discount_percentage, min_order_amount, expiry_date, is_active, created_at FROM coupons ",
            $tail
        )
    };
}

macro_rules! order_select {
    ($tail:literal) => {
        concat!(
            r#"SELECT id, order_number, user_id,
                   shipping_full_name, shipping_phone, shipping_email, shipping_address_line,
                   shipping_city, shipping_state, shipping_pincode, shipping_country,
                   subtotal, tax_amount, shipping_charge, discount_amount, total_amount,
                   status, is_paid, payment_method, coupon_id, stock_committed,
                   cancellation_reason, return_reason, return_rejection_reason, created_at, updated_at
            FROM orders "#,
            $tail
        )
    };
}

macro_rules! payment_select {
    ($tail:literal) => {
        concat!(
            r#"SELECT id, order_id, gateway, amount, currency, status, gateway_order_ref,
                   gateway_payment_ref, signature, created_at, updated_at
            FROM payments "#,
            $tail
        )
    };
}

macro_rules! cart_line_select {
    ($tail:literal) => {
        concat!(
            r#"SELECT c.user_id, c.variant_id, c.quantity, c.added_at,
                   v.product_id, v.label, v.stock AS variant_stock, v.is_listed AS variant_listed,
                   v.deleted_at AS variant_deleted_at, v.created_at AS variant_created_at,
                   v.updated_at AS variant_updated_at,
                   p.name, p.category_id, p.price, p.stock AS product_stock, p.is_listed AS product_listed,
                   p.deleted_at AS product_deleted_at, p.created_at AS product_created_at,
                   p.updated_at AS product_updated_at
            FROM cart_items c
            JOIN variants v ON v.id = c.variant_id
            JOIN products p ON p.id = v.product_id
            WHERE c.user_id = $1 AND v.deleted_at IS NULL AND p.deleted_at IS NULL
            ORDER BY v.id "#,
            $tail
        )
    };
}

/// PostgreSQL-backed [`Store`]
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(database_url).await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }
}

// =============================================================================
// Order listing
// =============================================================================

fn push_order_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &OrderFilter) {
    query.push(" WHERE TRUE");
    if let Some(user_id) = filter.user_id {
        query.push(" AND user_id = ").push_bind(user_id);
    }
    if let Some(status) = filter.status {
        query.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(number) = filter.number_contains.as_deref().filter(|s| !s.is_empty()) {
        query.push(" AND order_number ILIKE ").push_bind(like_pattern(number));
    }
    if let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) {
        let pattern = like_pattern(search);
        query
            .push(" AND (order_number ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR shipping_email ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR shipping_full_name ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(from) = filter.created_from {
        query.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(before) = filter.created_before {
        query.push(" AND created_at < ").push_bind(before);
    }
}

/// `%needle%` with LIKE metacharacters escaped.
fn like_pattern(needle: &str) -> String {
    format!("%{}%", needle.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_"))
}

// =============================================================================
// Row mapping
// =============================================================================

fn count_from_db(value: i32, what: &str) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{} {}", what, value)))
}

fn count_to_db(value: u32, what: &str) -> StoreResult<i32> {
    i32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{} {} out of range", what, value)))
}

fn percentage_from_db(value: i16) -> StoreResult<Percentage> {
    u8::try_from(value)
        .ok()
        .and_then(|v| Percentage::new(v).ok())
        .ok_or_else(|| StoreError::Corrupt(format!("discount percentage {}", value)))
}

fn duplicate_or(err: sqlx::Error, what: impl FnOnce() -> String) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate(what()),
        _ => StoreError::Database(err),
    }
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    category_id: Option<Uuid>,
    price: Decimal,
    stock: i32,
    is_listed: bool,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;
    fn try_from(r: ProductRow) -> StoreResult<Self> {
        Ok(Product {
            id: r.id,
            name: r.name,
            category_id: r.category_id,
            price: Money::new(r.price),
            stock: count_from_db(r.stock, "product stock")?,
            is_listed: r.is_listed,
            deleted_at: r.deleted_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct VariantRow {
    id: Uuid,
    product_id: Uuid,
    label: String,
    stock: i32,
    is_listed: bool,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<VariantRow> for Variant {
    type Error = StoreError;
    fn try_from(r: VariantRow) -> StoreResult<Self> {
        Ok(Variant {
            id: r.id,
            product_id: r.product_id,
            label: r.label,
            stock: count_from_db(r.stock, "variant stock")?,
            is_listed: r.is_listed,
            deleted_at: r.deleted_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OfferRow {
    id: Uuid,
    product_id: Option<Uuid>,
    category_id: Option<Uuid>,
    discount_percentage: i16,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<OfferRow> for Offer {
    type Error = StoreError;
    fn try_from(r: OfferRow) -> StoreResult<Self> {
        let scope = match (r.product_id, r.category_id) {
            (Some(id), None) => OfferScope::Product(id),
            (None, Some(id)) => OfferScope::Category(id),
            _ => return Err(StoreError::Corrupt(format!("offer {} has no single scope", r.id))),
        };
        Ok(Offer {
            id: r.id,
            scope,
            discount: percentage_from_db(r.discount_percentage)?,
            start_date: r.start_date,
            end_date: r.end_date,
            is_active: r.is_active,
            created_at: r.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CouponRow {
    id: Uuid,
    code: String,
    discount_percentage: i16,
    min_order_amount: Decimal,
    expiry_date: DateTime<Utc>,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<CouponRow> for Coupon {
    type Error = StoreError;
    fn try_from(r: CouponRow) -> StoreResult<Self> {
        Ok(Coupon {
            id: r.id,
            code: r.code,
            discount: percentage_from_db(r.discount_percentage)?,
            min_order_amount: Money::new(r.min_order_amount),
            expiry_date: r.expiry_date,
            is_active: r.is_active,
            created_at: r.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AddressRow {
    id: Uuid,
    user_id: Uuid,
    first_name: String,
    last_name: String,
    phone: String,
    email: String,
    street_address: String,
    city: String,
    state: String,
    pin_code: String,
    country: String,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<AddressRow> for Address {
    fn from(r: AddressRow) -> Self {
        Address {
            id: r.id,
            user_id: r.user_id,
            first_name: r.first_name,
            last_name: r.last_name,
            phone: r.phone,
            email: r.email,
            street_address: r.street_address,
            city: r.city,
            state: r.state,
            pin_code: r.pin_code,
            country: r.country,
            deleted_at: r.deleted_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CartItemRow {
    user_id: Uuid,
    variant_id: Uuid,
    quantity: i32,
    added_at: DateTime<Utc>,
}

impl TryFrom<CartItemRow> for CartItem {
    type Error = StoreError;
    fn try_from(r: CartItemRow) -> StoreResult<Self> {
        Ok(CartItem {
            user_id: r.user_id,
            variant_id: r.variant_id,
            quantity: count_from_db(r.quantity, "cart quantity")?,
            added_at: r.added_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CartLineRow {
    user_id: Uuid,
    variant_id: Uuid,
    quantity: i32,
    added_at: DateTime<Utc>,
    product_id: Uuid,
    label: String,
    variant_stock: i32,
    variant_listed: bool,
    variant_deleted_at: Option<DateTime<Utc>>,
    variant_created_at: DateTime<Utc>,
    variant_updated_at: DateTime<Utc>,
    name: String,
    category_id: Option<Uuid>,
    price: Decimal,
    product_stock: i32,
    product_listed: bool,
    product_deleted_at: Option<DateTime<Utc>>,
    product_created_at: DateTime<Utc>,
    product_updated_at: DateTime<Utc>,
}

impl TryFrom<CartLineRow> for CartLine {
    type Error = StoreError;
    fn try_from(r: CartLineRow) -> StoreResult<Self> {
        Ok(CartLine {
            item: CartItem {
                user_id: r.user_id,
                variant_id: r.variant_id,
                quantity: count_from_db(r.quantity, "cart quantity")?,
                added_at: r.added_at,
            },
            variant: Variant {
                id: r.variant_id,
                product_id: r.product_id,
                label: r.label,
                stock: count_from_db(r.variant_stock, "variant stock")?,
                is_listed: r.variant_listed,
                deleted_at: r.variant_deleted_at,
                created_at: r.variant_created_at,
                updated_at: r.variant_updated_at,
            },
            product: Product {
                id: r.product_id,
                name: r.name,
                category_id: r.category_id,
                price: Money::new(r.price),
                stock: count_from_db(r.product_stock, "product stock")?,
                is_listed: r.product_listed,
                deleted_at: r.product_deleted_at,
                created_at: r.product_created_at,
                updated_at: r.product_updated_at,
            },
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    user_id: Uuid,
    shipping_full_name: String,
    shipping_phone: String,
    shipping_email: String,
    shipping_address_line: String,
    shipping_city: String,
    shipping_state: String,
    shipping_pincode: String,
    shipping_country: String,
    subtotal: Decimal,
    tax_amount: Decimal,
    shipping_charge: Decimal,
    discount_amount: Decimal,
    total_amount: Decimal,
    status: String,
    is_paid: bool,
    payment_method: String,
    coupon_id: Option<Uuid>,
    stock_committed: bool,
    cancellation_reason: Option<String>,
    return_reason: Option<String>,
    return_rejection_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;
    fn try_from(r: OrderRow) -> StoreResult<Self> {
        Ok(Order {
            id: r.id,
            order_number: OrderNumber::parse(r.order_number.as_str())
                .map_err(|_| StoreError::Corrupt(format!("order number {}", r.order_number)))?,
            user_id: r.user_id,
            shipping: ShippingSnapshot {
                full_name: r.shipping_full_name,
                phone: r.shipping_phone,
                email: r.shipping_email,
                address_line: r.shipping_address_line,
                city: r.shipping_city,
                state: r.shipping_state,
                pincode: r.shipping_pincode,
                country: r.shipping_country,
            },
            pricing: PriceBreakdown {
                subtotal: Money::new(r.subtotal),
                tax: Money::new(r.tax_amount),
                shipping: Money::new(r.shipping_charge),
                discount: Money::new(r.discount_amount),
                total: Money::new(r.total_amount),
            },
            status: r.status.parse().map_err(|e| StoreError::Corrupt(format!("{}", e)))?,
            is_paid: r.is_paid,
            payment_method: r.payment_method.parse().map_err(|e| StoreError::Corrupt(format!("{}", e)))?,
            coupon_id: r.coupon_id,
            stock_committed: r.stock_committed,
            cancellation_reason: r.cancellation_reason,
            return_reason: r.return_reason,
            return_rejection_reason: r.return_rejection_reason,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    id: Uuid,
    order_id: Uuid,
    product_id: Uuid,
    variant_id: Uuid,
    product_name: String,
    variant_label: String,
    unit_price: Decimal,
    quantity: i32,
    line_total: Decimal,
    created_at: DateTime<Utc>,
}

impl TryFrom<OrderItemRow> for OrderItem {
    type Error = StoreError;
    fn try_from(r: OrderItemRow) -> StoreResult<Self> {
        Ok(OrderItem {
            id: r.id,
            order_id: r.order_id,
            product_id: r.product_id,
            variant_id: r.variant_id,
            product_name: r.product_name,
            variant_label: r.variant_label,
            unit_price: Money::new(r.unit_price),
            quantity: count_from_db(r.quantity, "order item quantity")?,
            line_total: Money::new(r.line_total),
            created_at: r.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct WalletRow {
    id: Uuid,
    user_id: Uuid,
    balance: Decimal,
    updated_at: DateTime<Utc>,
}

impl From<WalletRow> for Wallet {
    fn from(r: WalletRow) -> Self {
        Wallet::restore(r.id, r.user_id, Money::new(r.balance), r.updated_at)
    }
}

#[derive(sqlx::FromRow)]
struct WalletTransactionRow {
    id: Uuid,
    wallet_id: Uuid,
    transaction_type: String,
    amount: Decimal,
    description: String,
    order_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<WalletTransactionRow> for WalletTransaction {
    type Error = StoreError;
    fn try_from(r: WalletTransactionRow) -> StoreResult<Self> {
        Ok(WalletTransaction {
            id: r.id,
            wallet_id: r.wallet_id,
            kind: r.transaction_type.parse().map_err(|e| StoreError::Corrupt(format!("{}", e)))?,
            amount: Money::new(r.amount),
            description: r.description,
            order_id: r.order_id,
            created_at: r.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    order_id: Uuid,
    gateway: String,
    amount: Decimal,
    currency: String,
    status: String,
    gateway_order_ref: String,
    gateway_payment_ref: Option<String>,
    signature: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;
    fn try_from(r: PaymentRow) -> StoreResult<Self> {
        Ok(Payment {
            id: r.id,
            order_id: r.order_id,
            gateway: r.gateway,
            amount: Money::new(r.amount),
            currency: r.currency,
            status: r.status.parse().map_err(StoreError::Corrupt)?,
            gateway_order_ref: r.gateway_order_ref,
            gateway_payment_ref: r.gateway_payment_ref,
            signature: r.signature,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// =============================================================================
// Transaction
// =============================================================================

#[async_trait]
impl StoreTx for PgTx {
    async fn find_active_product(&mut self, id: Uuid) -> StoreResult<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>(product_select!("WHERE id = $1 AND deleted_at IS NULL"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Product::try_from).transpose()
    }

    async fn find_any_product(&mut self, id: Uuid) -> StoreResult<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>(product_select!("WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Product::try_from).transpose()
    }

    async fn find_active_variant(&mut self, id: Uuid) -> StoreResult<Option<Variant>> {
        let row = sqlx::query_as::<_, VariantRow>(variant_select!("WHERE id = $1 AND deleted_at IS NULL"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Variant::try_from).transpose()
    }

    async fn lock_variant(&mut self, id: Uuid) -> StoreResult<Option<Variant>> {
        let row = sqlx::query_as::<_, VariantRow>(variant_select!("WHERE id = $1 FOR UPDATE"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Variant::try_from).transpose()
    }

    async fn save_variant_stock(&mut self, variant: &Variant) -> StoreResult<()> {
        let result = sqlx::query("UPDATE variants SET stock = $2, is_listed = $3, updated_at = $4 WHERE id = $1")
            .bind(variant.id)
            .bind(count_to_db(variant.stock, "variant stock")?)
            .bind(variant.is_listed)
            .bind(variant.updated_at)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("variant {}", variant.id)));
        }
        Ok(())
    }

    async fn variants_of_product(&mut self, product_id: Uuid) -> StoreResult<Vec<Variant>> {
        let rows = sqlx::query_as::<_, VariantRow>(variant_select!("WHERE product_id = $1 ORDER BY id"))
            .bind(product_id)
            .fetch_all(&mut *self.tx)
            .await?;
        convert_all(rows)
    }

    async fn save_product_stock(&mut self, product: &Product) -> StoreResult<()> {
        let result = sqlx::query("UPDATE products SET stock = $2, is_listed = $3, updated_at = $4 WHERE id = $1")
            .bind(product.id)
            .bind(count_to_db(product.stock, "product stock")?)
            .bind(product.is_listed)
            .bind(product.updated_at)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("product {}", product.id)));
        }
        Ok(())
    }

    async fn offers_for(&mut self, product_id: Uuid, category_id: Option<Uuid>) -> StoreResult<Vec<Offer>> {
        let rows = sqlx::query_as::<_, OfferRow>(
            r#"
            SELECT id, product_id, category_id, discount_percentage, start_date, end_date, is_active, created_at
            FROM offers
            WHERE is_active AND (product_id = $1 OR category_id = $2)
            "#,
        )
        .bind(product_id)
        .bind(category_id)
        .fetch_all(&mut *self.tx)
        .await?;
        convert_all(rows)
    }

    async fn cart(&mut self, user_id: Uuid) -> StoreResult<Cart> {
        let rows = sqlx::query_as::<_, CartItemRow>(
            "SELECT user_id, variant_id, quantity, added_at FROM cart_items WHERE user_id = $1 ORDER BY variant_id",
        )
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(Cart::with_items(user_id, convert_all(rows)?))
    }

    async fn cart_lines(&mut self, user_id: Uuid) -> StoreResult<Vec<CartLine>> {
        let rows = sqlx::query_as::<_, CartLineRow>(cart_line_select!(""))
            .bind(user_id)
            .fetch_all(&mut *self.tx)
            .await?;
        convert_all(rows)
    }

    async fn lock_cart_lines(&mut self, user_id: Uuid) -> StoreResult<Vec<CartLine>> {
        let rows = sqlx::query_as::<_, CartLineRow>(cart_line_select!("FOR UPDATE OF c, v"))
            .bind(user_id)
            .fetch_all(&mut *self.tx)
            .await?;
        convert_all(rows)
    }

    async fn lock_cart_items(&mut self, user_id: Uuid) -> StoreResult<Vec<CartItem>> {
        let rows = sqlx::query_as::<_, CartItemRow>(
            "SELECT user_id, variant_id, quantity, added_at FROM cart_items WHERE user_id = $1 ORDER BY variant_id FOR UPDATE",
        )
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await?;
        convert_all(rows)
    }

    async fn save_cart_item(&mut self, item: &CartItem) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cart_items (user_id, variant_id, quantity, added_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, variant_id) DO UPDATE SET quantity = EXCLUDED.quantity
            "#,
        )
        .bind(item.user_id)
        .bind(item.variant_id)
        .bind(count_to_db(item.quantity, "cart quantity")?)
        .bind(item.added_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_cart_item(&mut self, user_id: Uuid, variant_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND variant_id = $2")
            .bind(user_id)
            .bind(variant_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_cart(&mut self, user_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn find_address(&mut self, id: Uuid) -> StoreResult<Option<Address>> {
        let row = sqlx::query_as::<_, AddressRow>(
            r#"
            SELECT id, user_id, first_name, last_name, phone, email, street_address,
                   city, state, pin_code, country, deleted_at
            FROM addresses
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(Address::from))
    }

    async fn find_coupon(&mut self, id: Uuid) -> StoreResult<Option<Coupon>> {
        let row = sqlx::query_as::<_, CouponRow>(coupon_select!("WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Coupon::try_from).transpose()
    }

    async fn find_coupon_by_code(&mut self, code: &str) -> StoreResult<Option<Coupon>> {
        let row = sqlx::query_as::<_, CouponRow>(coupon_select!("WHERE code = $1"))
            .bind(code)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Coupon::try_from).transpose()
    }

    async fn coupon_used(&mut self, user_id: Uuid, coupon_id: Uuid) -> StoreResult<bool> {
        let used: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM coupon_usages WHERE user_id = $1 AND coupon_id = $2)")
                .bind(user_id)
                .bind(coupon_id)
                .fetch_one(&mut *self.tx)
                .await?;
        Ok(used)
    }

    async fn claim_coupon(&mut self, usage: &CouponUsage) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO coupon_usages (user_id, coupon_id, order_id, used_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, coupon_id) DO NOTHING
            "#,
        )
        .bind(usage.user_id)
        .bind(usage.coupon_id)
        .bind(usage.order_id)
        .bind(usage.used_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn order_number_taken(&mut self, number: &OrderNumber) -> StoreResult<bool> {
        let taken: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM orders WHERE order_number = $1)")
            .bind(number.as_str())
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(taken)
    }

    async fn insert_order(&mut self, order: &Order, items: &[OrderItem]) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, order_number, user_id,
                shipping_full_name, shipping_phone, shipping_email, shipping_address_line,
                shipping_city, shipping_state, shipping_pincode, shipping_country,
                subtotal, tax_amount, shipping_charge, discount_amount, total_amount,
                status, is_paid, payment_method, coupon_id, stock_committed,
                cancellation_reason, return_reason, return_rejection_reason, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22, $23, $24, $25, $26)
            "#,
        )
        .bind(order.id)
        .bind(order.order_number.as_str())
        .bind(order.user_id)
        .bind(&order.shipping.full_name)
        .bind(&order.shipping.phone)
        .bind(&order.shipping.email)
        .bind(&order.shipping.address_line)
        .bind(&order.shipping.city)
        .bind(&order.shipping.state)
        .bind(&order.shipping.pincode)
        .bind(&order.shipping.country)
        .bind(order.pricing.subtotal.amount())
        .bind(order.pricing.tax.amount())
        .bind(order.pricing.shipping.amount())
        .bind(order.pricing.discount.amount())
        .bind(order.pricing.total.amount())
        .bind(order.status().as_str())
        .bind(order.is_paid())
        .bind(order.payment_method.as_str())
        .bind(order.coupon_id)
        .bind(order.stock_committed())
        .bind(&order.cancellation_reason)
        .bind(&order.return_reason)
        .bind(&order.return_rejection_reason)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| duplicate_or(e, || format!("order number {}", order.order_number)))?;

        for item in items {
            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, product_id, variant_id, product_name, variant_label,
                                         unit_price, quantity, line_total, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(item.id)
            .bind(item.order_id)
            .bind(item.product_id)
            .bind(item.variant_id)
            .bind(&item.product_name)
            .bind(&item.variant_label)
            .bind(item.unit_price.amount())
            .bind(count_to_db(item.quantity, "order item quantity")?)
            .bind(item.line_total.amount())
            .bind(item.created_at)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn find_order(&mut self, number: &OrderNumber) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(order_select!("WHERE order_number = $1"))
            .bind(number.as_str())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Order::try_from).transpose()
    }

    async fn lock_order(&mut self, number: &OrderNumber) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(order_select!("WHERE order_number = $1 FOR UPDATE"))
            .bind(number.as_str())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Order::try_from).transpose()
    }

    async fn lock_order_by_id(&mut self, id: Uuid) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(order_select!("WHERE id = $1 FOR UPDATE"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Order::try_from).transpose()
    }

    async fn order_items(&mut self, order_id: Uuid) -> StoreResult<Vec<OrderItem>> {
        let rows = sqlx::query_as::<_, OrderItemRow>(
            r#"
            SELECT id, order_id, product_id, variant_id, product_name, variant_label,
                   unit_price, quantity, line_total, created_at
            FROM order_items
            WHERE order_id = $1
            ORDER BY variant_id
            "#,
        )
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await?;
        convert_all(rows)
    }

    async fn save_order(&mut self, order: &Order) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, is_paid = $3, stock_committed = $4, cancellation_reason = $5,
                return_reason = $6, return_rejection_reason = $7, payment_method = $8, updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(order.id)
        .bind(order.status().as_str())
        .bind(order.is_paid())
        .bind(order.stock_committed())
        .bind(&order.cancellation_reason)
        .bind(&order.return_reason)
        .bind(&order.return_rejection_reason)
        .bind(order.payment_method.as_str())
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("order {}", order.order_number)));
        }
        Ok(())
    }

    async fn list_orders(&mut self, filter: &OrderFilter, page: PageRequest) -> StoreResult<(Vec<Order>, u64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM orders");
        push_order_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&mut *self.tx).await?;

        let mut select = QueryBuilder::<Postgres>::new(order_select!(""));
        push_order_filter(&mut select, filter);
        select.push(match filter.sort {
            OrderSort::NewestFirst => " ORDER BY created_at DESC, id DESC",
            OrderSort::OldestFirst => " ORDER BY created_at ASC, id ASC",
            OrderSort::TotalAsc => " ORDER BY total_amount ASC, created_at DESC",
            OrderSort::TotalDesc => " ORDER BY total_amount DESC, created_at DESC",
        });
        select.push(" LIMIT ").push_bind(i64::from(page.per_page));
        select.push(" OFFSET ").push_bind(i64::try_from(page.offset()).unwrap_or(i64::MAX));
        let rows = select.build_query_as::<OrderRow>().fetch_all(&mut *self.tx).await?;

        let total = u64::try_from(total).map_err(|_| StoreError::Corrupt(format!("order count {}", total)))?;
        Ok((convert_all(rows)?, total))
    }

    async fn find_wallet(&mut self, user_id: Uuid) -> StoreResult<Option<Wallet>> {
        let row = sqlx::query_as::<_, WalletRow>("SELECT id, user_id, balance, updated_at FROM wallets WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(Wallet::from))
    }

    async fn lock_or_open_wallet(&mut self, user_id: Uuid) -> StoreResult<Wallet> {
        sqlx::query(
            r#"
            INSERT INTO wallets (id, user_id, balance, updated_at)
            VALUES ($1, $2, 0, NOW())
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(user_id)
        .execute(&mut *self.tx)
        .await?;

        let row = sqlx::query_as::<_, WalletRow>(
            "SELECT id, user_id, balance, updated_at FROM wallets WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.into())
    }

    async fn append_wallet_entry(&mut self, wallet: &Wallet, entry: &WalletTransaction) -> StoreResult<()> {
        let result = sqlx::query("UPDATE wallets SET balance = $2, updated_at = $3 WHERE id = $1")
            .bind(wallet.id)
            .bind(wallet.balance().amount())
            .bind(wallet.updated_at)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("wallet {}", wallet.id)));
        }

        sqlx::query(
            r#"
            INSERT INTO wallet_transactions (id, wallet_id, transaction_type, amount, description, order_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id)
        .bind(entry.wallet_id)
        .bind(entry.kind.as_str())
        .bind(entry.amount.amount())
        .bind(&entry.description)
        .bind(entry.order_id)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn wallet_transactions(&mut self, wallet_id: Uuid) -> StoreResult<Vec<WalletTransaction>> {
        let rows = sqlx::query_as::<_, WalletTransactionRow>(
            r#"
            SELECT id, wallet_id, transaction_type, amount, description, order_id, created_at
            FROM wallet_transactions
            WHERE wallet_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(wallet_id)
        .fetch_all(&mut *self.tx)
        .await?;
        convert_all(rows)
    }

    async fn insert_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, gateway, amount, currency, status, gateway_order_ref,
                                  gateway_payment_ref, signature, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(payment.id)
        .bind(payment.order_id)
        .bind(&payment.gateway)
        .bind(payment.amount.amount())
        .bind(&payment.currency)
        .bind(payment.status().as_str())
        .bind(&payment.gateway_order_ref)
        .bind(&payment.gateway_payment_ref)
        .bind(&payment.signature)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| duplicate_or(e, || format!("gateway reference {}", payment.gateway_order_ref)))?;
        Ok(())
    }

    async fn lock_payment_by_ref(&mut self, gateway_order_ref: &str) -> StoreResult<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(payment_select!("WHERE gateway_order_ref = $1 FOR UPDATE"))
            .bind(gateway_order_ref)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Payment::try_from).transpose()
    }

    async fn save_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = $2, gateway_payment_ref = $3, signature = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(payment.id)
        .bind(payment.status().as_str())
        .bind(&payment.gateway_payment_ref)
        .bind(&payment.signature)
        .bind(payment.updated_at)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("payment {}", payment.id)));
        }
        Ok(())
    }

    async fn payments_for_order(&mut self, order_id: Uuid) -> StoreResult<Vec<Payment>> {
        let rows = sqlx::query_as::<_, PaymentRow>(payment_select!("WHERE order_id = $1 ORDER BY created_at"))
            .bind(order_id)
            .fetch_all(&mut *self.tx)
            .await?;
        convert_all(rows)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let PgTx { tx } = *self;
        tx.commit().await?;
        Ok(())
    }
}
