//! PostgreSQL store checks
//!
//! These need a scratch database: each test returns early unless
//! `DATABASE_URL` is set.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use opensase_commerce::domain::aggregates::{
    ledger_balance, CartItem, Order, OrderStatus, PaymentMethod, PriceBreakdown, ShippingSnapshot,
};
use opensase_commerce::domain::value_objects::{Money, OrderNumber};
use opensase_commerce::services::stock::StockLedger;
use opensase_commerce::services::wallet::WalletLedger;
use opensase_commerce::services::WalletService;
use opensase_commerce::store::{OrderFilter, OrderSort, PageRequest, PgStore, Store, StoreTx};
use opensase_commerce::CommerceError;

async fn store() -> Option<PgStore> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let store = PgStore::connect(&url, 4).await.unwrap();
    store.migrate().await.unwrap();
    Some(store)
}

async fn seed_variant(store: &PgStore, stock: i32) -> Uuid {
    let product_id = Uuid::new_v4();
    let variant_id = Uuid::new_v4();
    sqlx::query("INSERT INTO products (id, name, price, stock, is_listed) VALUES ($1, 'Stoneware jug', $2, $3, $4)")
        .bind(product_id)
        .bind(Decimal::new(64900, 2))
        .bind(stock)
        .bind(stock > 0)
        .execute(store.pool())
        .await
        .unwrap();
    sqlx::query("INSERT INTO variants (id, product_id, label, stock, is_listed) VALUES ($1, $2, 'Sand', $3, $4)")
        .bind(variant_id)
        .bind(product_id)
        .bind(stock)
        .bind(stock > 0)
        .execute(store.pool())
        .await
        .unwrap();
    variant_id
}

#[tokio::test]
async fn wallet_balance_follows_ledger() {
    let Some(store) = store().await else { return };
    let store = Arc::new(store);
    let user = Uuid::new_v4();

    let mut tx = store.begin().await.unwrap();
    WalletLedger::credit(tx.as_mut(), user, Money::from_major(500), "Refund for cancelled order", None).await.unwrap();
    WalletLedger::debit(tx.as_mut(), user, Money::from_minor(12050), "Payment for order", None).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let err = WalletLedger::debit(tx.as_mut(), user, Money::from_major(1000), "Too much", None).await.unwrap_err();
    assert!(matches!(err, CommerceError::InsufficientFunds { .. }));
    drop(tx);

    let statement = WalletService::new(store.clone()).statement(user).await.unwrap();
    assert_eq!(statement.balance, Money::from_minor(37950));
    assert_eq!(statement.transactions.len(), 2);
    assert_eq!(ledger_balance(&statement.transactions), statement.balance);
}

#[tokio::test]
async fn stock_is_taken_under_lock() {
    let Some(store) = store().await else { return };
    let variant_id = seed_variant(&store, 2).await;
    let user = Uuid::new_v4();

    let mut tx = store.begin().await.unwrap();
    tx.save_cart_item(&CartItem { user_id: user, variant_id, quantity: 2, added_at: Utc::now() }).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let locked = tx.lock_cart_items(user).await.unwrap();
    assert_eq!(locked.len(), 1);
    assert_eq!((locked[0].variant_id, locked[0].quantity), (variant_id, 2));
    let err = StockLedger::reserve(tx.as_mut(), variant_id, 3).await.unwrap_err();
    assert!(matches!(err, CommerceError::InsufficientStock { requested: 3, available: 2, .. }));
    let reservation = StockLedger::reserve(tx.as_mut(), variant_id, 2).await.unwrap();
    let variant = StockLedger::commit(tx.as_mut(), &reservation).await.unwrap();
    assert_eq!(variant.stock, 0);
    assert!(!variant.is_listed);
    assert_eq!(tx.clear_cart(user).await.unwrap(), 1);
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    assert!(tx.find_active_variant(variant_id).await.unwrap().is_some_and(|v| v.stock == 0));
    assert!(tx.lock_cart_items(user).await.unwrap().is_empty());
}

#[tokio::test]
async fn order_listing_filters_and_pages() {
    let Some(store) = store().await else { return };
    let user = Uuid::new_v4();
    let email = format!("{}@example.com", user.simple());

    let mut tx = store.begin().await.unwrap();
    for total in 1..=12 {
        let shipping = ShippingSnapshot { full_name: "Lena Ortiz".into(), email: email.clone(), ..Default::default() };
        let pricing = PriceBreakdown { total: Money::from_major(total), ..Default::default() };
        let order = Order::place(OrderNumber::generate(Utc::now()), user, shipping, pricing, PaymentMethod::Cod, None);
        tx.insert_order(&order, &[]).await.unwrap();
    }
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let mine = OrderFilter { user_id: Some(user), sort: OrderSort::TotalDesc, ..Default::default() };
    let (first, total) = tx.list_orders(&mine, PageRequest::new(None)).await.unwrap();
    assert_eq!((first.len(), total), (10, 12));
    assert_eq!(first[0].total(), Money::from_major(12));
    let (second, _) = tx.list_orders(&mine, PageRequest::new(Some(2))).await.unwrap();
    assert_eq!(second.iter().map(|o| o.total()).collect::<Vec<_>>(), vec![Money::from_major(2), Money::ONE]);

    let by_email = OrderFilter { search: Some(email.to_uppercase()), ..Default::default() };
    assert_eq!(tx.list_orders(&by_email, PageRequest::new(None)).await.unwrap().1, 12);
    let delivered = OrderFilter { user_id: Some(user), status: Some(OrderStatus::Delivered), ..Default::default() };
    assert_eq!(tx.list_orders(&delivered, PageRequest::new(None)).await.unwrap().1, 0);
}
