//! End-to-end flows over the in-memory store

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use opensase_commerce::config::CommerceSettings;
use opensase_commerce::domain::aggregates::{
    Address, Coupon, Offer, OfferScope, OrderStatus, PaymentMethod, PaymentStatus, Product, Variant,
};
use opensase_commerce::domain::value_objects::{Money, Percentage};
use opensase_commerce::services::{
    Commerce, PaymentCallback, PaymentOutcome, SignedCallbackGateway, TracingNotifier,
};
use opensase_commerce::store::MemoryStore;
use opensase_commerce::CommerceError;

const SECRET: &str = "integration-secret";

struct Shop {
    store: Arc<MemoryStore>,
    commerce: Commerce,
}

impl Shop {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let commerce = Commerce::new(
            store.clone(),
            Arc::new(SignedCallbackGateway::new(SECRET)),
            Arc::new(TracingNotifier),
            CommerceSettings::default(),
        );
        Self { store, commerce }
    }

    async fn variant(&self, price: i64, stock: u32) -> Variant {
        let product = Product::create("Ceramic mug", None, Money::from_major(price));
        let variant = Variant::create(product.id, "Blue", stock);
        self.store.insert_product(product).await;
        self.store.insert_variant(variant.clone()).await.unwrap();
        variant
    }

    async fn coupon(&self, code: &str, pct: u8, minimum: i64) -> Coupon {
        let coupon = Coupon::new(code, Percentage::new(pct).unwrap(), Money::from_major(minimum), Utc::now() + Duration::days(7)).unwrap();
        self.store.insert_coupon(coupon.clone()).await.unwrap();
        coupon
    }

    async fn address(&self, user_id: Uuid) -> Uuid {
        let address = Address {
            id: Uuid::new_v4(),
            user_id,
            first_name: "Asha".into(),
            last_name: "Rao".into(),
            phone: "9000000000".into(),
            email: "asha@example.com".into(),
            street_address: "12 Lake Road".into(),
            city: "Pune".into(),
            state: "MH".into(),
            pin_code: "411001".into(),
            country: "IN".into(),
            deleted_at: None,
        };
        let id = address.id;
        self.store.insert_address(address).await;
        id
    }

    async fn stock(&self, variant_id: Uuid) -> u32 {
        self.store.variant(variant_id).await.unwrap().stock
    }
}

fn signed(gateway_order_ref: &str, payment_ref: &str) -> PaymentCallback {
    let signature = SignedCallbackGateway::new(SECRET).sign(gateway_order_ref, payment_ref).unwrap();
    PaymentCallback {
        gateway_order_ref: gateway_order_ref.to_string(),
        gateway_payment_ref: payment_ref.to_string(),
        signature,
    }
}

#[tokio::test]
async fn cod_checkout_with_coupon() {
    let shop = Shop::new();
    let user = Uuid::new_v4();
    let variant = shop.variant(500, 3).await;
    shop.coupon("SAVE10", 10, 100).await;
    let address = shop.address(user).await;

    shop.commerce.cart.add_item(user, variant.id, 1).await.unwrap();
    let applied = shop.commerce.checkout.apply_coupon(user, "save10").await.unwrap();
    assert_eq!(applied.discount, Money::from_major(50));

    let placed = shop.commerce.checkout.place_pending_order(user, address, PaymentMethod::Cod).await.unwrap();
    assert_eq!(placed.order.pricing.subtotal, Money::from_major(500));
    assert_eq!(placed.order.pricing.discount, Money::from_major(50));
    assert_eq!(placed.order.total(), Money::from_major(450));
    assert_eq!(placed.order.status(), OrderStatus::Confirmed);
    assert!(placed.order.is_paid());
    assert_eq!(placed.order.shipping.full_name, "Asha Rao");
    assert!(placed.payment.is_none());

    assert_eq!(shop.stock(variant.id).await, 2);
    assert!(shop.commerce.cart.view(user).await.unwrap().lines.is_empty());
    assert_eq!(shop.store.coupon_usage_count(user).await, 1);
    assert_eq!(shop.commerce.checkout.pending().get(user).coupon_id, None);
}

#[tokio::test]
async fn coupon_applies_after_offer_price() {
    let shop = Shop::new();
    let user = Uuid::new_v4();
    let variant = shop.variant(1000, 5).await;
    let now = Utc::now();
    let offer = Offer::new(
        OfferScope::Product(variant.product_id),
        Percentage::new(20).unwrap(),
        now - Duration::days(1),
        now + Duration::days(1),
    )
    .unwrap();
    shop.store.insert_offer(offer).await.unwrap();
    shop.coupon("TEN", 10, 500).await;
    let address = shop.address(user).await;

    shop.commerce.cart.add_item(user, variant.id, 1).await.unwrap();
    let quote = shop.commerce.cart.view(user).await.unwrap();
    assert_eq!(quote.lines[0].unit_price, Money::from_major(800));

    shop.commerce.checkout.apply_coupon(user, "TEN").await.unwrap();
    let placed = shop.commerce.checkout.place_pending_order(user, address, PaymentMethod::Cod).await.unwrap();
    assert_eq!(placed.order.pricing.subtotal, Money::from_major(800));
    assert_eq!(placed.order.total(), Money::from_major(720));
    assert_eq!(placed.items[0].unit_price, Money::from_major(800));
}

#[tokio::test]
async fn spent_coupon_is_dropped_not_fatal() {
    let shop = Shop::new();
    let user = Uuid::new_v4();
    let variant = shop.variant(200, 5).await;
    shop.coupon("ONCE", 20, 0).await;
    let address = shop.address(user).await;

    shop.commerce.cart.add_item(user, variant.id, 1).await.unwrap();
    shop.commerce.checkout.apply_coupon(user, "ONCE").await.unwrap();
    shop.commerce.checkout.place_pending_order(user, address, PaymentMethod::Cod).await.unwrap();

    shop.commerce.cart.add_item(user, variant.id, 1).await.unwrap();
    let err = shop.commerce.checkout.apply_coupon(user, "ONCE").await.unwrap_err();
    assert!(matches!(err, CommerceError::InvalidCoupon(_)));

    let placed = shop.commerce.checkout.place_pending_order(user, address, PaymentMethod::Cod).await.unwrap();
    assert_eq!(placed.order.pricing.discount, Money::ZERO);
    assert_eq!(placed.order.total(), Money::from_major(200));
    assert_eq!(shop.store.coupon_usage_count(user).await, 1);
}

#[tokio::test]
async fn last_unit_sold_once() {
    let shop = Shop::new();
    let variant = shop.variant(100, 1).await;
    let mut buyers = Vec::new();
    for _ in 0..2 {
        let user = Uuid::new_v4();
        let address = shop.address(user).await;
        shop.commerce.cart.add_item(user, variant.id, 1).await.unwrap();
        buyers.push((user, address));
    }

    let handles: Vec<_> = buyers
        .into_iter()
        .map(|(user, address)| {
            let commerce = shop.commerce.clone();
            tokio::spawn(async move { commerce.checkout.place_pending_order(user, address, PaymentMethod::Cod).await })
        })
        .collect();

    let mut placed = 0;
    let mut refused = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => placed += 1,
            Err(CommerceError::InsufficientStock { available, .. }) => {
                assert_eq!(available, 0);
                refused += 1;
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!((placed, refused), (1, 1));
    let variant = shop.store.variant(variant.id).await.unwrap();
    assert_eq!(variant.stock, 0);
    assert!(!variant.is_listed);
    assert_eq!(shop.store.order_count().await, 1);
}

#[tokio::test]
async fn wallet_checkout_debits_or_leaves_nothing() {
    let shop = Shop::new();
    let user = Uuid::new_v4();
    let variant = shop.variant(300, 5).await;
    let address = shop.address(user).await;
    shop.commerce.cart.add_item(user, variant.id, 1).await.unwrap();

    shop.commerce.wallet.credit(user, Money::from_major(100), "Promotional credit").await.unwrap();
    let err = shop.commerce.checkout.place_pending_order(user, address, PaymentMethod::Wallet).await.unwrap_err();
    assert!(matches!(err, CommerceError::InsufficientFunds { .. }));
    assert_eq!(shop.store.order_count().await, 0);
    assert_eq!(shop.stock(variant.id).await, 5);
    assert_eq!(shop.commerce.wallet.balance(user).await.unwrap(), Money::from_major(100));
    assert_eq!(shop.commerce.cart.view(user).await.unwrap().lines.len(), 1);

    shop.commerce.wallet.credit(user, Money::from_major(250), "Top-up").await.unwrap();
    let placed = shop.commerce.checkout.place_pending_order(user, address, PaymentMethod::Wallet).await.unwrap();
    assert_eq!(placed.order.status(), OrderStatus::Confirmed);
    assert_eq!(shop.commerce.wallet.balance(user).await.unwrap(), Money::from_major(50));
    assert_eq!(shop.stock(variant.id).await, 4);
}

#[tokio::test]
async fn cancel_restocks_and_refunds_once() {
    let shop = Shop::new();
    let user = Uuid::new_v4();
    let variant = shop.variant(120, 4).await;
    let address = shop.address(user).await;
    shop.commerce.cart.add_item(user, variant.id, 2).await.unwrap();
    let placed = shop.commerce.checkout.place_pending_order(user, address, PaymentMethod::Cod).await.unwrap();
    assert_eq!(shop.stock(variant.id).await, 2);

    let number = placed.order.order_number.clone();
    let cancelled = shop.commerce.orders.cancel(user, &number, "Ordered by mistake").await.unwrap();
    assert_eq!(cancelled.status(), OrderStatus::Cancelled);
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("Ordered by mistake"));
    assert_eq!(shop.stock(variant.id).await, 4);
    assert_eq!(shop.commerce.wallet.balance(user).await.unwrap(), Money::from_major(240));

    let err = shop.commerce.orders.cancel(user, &number, "again").await.unwrap_err();
    assert!(matches!(
        err,
        CommerceError::IllegalStatusTransition { from: OrderStatus::Cancelled, to: OrderStatus::Cancelled }
    ));
    assert_eq!(shop.stock(variant.id).await, 4);
    assert_eq!(shop.commerce.wallet.balance(user).await.unwrap(), Money::from_major(240));
}

#[tokio::test]
async fn other_users_cannot_touch_an_order() {
    let shop = Shop::new();
    let user = Uuid::new_v4();
    let variant = shop.variant(80, 2).await;
    let address = shop.address(user).await;
    shop.commerce.cart.add_item(user, variant.id, 1).await.unwrap();
    let placed = shop.commerce.checkout.place_pending_order(user, address, PaymentMethod::Cod).await.unwrap();

    let stranger = Uuid::new_v4();
    let number = &placed.order.order_number;
    assert!(matches!(shop.commerce.orders.details(stranger, number).await, Err(CommerceError::OrderNotFound)));
    assert!(matches!(shop.commerce.orders.cancel(stranger, number, "no").await, Err(CommerceError::OrderNotFound)));

    let other_address = shop.address(stranger).await;
    shop.commerce.cart.add_item(user, variant.id, 1).await.unwrap();
    let err = shop.commerce.checkout.place_pending_order(user, other_address, PaymentMethod::Cod).await.unwrap_err();
    assert!(matches!(err, CommerceError::InvalidAddress));
}

#[tokio::test]
async fn total_never_below_minimum() {
    let shop = Shop::new();
    let user = Uuid::new_v4();
    let variant = shop.variant(1, 5).await;
    shop.coupon("DEEP", 90, 0).await;
    let address = shop.address(user).await;

    shop.commerce.cart.add_item(user, variant.id, 1).await.unwrap();
    shop.commerce.checkout.apply_coupon(user, "DEEP").await.unwrap();
    let placed = shop.commerce.checkout.place_pending_order(user, address, PaymentMethod::Cod).await.unwrap();
    assert_eq!(placed.order.total(), Money::ONE);
}

#[tokio::test]
async fn empty_cart_cannot_check_out() {
    let shop = Shop::new();
    let user = Uuid::new_v4();
    let address = shop.address(user).await;
    let err = shop.commerce.checkout.place_pending_order(user, address, PaymentMethod::Cod).await.unwrap_err();
    assert!(matches!(err, CommerceError::EmptyCart));
}

#[tokio::test]
async fn fulfilment_and_return() {
    let shop = Shop::new();
    let user = Uuid::new_v4();
    let variant = shop.variant(60, 3).await;
    let address = shop.address(user).await;
    shop.commerce.cart.add_item(user, variant.id, 1).await.unwrap();
    let placed = shop.commerce.checkout.place_pending_order(user, address, PaymentMethod::Cod).await.unwrap();
    let number = placed.order.order_number.clone();
    let orders = &shop.commerce.orders;

    for status in [OrderStatus::Shipped, OrderStatus::OutForDelivery, OrderStatus::Delivered] {
        orders.transition(&number, status, None).await.unwrap();
    }
    let err = orders.transition(&number, OrderStatus::Shipped, None).await.unwrap_err();
    assert_eq!(err.to_string(), "Cannot change order status from DELIVERED to SHIPPED");

    let err = orders.request_return(user, &number, "  ").await.unwrap_err();
    assert!(matches!(err, CommerceError::MissingReason));

    orders.request_return(user, &number, "Wrong colour").await.unwrap();
    let err = orders.transition(&number, OrderStatus::Delivered, None).await.unwrap_err();
    assert!(matches!(err, CommerceError::MissingReason));
    let err = orders.transition(&number, OrderStatus::Delivered, Some(" ")).await.unwrap_err();
    assert!(matches!(err, CommerceError::MissingReason));
    let details = orders.details(user, &number).await.unwrap();
    assert_eq!(details.order.status(), OrderStatus::ReturnRequested);
    let rejected = orders.reject_return(&number, "Colour matches the listing").await.unwrap();
    assert_eq!(rejected.status(), OrderStatus::Delivered);
    assert_eq!(rejected.return_rejection_reason.as_deref(), Some("Colour matches the listing"));

    let requested = orders.request_return(user, &number, "Cracked handle").await.unwrap();
    assert_eq!(requested.return_reason.as_deref(), Some("Cracked handle"));
    orders.approve_return(&number).await.unwrap();
    let returned = orders.complete_return(&number).await.unwrap();
    assert_eq!(returned.status(), OrderStatus::Returned);
    assert_eq!(shop.stock(variant.id).await, 3);
    assert!(orders.transition(&number, OrderStatus::Cancelled, None).await.is_err());
}

#[tokio::test]
async fn gateway_payment_confirms_once() {
    let shop = Shop::new();
    let user = Uuid::new_v4();
    let variant = shop.variant(250, 2).await;
    let address = shop.address(user).await;
    shop.commerce.cart.add_item(user, variant.id, 1).await.unwrap();

    let placed = shop.commerce.checkout.place_pending_order(user, address, PaymentMethod::Gateway).await.unwrap();
    assert_eq!(placed.order.status(), OrderStatus::Pending);
    assert_eq!(shop.stock(variant.id).await, 2);
    let handoff = placed.payment.unwrap();
    assert_eq!(handoff.amount_minor, 25_000);
    assert_eq!(handoff.currency, "INR");

    let mut forged = signed(&handoff.gateway_order_ref, "pay_1");
    forged.signature = "00".repeat(32);
    let err = shop.commerce.payments.confirm(&forged).await.unwrap_err();
    assert!(matches!(err, CommerceError::SignatureMismatch));
    let details = shop.commerce.orders.details(user, &placed.order.order_number).await.unwrap();
    assert_eq!(details.order.status(), OrderStatus::Pending);
    assert_eq!(details.payments.len(), 1);
    assert_eq!(details.payments[0].status(), PaymentStatus::Pending);

    let callback = signed(&handoff.gateway_order_ref, "pay_1");
    let outcome = shop.commerce.payments.confirm(&callback).await.unwrap();
    assert!(matches!(&outcome, PaymentOutcome::Confirmed { order } if order.is_paid()));
    assert_eq!(shop.stock(variant.id).await, 1);
    assert!(shop.commerce.cart.view(user).await.unwrap().lines.is_empty());

    let again = shop.commerce.payments.confirm(&callback).await.unwrap();
    assert!(matches!(again, PaymentOutcome::AlreadyConfirmed { .. }));
    assert_eq!(shop.stock(variant.id).await, 1);
}

#[tokio::test]
async fn late_gateway_payment_goes_to_wallet() {
    let shop = Shop::new();
    let user = Uuid::new_v4();
    let variant = shop.variant(90, 2).await;
    let address = shop.address(user).await;
    shop.commerce.cart.add_item(user, variant.id, 1).await.unwrap();
    let placed = shop.commerce.checkout.place_pending_order(user, address, PaymentMethod::Gateway).await.unwrap();
    let handoff = placed.payment.unwrap();

    let cancelled = shop.commerce.orders.cancel(user, &placed.order.order_number, "Changed my mind").await.unwrap();
    assert_eq!(shop.stock(variant.id).await, 2);
    assert_eq!(shop.commerce.wallet.balance(user).await.unwrap(), Money::ZERO);
    assert!(!cancelled.is_paid());

    let outcome = shop.commerce.payments.confirm(&signed(&handoff.gateway_order_ref, "pay_late")).await.unwrap();
    match outcome {
        PaymentOutcome::Refunded { order, amount } => {
            assert_eq!(order.status(), OrderStatus::Cancelled);
            assert_eq!(amount, Money::from_major(90));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(shop.commerce.wallet.balance(user).await.unwrap(), Money::from_major(90));
    assert_eq!(shop.stock(variant.id).await, 2);
}

#[tokio::test]
async fn gateway_payment_after_sellout_goes_to_wallet() {
    let shop = Shop::new();
    let variant = shop.variant(400, 1).await;
    let slow = Uuid::new_v4();
    let slow_address = shop.address(slow).await;
    shop.commerce.cart.add_item(slow, variant.id, 1).await.unwrap();
    let placed = shop.commerce.checkout.place_pending_order(slow, slow_address, PaymentMethod::Gateway).await.unwrap();
    let handoff = placed.payment.unwrap();

    let quick = Uuid::new_v4();
    let quick_address = shop.address(quick).await;
    shop.commerce.cart.add_item(quick, variant.id, 1).await.unwrap();
    shop.commerce.checkout.place_pending_order(quick, quick_address, PaymentMethod::Cod).await.unwrap();
    assert_eq!(shop.stock(variant.id).await, 0);

    let outcome = shop.commerce.payments.confirm(&signed(&handoff.gateway_order_ref, "pay_sold_out")).await.unwrap();
    match outcome {
        PaymentOutcome::Refunded { order, amount } => {
            assert_eq!(order.status(), OrderStatus::Cancelled);
            assert!(order.cancellation_reason.is_some());
            assert_eq!(amount, Money::from_major(400));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(shop.commerce.wallet.balance(slow).await.unwrap(), Money::from_major(400));
    assert_eq!(shop.stock(variant.id).await, 0);

    let details = shop.commerce.orders.details(slow, &placed.order.order_number).await.unwrap();
    assert_eq!(details.order.status(), OrderStatus::Cancelled);
    assert_eq!(details.payments[0].status(), PaymentStatus::Success);
    let statement = shop.commerce.wallet.statement(slow).await.unwrap();
    assert_eq!(statement.transactions.len(), 1);
}

#[tokio::test]
async fn pending_order_paid_from_wallet() {
    let shop = Shop::new();
    let user = Uuid::new_v4();
    let variant = shop.variant(150, 3).await;
    let address = shop.address(user).await;
    shop.commerce.cart.add_item(user, variant.id, 2).await.unwrap();
    let placed = shop.commerce.checkout.place_pending_order(user, address, PaymentMethod::Gateway).await.unwrap();
    let number = placed.order.order_number.clone();

    shop.commerce.wallet.credit(user, Money::from_major(200), "Refund").await.unwrap();
    let err = shop.commerce.payments.pay_with_wallet(user, &number).await.unwrap_err();
    assert!(matches!(err, CommerceError::InsufficientFunds { .. }));
    assert_eq!(shop.stock(variant.id).await, 3);
    assert_eq!(shop.commerce.wallet.balance(user).await.unwrap(), Money::from_major(200));
    assert_eq!(shop.commerce.cart.view(user).await.unwrap().lines.len(), 1);

    let stranger = Uuid::new_v4();
    let err = shop.commerce.payments.pay_with_wallet(stranger, &number).await.unwrap_err();
    assert!(matches!(err, CommerceError::OrderNotFound));

    shop.commerce.wallet.credit(user, Money::from_major(100), "Top-up").await.unwrap();
    let paid = shop.commerce.payments.pay_with_wallet(user, &number).await.unwrap();
    assert_eq!(paid.status(), OrderStatus::Confirmed);
    assert!(paid.is_paid());
    assert_eq!(paid.payment_method, PaymentMethod::Wallet);
    assert_eq!(shop.stock(variant.id).await, 1);
    assert_eq!(shop.commerce.wallet.balance(user).await.unwrap(), Money::ZERO);
    assert!(shop.commerce.cart.view(user).await.unwrap().lines.is_empty());
    let statement = shop.commerce.wallet.statement(user).await.unwrap();
    let last = statement.transactions.last().unwrap();
    assert_eq!(last.description, format!("Payment for order {}", number));

    let err = shop.commerce.payments.pay_with_wallet(user, &number).await.unwrap_err();
    assert!(matches!(err, CommerceError::IllegalStatusTransition { from: OrderStatus::Confirmed, .. }));
    assert_eq!(shop.stock(variant.id).await, 1);
}

#[tokio::test]
async fn order_history_is_per_user_and_paged() {
    let shop = Shop::new();
    let user = Uuid::new_v4();
    let variant = shop.variant(20, 50).await;
    let address = shop.address(user).await;
    let mut numbers = Vec::new();
    for _ in 0..11 {
        shop.commerce.cart.add_item(user, variant.id, 1).await.unwrap();
        let placed = shop.commerce.checkout.place_pending_order(user, address, PaymentMethod::Cod).await.unwrap();
        numbers.push(placed.order.order_number);
    }
    let cancelled = numbers[0].clone();
    shop.commerce.orders.cancel(user, &cancelled, "Duplicate").await.unwrap();

    let orders = &shop.commerce.orders;
    let first = orders.history(user, None, None, None).await.unwrap();
    assert_eq!((first.total, first.data.len(), first.page), (11, 10, 1));
    let second = orders.history(user, None, None, Some(2)).await.unwrap();
    assert_eq!(second.data.len(), 1);
    assert_eq!(second.data[0].order_number, cancelled);

    let only_cancelled = orders.history(user, Some(OrderStatus::Cancelled), None, None).await.unwrap();
    assert_eq!(only_cancelled.total, 1);
    let suffix = &numbers[5].as_str()[numbers[5].as_str().len() - 6..];
    let by_number = orders.history(user, None, Some(&suffix.to_lowercase()), None).await.unwrap();
    assert_eq!(by_number.data[0].order_number, numbers[5]);

    assert_eq!(orders.history(Uuid::new_v4(), None, None, None).await.unwrap().total, 0);
}
