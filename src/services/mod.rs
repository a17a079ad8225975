//! Application services
//!
//! Each service owns a handle to the [`Store`] and opens its own
//! transactions; the ledgers (`StockLedger`, `WalletLedger`,
//! `CouponValidator`, `PricingEngine`) instead run inside a transaction the
//! caller already holds.

pub mod cart;
pub mod checkout;
pub mod coupon;
pub mod lifecycle;
pub mod notify;
pub mod payment;
pub mod pricing;
pub mod stock;
pub mod wallet;

use std::sync::Arc;

use crate::config::CommerceSettings;
use crate::store::Store;

pub use cart::CartService;
pub use checkout::{CheckoutService, PendingCheckoutState, PendingCheckoutStore, PlacedOrder};
pub use lifecycle::{OrderDetails, OrderLifecycle, OrderPage};
pub use notify::{NatsNotifier, Notifier, TracingNotifier};
pub use payment::{PaymentCallback, PaymentGateway, PaymentOutcome, PaymentService, SignedCallbackGateway};
pub use wallet::WalletService;

/// Every service wired to the same store, gateway and notifier.
#[derive(Clone)]
pub struct Commerce {
    pub cart: CartService,
    pub checkout: CheckoutService,
    pub orders: OrderLifecycle,
    pub payments: PaymentService,
    pub wallet: WalletService,
}

impl Commerce {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        settings: CommerceSettings,
    ) -> Self {
        let payments = PaymentService::new(store.clone(), gateway, notifier.clone(), settings.clone());
        Self {
            cart: CartService::new(store.clone(), settings.cart_max_qty_per_item),
            checkout: CheckoutService::new(store.clone(), payments.clone(), notifier.clone(), PendingCheckoutStore::new()),
            orders: OrderLifecycle::new(store.clone(), notifier),
            payments,
            wallet: WalletService::new(store),
        }
    }
}
