//! Aggregates module
pub mod address;
pub mod cart;
pub mod order;
pub mod payment;
pub mod product;
pub mod promotion;
pub mod wallet;

pub use address::Address;
pub use cart::{allowed_quantity, Cart, CartError, CartItem};
pub use order::{Order, OrderError, OrderItem, OrderStatus, PaymentMethod, PriceBreakdown, ShippingSnapshot, MINIMUM_PAYABLE};
pub use payment::{Payment, PaymentStatus};
pub use product::{Product, ProductError, Variant};
pub use promotion::{Coupon, CouponUsage, Offer, OfferScope, PromotionError};
pub use wallet::{ledger_balance, TransactionKind, Wallet, WalletError, WalletTransaction};
