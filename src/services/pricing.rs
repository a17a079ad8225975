//! Offer-aware unit prices
//!
//! A line's unit price is the product price less the best offer that is live
//! right now, taken over the product's own offers and its category's offers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::{Offer, OfferScope, Product};
use crate::domain::value_objects::{Money, Percentage};
use crate::store::{CartLine, StoreResult, StoreTx};

/// A cart line with its price resolved
#[derive(Clone, Debug, Serialize)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub product_name: String,
    pub variant_label: String,
    pub quantity: u32,
    pub list_price: Money,
    pub offer: Option<Percentage>,
    pub unit_price: Money,
    pub line_total: Money,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Quote {
    pub lines: Vec<PricedLine>,
    pub subtotal: Money,
}

pub struct PricingEngine;

impl PricingEngine {
    /// Highest live discount that applies to the product, if any.
    pub fn best_discount(product: &Product, offers: &[Offer], now: DateTime<Utc>) -> Option<Percentage> {
        offers
            .iter()
            .filter(|o| o.is_valid_at(now))
            .filter(|o| match o.scope {
                OfferScope::Product(id) => id == product.id,
                OfferScope::Category(id) => product.category_id == Some(id),
            })
            .map(|o| o.discount)
            .max()
    }

    pub fn unit_price(product: &Product, offers: &[Offer], now: DateTime<Utc>) -> Money {
        match Self::best_discount(product, offers, now) {
            Some(pct) => product.price.discounted_by(pct),
            None => product.price,
        }
    }

    /// Price every line against the offers on record.
    pub async fn quote_lines(tx: &mut dyn StoreTx, lines: &[CartLine], now: DateTime<Utc>) -> StoreResult<Quote> {
        let mut priced = Vec::with_capacity(lines.len());
        for line in lines {
            let offers = tx.offers_for(line.product.id, line.product.category_id).await?;
            let offer = Self::best_discount(&line.product, &offers, now);
            let unit_price = Self::unit_price(&line.product, &offers, now);
            priced.push(PricedLine {
                product_id: line.product.id,
                variant_id: line.variant.id,
                product_name: line.product.name.clone(),
                variant_label: line.variant.label.clone(),
                quantity: line.item.quantity,
                list_price: line.product.price,
                offer,
                unit_price,
                line_total: unit_price.multiply(line.item.quantity),
            });
        }
        let subtotal = priced.iter().map(|l| l.line_total).sum();
        Ok(Quote { lines: priced, subtotal })
    }
}
