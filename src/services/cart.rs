//! Cart operations

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::domain::aggregates::{allowed_quantity, CartItem, Product, Variant};
use crate::services::pricing::{PricingEngine, Quote};
use crate::store::{Store, StoreTx};
use crate::{CommerceError, Result};

#[derive(Clone)]
pub struct CartService {
    store: Arc<dyn Store>,
    max_qty_per_item: u32,
}

impl CartService {
    pub fn new(store: Arc<dyn Store>, max_qty_per_item: u32) -> Self {
        Self { store, max_qty_per_item }
    }

    #[tracing::instrument(skip(self))]
    pub async fn add_item(&self, user_id: Uuid, variant_id: Uuid, quantity: u32) -> Result<CartItem> {
        let mut tx = self.store.begin().await?;
        let (variant, _) = Self::sellable(tx.as_mut(), variant_id).await?;
        let mut cart = tx.cart(user_id).await?;
        let allowed = allowed_quantity(self.max_qty_per_item, variant.available());
        let item = cart.add_item(variant_id, quantity, allowed)?.clone();
        tx.save_cart_item(&item).await?;
        tx.commit().await?;
        tracing::debug!(quantity = item.quantity, "Cart line saved");
        Ok(item)
    }

    #[tracing::instrument(skip(self))]
    pub async fn update_quantity(&self, user_id: Uuid, variant_id: Uuid, quantity: u32) -> Result<CartItem> {
        if quantity == 0 {
            return Err(CommerceError::InvalidQuantity(quantity));
        }
        let mut tx = self.store.begin().await?;
        let (variant, _) = Self::sellable(tx.as_mut(), variant_id).await?;
        let mut cart = tx.cart(user_id).await?;
        let allowed = allowed_quantity(self.max_qty_per_item, variant.available());
        let item = cart.update_quantity(variant_id, quantity, allowed)?.clone();
        tx.save_cart_item(&item).await?;
        tx.commit().await?;
        Ok(item)
    }

    pub async fn remove_item(&self, user_id: Uuid, variant_id: Uuid) -> Result<()> {
        let mut tx = self.store.begin().await?;
        if !tx.delete_cart_item(user_id, variant_id).await? {
            return Err(CommerceError::CartItemNotFound);
        }
        tx.commit().await?;
        Ok(())
    }

    /// Live lines priced at today's offers.
    pub async fn view(&self, user_id: Uuid) -> Result<Quote> {
        let mut tx = self.store.begin().await?;
        let lines = tx.cart_lines(user_id).await?;
        Ok(PricingEngine::quote_lines(tx.as_mut(), &lines, Utc::now()).await?)
    }

    async fn sellable(tx: &mut dyn StoreTx, variant_id: Uuid) -> Result<(Variant, Product)> {
        let variant = tx.find_active_variant(variant_id).await?.ok_or(CommerceError::VariantUnavailable)?;
        let product = tx.find_active_product(variant.product_id).await?.ok_or(CommerceError::VariantUnavailable)?;
        Ok((variant, product))
    }
}
