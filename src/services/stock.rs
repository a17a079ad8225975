//! Stock ledger
//!
//! Every function runs inside the caller's transaction and works on locked
//! variant rows. A product's cached stock is refreshed after each variant
//! change.

use uuid::Uuid;

use crate::domain::aggregates::{Product, ProductError, Variant};
use crate::store::{StoreError, StoreTx};
use crate::{CommerceError, Result};

/// Proof that `quantity` units of a variant were available under lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reservation {
    pub variant_id: Uuid,
    pub product_id: Uuid,
    pub quantity: u32,
}

pub struct StockLedger;

impl StockLedger {
    /// Lock the variant and check that `quantity` units can be taken.
    pub async fn reserve(tx: &mut dyn StoreTx, variant_id: Uuid, quantity: u32) -> Result<Reservation> {
        let variant = tx.lock_variant(variant_id).await?.ok_or(CommerceError::VariantUnavailable)?;
        let available = variant.available();
        if quantity > available {
            return Err(CommerceError::InsufficientStock { variant_id, requested: quantity, available });
        }
        Ok(Reservation { variant_id, product_id: variant.product_id, quantity })
    }

    /// Reserve every line of an order. Variants are locked in id order.
    pub async fn reserve_order(tx: &mut dyn StoreTx, order_id: Uuid) -> Result<Vec<Reservation>> {
        let mut items = tx.order_items(order_id).await?;
        items.sort_by_key(|i| i.variant_id);
        let mut reservations = Vec::with_capacity(items.len());
        for item in &items {
            reservations.push(Self::reserve(tx, item.variant_id, item.quantity).await?);
        }
        Ok(reservations)
    }

    pub async fn commit_all(tx: &mut dyn StoreTx, reservations: &[Reservation]) -> Result<()> {
        for reservation in reservations {
            Self::commit(tx, reservation).await?;
        }
        Ok(())
    }

    /// Take the reserved units.
    pub async fn commit(tx: &mut dyn StoreTx, reservation: &Reservation) -> Result<Variant> {
        let mut variant = Self::locked(tx, reservation.variant_id).await?;
        variant.remove_stock(reservation.quantity).map_err(|e| match e {
            ProductError::InsufficientInventory { requested, available } => {
                CommerceError::InsufficientStock { variant_id: reservation.variant_id, requested, available }
            }
        })?;
        tx.save_variant_stock(&variant).await?;
        Self::recompute_product(tx, variant.product_id).await?;
        tracing::debug!(variant_id = %variant.id, quantity = reservation.quantity, stock = variant.stock, "Stock committed");
        Ok(variant)
    }

    /// Put units back, e.g. on cancellation or a completed return.
    pub async fn release(tx: &mut dyn StoreTx, variant_id: Uuid, quantity: u32) -> Result<Variant> {
        let mut variant = Self::locked(tx, variant_id).await?;
        variant.add_stock(quantity);
        tx.save_variant_stock(&variant).await?;
        Self::recompute_product(tx, variant.product_id).await?;
        tracing::debug!(variant_id = %variant.id, quantity, stock = variant.stock, "Stock released");
        Ok(variant)
    }

    pub async fn recompute_product(tx: &mut dyn StoreTx, product_id: Uuid) -> Result<Product> {
        let mut product = tx
            .find_any_product(product_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("product {}", product_id)))?;
        let variants = tx.variants_of_product(product_id).await?;
        product.recompute_from(&variants);
        tx.save_product_stock(&product).await?;
        Ok(product)
    }

    async fn locked(tx: &mut dyn StoreTx, variant_id: Uuid) -> Result<Variant> {
        Ok(tx
            .lock_variant(variant_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("variant {}", variant_id)))?)
    }
}
