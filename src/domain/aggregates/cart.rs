//! Cart Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One cart per user; lines are unique per variant.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Cart {
    pub user_id: Uuid,
    items: Vec<CartItem>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub user_id: Uuid,
    pub variant_id: Uuid,
    pub quantity: u32,
    pub added_at: DateTime<Utc>,
}

/// Largest quantity a line may hold: `min(site max, variant stock)`.
pub fn allowed_quantity(site_max: u32, stock: u32) -> u32 { site_max.min(stock) }

impl Cart {
    pub fn with_items(user_id: Uuid, items: Vec<CartItem>) -> Self { Self { user_id, items } }

    pub fn items(&self) -> &[CartItem] { &self.items }

    /// Add units of a variant, merging with an existing line. Both the added
    /// amount and the merged line are clamped to `allowed`.
    pub fn add_item(&mut self, variant_id: Uuid, requested: u32, allowed: u32) -> Result<&CartItem, CartError> {
        if requested == 0 { return Err(CartError::InvalidQuantity(0)); }
        if allowed == 0 { return Err(CartError::OutOfStock); }
        let to_add = requested.min(allowed);
        let idx = match self.items.iter().position(|i| i.variant_id == variant_id) {
            Some(idx) => {
                let line = &mut self.items[idx];
                line.quantity = line.quantity.saturating_add(to_add).min(allowed);
                idx
            }
            None => {
                self.items.push(CartItem { user_id: self.user_id, variant_id, quantity: to_add, added_at: Utc::now() });
                self.items.len() - 1
            }
        };
        Ok(&self.items[idx])
    }

    /// Set a line's quantity, clamped to `[1, allowed]`.
    pub fn update_quantity(&mut self, variant_id: Uuid, quantity: u32, allowed: u32) -> Result<&CartItem, CartError> {
        if quantity == 0 { return Err(CartError::InvalidQuantity(0)); }
        if allowed == 0 { return Err(CartError::OutOfStock); }
        let item = self.items.iter_mut().find(|i| i.variant_id == variant_id).ok_or(CartError::ItemNotFound)?;
        item.quantity = quantity.clamp(1, allowed);
        Ok(item)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum CartError { ItemNotFound, OutOfStock, InvalidQuantity(u32) }
impl std::error::Error for CartError {}
impl std::fmt::Display for CartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ItemNotFound => write!(f, "Item not found"),
            Self::OutOfStock => write!(f, "This variant is out of stock"),
            Self::InvalidQuantity(q) => write!(f, "Invalid quantity {}", q),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cart_operations() {
        let user = Uuid::new_v4();
        let variant = Uuid::new_v4();
        let mut cart = Cart::with_items(user, vec![]);
        cart.add_item(variant, 2, allowed_quantity(10, 5)).unwrap();
        assert_eq!(cart.items().len(), 1);
        cart.add_item(variant, 1, allowed_quantity(10, 5)).unwrap();
        assert_eq!(cart.items()[0].quantity, 3); // Merged
        cart.add_item(variant, 9, allowed_quantity(10, 5)).unwrap();
        assert_eq!(cart.items()[0].quantity, 5);
    }

    #[test]
    fn test_quantity_clamped_to_site_max_and_stock() {
        let variant = Uuid::new_v4();
        let mut cart = Cart::with_items(Uuid::new_v4(), vec![]);
        assert_eq!(cart.add_item(variant, 50, allowed_quantity(10, 40)).unwrap().quantity, 10);
        assert_eq!(cart.update_quantity(variant, 7, allowed_quantity(10, 3)).unwrap().quantity, 3);
        assert_eq!(cart.update_quantity(variant, 0, 3), Err(CartError::InvalidQuantity(0)));
        assert_eq!(cart.add_item(Uuid::new_v4(), 1, 0).unwrap_err(), CartError::OutOfStock);
    }

    #[test]
    fn test_update_unknown_line() {
        let mut cart = Cart::with_items(Uuid::new_v4(), vec![]);
        assert_eq!(cart.update_quantity(Uuid::new_v4(), 1, 10).unwrap_err(), CartError::ItemNotFound);
    }
}
