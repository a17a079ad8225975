//! Shipping address, owned by the address book and read at checkout

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Address {
    pub id: Uuid,
    pub user_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub email: String,
    pub street_address: String,
    pub city: String,
    pub state: String,
    pub pin_code: String,
    pub country: String,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Address {
    /// A deleted address or another user's address cannot be shipped to.
    pub fn is_usable_by(&self, user_id: Uuid) -> bool { self.user_id == user_id && self.deleted_at.is_none() }
}
