//! Service configuration, read from the environment

use serde::{Deserialize, Serialize};

/// Settings the commerce services need at runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommerceSettings {
    /// Site-wide cap on the quantity of one cart line
    pub cart_max_qty_per_item: u32,
    /// Settlement currency
    pub currency: String,
    /// Label recorded on payment rows
    pub gateway_name: String,
    /// Public key id handed to the client for the gateway checkout
    pub gateway_key_id: String,
}

impl Default for CommerceSettings {
    fn default() -> Self {
        Self {
            cart_max_qty_per_item: 10,
            currency: "INR".to_string(),
            gateway_name: "RAZORPAY".to_string(),
            gateway_key_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub port: u16,
    /// Unset selects the in-memory store
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// Unset selects tracing-only notifications
    pub nats_url: Option<String>,
    pub commerce: CommerceSettings,
    #[serde(skip_serializing)]
    pub gateway_secret: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8083,
            database_url: None,
            db_max_connections: 10,
            nats_url: None,
            commerce: CommerceSettings::default(),
            gateway_secret: None,
        }
    }
}

impl Config {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: parsed("PORT").unwrap_or(defaults.port),
            database_url: non_empty("DATABASE_URL"),
            db_max_connections: parsed("DB_MAX_CONNECTIONS").unwrap_or(defaults.db_max_connections),
            nats_url: non_empty("NATS_URL"),
            commerce: CommerceSettings {
                cart_max_qty_per_item: parsed("CART_MAX_QTY_PER_ITEM")
                    .filter(|q| *q > 0)
                    .unwrap_or(defaults.commerce.cart_max_qty_per_item),
                currency: non_empty("CURRENCY").unwrap_or(defaults.commerce.currency),
                gateway_name: non_empty("PAYMENT_GATEWAY_NAME").unwrap_or(defaults.commerce.gateway_name),
                gateway_key_id: non_empty("PAYMENT_GATEWAY_KEY_ID").unwrap_or_default(),
            },
            gateway_secret: non_empty("PAYMENT_GATEWAY_SECRET"),
        }
    }

    /// Mask the password in the database URL for logging
    pub fn database_url_masked(&self) -> Option<String> {
        self.database_url.as_deref().map(mask_url)
    }
}

fn non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    non_empty(key).and_then(|s| s.parse().ok())
}

fn mask_url(url: &str) -> String {
    let (Some(scheme_end), Some(at_pos)) = (url.find("://"), url.rfind('@')) else {
        return url.to_string();
    };
    let user_pass = &url[scheme_end + 3..at_pos];
    match user_pass.split_once(':') {
        Some((user, _)) => format!("{}{}:***{}", &url[..scheme_end + 3], user, &url[at_pos..]),
        None => url.to_string(),
    }
}
