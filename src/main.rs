//! OpenSASE Commerce - cart, checkout, payment and order lifecycle service

use std::sync::Arc;

use anyhow::Result;
use rand::RngCore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opensase_commerce::config::Config;
use opensase_commerce::http::{router, AppState};
use opensase_commerce::services::{Commerce, NatsNotifier, Notifier, SignedCallbackGateway, TracingNotifier};
use opensase_commerce::store::{MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            tracing::info!(database = config.database_url_masked().unwrap_or_default(), "Connecting to PostgreSQL");
            let store = PgStore::connect(url, config.db_max_connections).await?;
            store.migrate().await?;
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let notifier: Arc<dyn Notifier> = match &config.nats_url {
        Some(url) => match NatsNotifier::connect(url).await {
            Ok(nats) => Arc::new(nats),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, events will only be logged");
                Arc::new(TracingNotifier)
            }
        },
        None => Arc::new(TracingNotifier),
    };

    let secret = match &config.gateway_secret {
        Some(secret) => secret.clone().into_bytes(),
        None => {
            tracing::warn!("PAYMENT_GATEWAY_SECRET not set, using a random secret; gateway callbacks will not verify");
            let mut bytes = vec![0u8; 32];
            rand::thread_rng().fill_bytes(&mut bytes);
            bytes
        }
    };
    let gateway = Arc::new(SignedCallbackGateway::new(secret));

    let commerce = Commerce::new(store, gateway, notifier, config.commerce.clone());
    let app = router(AppState { commerce });

    tracing::info!("🚀 OpenSASE Commerce listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app).await?;
    Ok(())
}
