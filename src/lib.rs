pub mod catalog;
pub mod config;
pub mod controllers;
pub mod coordinator;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod notifications;
pub mod redis_client;
pub mod seat_map;
pub mod services;
pub mod store;
pub mod tickets;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use catalog::{Catalog, MemoryCatalog, PgCatalog};
use config::{Config, StoreBackend};
use coordinator::PurchaseCoordinator;
use database::Database;
use notifications::{NotificationHub, SaleLog, TicketArchive};
use redis_client::RedisClient;
use services::payment::WebhookSigner;
use store::{
    LedgeredStore, MemoryReservationStore, OccupancyLedger, PgOccupancyLedger,
    RedisReservationStore, ReservationStore,
};

// Shared state for every handler
pub struct AppState {
    pub coordinator: Arc<PurchaseCoordinator>,
    pub store: Arc<dyn ReservationStore>,
    pub signer: WebhookSigner,
}

impl AppState {
    pub fn new(
        coordinator: Arc<PurchaseCoordinator>,
        store: Arc<dyn ReservationStore>,
        signer: WebhookSigner,
    ) -> Arc<Self> {
        Arc::new(Self { coordinator, store, signer })
    }

    /// Connects the configured backends and wires the purchase core.
    pub async fn build(config: &Config) -> anyhow::Result<Arc<Self>> {
        let db = match &config.database {
            Some(db_config) => {
                let db = Database::connect(&db_config.url, db_config.pool_size).await?;
                db.run_migrations().await?;
                info!("Database connected");
                Some(db)
            }
            None => None,
        };

        let catalog: Arc<dyn Catalog> = match &db {
            Some(db) => Arc::new(PgCatalog::new(db.clone())),
            None => {
                info!("No DATABASE_URL, serving the demo catalog from memory");
                Arc::new(MemoryCatalog::demo())
            }
        };

        let hold = config.reservation.claim_hold;
        let store: Arc<dyn ReservationStore> = match (config.reservation.backend, &config.redis) {
            (StoreBackend::Redis, Some(redis_config)) => {
                let redis = RedisClient::connect(&redis_config.url).await?;
                info!("Redis connected, seat holds kept in Redis");
                Arc::new(RedisReservationStore::new(redis, hold))
            }
            (StoreBackend::Redis, None) => anyhow::bail!("STORE_BACKEND=redis needs REDIS_URL"),
            (StoreBackend::Memory, _) => {
                let memory = MemoryReservationStore::new(hold);
                if let Some(db) = &db {
                    let sold = PgOccupancyLedger::new(db.clone()).load().await?;
                    info!("Restored {} sold seats from the occupancy ledger", memory.restore(sold));
                }
                Arc::new(memory)
            }
        };

        // With a database, no sale stands until the ledger has it.
        let store: Arc<dyn ReservationStore> = match &db {
            Some(db) => Arc::new(LedgeredStore::new(
                store,
                Arc::new(PgOccupancyLedger::new(db.clone())),
            )),
            None => store,
        };

        let hub = Arc::new(NotificationHub::new());
        if let Some(path) = &config.sale_log_path {
            hub.register(Arc::new(SaleLog::open(path)?));
            info!("Sale log at {}", path.display());
        }
        if let Some(db) = &db {
            hub.register(Arc::new(TicketArchive::new(db.clone())));
        }

        let coordinator = Arc::new(PurchaseCoordinator::new(
            catalog,
            store.clone(),
            hub,
            config.reservation.payment_timeout,
        ));

        Ok(Self::new(
            coordinator,
            store,
            WebhookSigner::new(config.payment.merchant_secret.clone()),
        ))
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Box Office API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        .nest("/api", controllers::routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
