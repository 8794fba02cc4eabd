use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use marquee_api::{app, AppState};
use marquee_core::{ScreeningDirectory, SeatClaimSource, SeatLockTable};
use marquee_order::{MemoryOrderStore, OrderController, OrderStore};
use marquee_reserve::{LockManager, MemoryLockTable};
use marquee_store::app_config::StorageBackend;
use marquee_store::{
    DbClient, PgDirectory, PgLockTable, PgOrderStore, RedisLockTable, StaticDirectory,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "marquee_api=debug,tower_http=debug,axum::rejection=trace".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = marquee_store::Config::load().context("failed to load config")?;
    tracing::info!("Starting Marquee API on port {}", config.server.port);

    let lock_window = chrono::Duration::seconds(config.reservation.lock_ttl_seconds as i64);
    let order_window = chrono::Duration::seconds(config.reservation.order_window_seconds as i64);

    let (lock_table, order_store, claims, directory): (
        Arc<dyn SeatLockTable>,
        Arc<dyn OrderStore>,
        Arc<dyn SeatClaimSource>,
        Arc<dyn ScreeningDirectory>,
    ) = match config.storage.backend {
        StorageBackend::Memory => {
            let orders = Arc::new(MemoryOrderStore::new());
            let directory = StaticDirectory::new();
            for seed in &config.screenings {
                directory.register(seed.id, seed.layout());
            }
            (
                Arc::new(MemoryLockTable::new()),
                orders.clone(),
                orders,
                Arc::new(directory),
            )
        }
        StorageBackend::Redis => {
            let url = config
                .storage
                .redis_url
                .as_deref()
                .context("storage.redis_url is required for the redis backend")?;
            let table = RedisLockTable::new(url).context("failed to create Redis client")?;
            // Locks are the contended hot path; orders stay in process.
            let orders = Arc::new(MemoryOrderStore::new());
            let directory = StaticDirectory::new();
            for seed in &config.screenings {
                directory.register(seed.id, seed.layout());
            }
            (Arc::new(table), orders.clone(), orders, Arc::new(directory))
        }
        StorageBackend::Postgres => {
            let url = config
                .storage
                .database_url
                .as_deref()
                .context("storage.database_url is required for the postgres backend")?;
            let db = DbClient::new(url)
                .await
                .context("failed to connect to Postgres")?;
            db.migrate().await.context("failed to run migrations")?;

            let directory = PgDirectory::new(db.pool.clone());
            for seed in &config.screenings {
                directory
                    .register(seed.id, &seed.layout())
                    .await
                    .map_err(|e| anyhow::anyhow!(e))
                    .context("failed to seed screening")?;
            }
            let orders = Arc::new(PgOrderStore::new(db.pool.clone()));
            (
                Arc::new(PgLockTable::new(db.pool.clone())),
                orders.clone(),
                orders,
                Arc::new(directory),
            )
        }
    };

    let locks = LockManager::new(lock_table, claims, directory, lock_window);
    let orders = OrderController::new(locks.clone(), order_store, order_window);

    // SSE Broadcast Channel
    let (sse_tx, _) = tokio::sync::broadcast::channel(100);

    let app_state = AppState {
        locks: locks.clone(),
        orders: orders.clone(),
        sse_tx,
    };

    tokio::spawn(marquee_api::sweeper::run(
        locks,
        orders,
        app_state.sse_tx.clone(),
        Duration::from_secs(config.reservation.sweep_interval_seconds),
    ));

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind listener")?;
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
