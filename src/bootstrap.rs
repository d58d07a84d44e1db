use std::sync::Arc;
use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::config::Config;
use crate::disburse::reconciler::Reconciler;
use crate::disburse::sweeper::PendingSweeper;
use crate::error::AppResult;
use crate::idgen::{Clock, SystemClock, SystemOrderIdGenerator};
use crate::ledger::repository::LedgerRepository;
use crate::provider::cipher::KeystreamCipher;
use crate::provider::dispatcher::HttpDispatcher;
use crate::provider::registry::ProviderRegistry;
use crate::server::AppState;
use crate::settlement::scheduler::SettlementScheduler;
use crate::webhook::WebhookNotifier;

/// Wire every component, run migrations, and start the background loops.
pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("initializing application components");

    let pool = initialize_database(&config.database_url).await?;

    let ledger = Arc::new(LedgerRepository::new(pool.clone()));
    let cipher = Arc::new(KeystreamCipher);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let dispatcher = Arc::new(HttpDispatcher::new(
        Duration::from_secs(config.provider_timeout_secs),
        cipher.clone(),
    )?);
    let providers = Arc::new(ProviderRegistry::with_defaults());
    info!(providers = ?providers.names(), "provider registry initialized");

    let webhook = Arc::new(WebhookNotifier::new(
        ledger.clone(),
        cipher,
        clock.clone(),
        Duration::from_secs(config.webhook_delay_secs),
        config.webhook_max_attempts,
    )?);

    let reconciler = Arc::new(Reconciler::new(
        ledger.clone(),
        dispatcher,
        providers,
        clock,
        Arc::new(SystemOrderIdGenerator),
        webhook,
    ));

    let sweeper = Arc::new(PendingSweeper::new(
        reconciler.clone(),
        ledger.clone(),
        Duration::from_secs(config.sweep_interval_secs),
        config.sweep_batch_size,
    ));
    sweeper.start();
    info!("pending sweeper started");

    let scheduler = Arc::new(SettlementScheduler::new(
        ledger.clone(),
        config.settlement_hour_utc,
    ));
    scheduler.start();
    info!("settlement scheduler started");

    Ok(AppState { reconciler })
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("connecting to database");

    let pool = PgPoolOptions::new()
        .max_connections(50)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("database initialized");
    Ok(pool)
}
