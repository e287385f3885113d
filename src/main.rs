//! Disbursement Settlement Engine
//!
//! ```text
//! ┌──────────┐    ┌──────────────┐    ┌─────────────┐    ┌──────────┐
//! │ Gateway  │───▶│ Coordinator  │───▶│ VendorRouter│───▶│ Adapters │
//! │  (HTTP)  │    │ (lock + CAS) │    │             │    │ (rails)  │
//! └──────────┘    └──────────────┘    └─────────────┘    └──────────┘
//!      │                 ▲
//!      │ callbacks       │ due retries / stale sweeps
//!      ▼                 │
//! ┌──────────┐    ┌──────────────┐
//! │Reconciler│    │ RetryWorker  │
//! └──────────┘    └──────────────┘
//! ```

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use disbursement_engine::config::AppConfig;
use disbursement_engine::db::Database;
use disbursement_engine::disbursement::coordinator::CallSettings;
use disbursement_engine::disbursement::notifier;
use disbursement_engine::disbursement::store::{DisbursementStore, MemoryStore, PgStore};
use disbursement_engine::disbursement::{RetryPolicy, RetryWorker, SettlementCoordinator, WorkerConfig};
use disbursement_engine::gateway::{self, state::AppState};
use disbursement_engine::logging::init_logging;
use disbursement_engine::router::VendorRouter;
use disbursement_engine::validation::{NameMatcher, ValidationService};
use disbursement_engine::vendor::VendorRegistry;

#[derive(Parser, Debug)]
#[command(name = "disbursement_engine", about = "Disbursement settlement engine")]
struct Args {
    /// Config environment: loads config/{env}.yaml
    #[arg(long, default_value = "dev")]
    env: String,

    /// Override gateway.port
    #[arg(long)]
    port: Option<u16>,

    /// Serve the API without the background retry worker
    #[arg(long)]
    no_worker: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(&args.env)
        .with_context(|| format!("loading config for env {}", args.env))?;
    if let Some(port) = args.port {
        config.gateway.port = port;
    }
    let _log_guard = init_logging(&config);

    tracing::info!(env = %args.env, "Starting disbursement engine");

    // Storage
    let (store, db): (Arc<dyn DisbursementStore>, Option<Database>) = match &config.postgres_url {
        Some(url) => {
            let db = Database::connect(url)
                .await
                .context("connecting to PostgreSQL")?;
            tracing::info!("PostgreSQL store ready");
            (Arc::new(PgStore::new(db.pool().clone())), Some(db))
        }
        None => {
            tracing::warn!("postgres_url not set, using in-memory store (state is lost on exit)");
            (Arc::new(MemoryStore::new()), None)
        }
    };

    // Vendors
    let registry = VendorRegistry::from_config(&config.vendors).context("building vendor adapters")?;
    let vendors = registry.vendors();
    if vendors.is_empty() {
        anyhow::bail!("no vendors configured");
    }
    tracing::info!(vendors = ?vendors, "Vendor adapters registered");
    let router = Arc::new(VendorRouter::new(config.routing.clone(), Arc::new(registry)));

    // Engine
    let validation = Arc::new(ValidationService::new(
        store.clone(),
        router.clone(),
        NameMatcher::from_config(&config.validation),
    ));
    let ledger = notifier::from_config(&config.ledger).context("building ledger notifier")?;
    let coordinator = Arc::new(SettlementCoordinator::new(
        store,
        router,
        validation,
        Arc::from(ledger),
        RetryPolicy::from_config(&config.settlement),
        CallSettings::from_config(&config.settlement),
    ));

    if config.worker.enabled && !args.no_worker {
        let worker = RetryWorker::new(coordinator.clone(), WorkerConfig::from_settings(&config.worker));
        tokio::spawn(async move {
            worker.run().await;
        });
    } else {
        tracing::warn!("Retry worker disabled: failed retries and stale PENDING are not swept");
    }

    let state = Arc::new(AppState::new(coordinator, db));
    gateway::run_server(&config.gateway, state)
        .await
        .context("gateway server")?;
    Ok(())
}
