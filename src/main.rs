use actix_web::{web, App, HttpServer};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use payment_gateway::admission::AdmissionGate;
use payment_gateway::arbiter::HealthArbiter;
use payment_gateway::config::{Config, ConfigError, CoordinationBackend, LedgerBackend};
use payment_gateway::coordination::{CoordinationStore, MemoryStore, RedisStore};
use payment_gateway::http::{self, AppState};
use payment_gateway::ledger::{Ledger, LocalLedger, SharedLedger};
use payment_gateway::metrics::Metrics;
use payment_gateway::processor::{HttpProcessorClient, ProcessorClient};
use payment_gateway::settlement::{WorkerContext, WorkerPool};
use payment_gateway::summary::{HttpPeer, PeerSummary, SummaryService};

fn init_tracing() {
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=debug LOG_FORMAT=json payment_gateway
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,payment_gateway=debug"));
    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .with(filter)
            .init();
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env()?;
    tracing::info!(
        replica = %config.replica_id,
        coordination = ?config.coordination,
        ledger = ?config.ledger,
        "🚀 Starting payment gateway"
    );

    // === 1. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!(
        "📊 Metrics registry created with {} metrics",
        metrics.registry().gather().len()
    );

    // === 2. Coordination store and ledger ===
    let (store, redis_conn) = match config.coordination {
        CoordinationBackend::Memory => {
            (Arc::new(MemoryStore::new()) as Arc<dyn CoordinationStore>, None)
        }
        CoordinationBackend::Redis => {
            let store = RedisStore::connect(&config.redis_url).await?;
            let conn = store.connection();
            (Arc::new(store) as Arc<dyn CoordinationStore>, Some(conn))
        }
    };

    let ledger: Arc<dyn Ledger> = match (config.ledger, redis_conn) {
        (LedgerBackend::Local, _) => Arc::new(LocalLedger::new()),
        (LedgerBackend::Shared, Some(conn)) => Arc::new(SharedLedger::new(conn)),
        (LedgerBackend::Shared, None) => return Err(ConfigError::SharedLedgerWithoutRedis.into()),
    };

    // === 3. Processor client and health arbiter ===
    let client: Arc<dyn ProcessorClient> =
        Arc::new(HttpProcessorClient::new(config.processors.clone())?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let arbiter = Arc::new(HealthArbiter::new(
        store.clone(),
        client.clone(),
        config.arbiter.clone(),
        config.replica_id.clone(),
        metrics.clone(),
    ));
    let arbiter_task = arbiter.clone().spawn(shutdown_rx.clone());

    // === 4. Settlement workers ===
    let pool = WorkerPool::spawn(
        WorkerContext {
            store: store.clone(),
            client,
            decisions: arbiter,
            ledger: ledger.clone(),
            metrics: metrics.clone(),
            config: config.settlement.clone(),
        },
        &config.replica_id,
        config.workers,
        shutdown_rx,
    );

    // === 5. Summary merge and admission ===
    let peer: Option<Arc<dyn PeerSummary>> = match &config.peer_url {
        Some(url) => {
            Some(Arc::new(HttpPeer::new(url.clone(), config.peer_timeout)?) as Arc<dyn PeerSummary>)
        }
        None => None,
    };
    let summary = Arc::new(SummaryService::new(ledger.clone(), peer, config.summary_delay));
    let admission = Arc::new(AdmissionGate::new(
        store.clone(),
        config.queue_capacity,
        metrics.clone(),
    ));

    let state = web::Data::new(AppState {
        admission,
        summary,
        store,
        ledger,
        metrics,
    });

    // === 6. HTTP listeners ===
    let public_state = state.clone();
    let public = HttpServer::new(move || {
        App::new()
            .app_data(public_state.clone())
            .configure(http::public_routes)
    })
    .bind(config.listen_addr)?
    .run();

    let internal_state = state.clone();
    let internal = HttpServer::new(move || {
        App::new()
            .app_data(internal_state.clone())
            .configure(http::internal_routes)
    })
    .workers(1)
    .bind(config.internal_listen_addr)?
    .run();

    tracing::info!(
        public = %config.listen_addr,
        internal = %config.internal_listen_addr,
        "📡 Listening"
    );

    // Both servers stop on Ctrl-C.
    tokio::try_join!(public, internal)?;

    // === 7. Graceful shutdown ===
    tracing::info!("Shutting down: finishing in-flight settlements");
    shutdown_tx.send_replace(true);
    pool.join().await;
    if let Err(e) = arbiter_task.await {
        tracing::error!(error = %e, "Health arbiter task panicked");
    }

    tracing::info!("👋 Payment gateway stopped");
    Ok(())
}
