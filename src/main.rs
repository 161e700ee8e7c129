use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

use comp_ledger::{
    account::period_key,
    api::{self, middleware, ApiState, AuthService},
    AccountDirectory, AwardBook, CompConfig, Coordinator, DatabasePool, LedgerStore,
    PayoutService, RateLimiter, RewardProcessor,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Arc::new(CompConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        eprintln!("Please check COMP_* environment variables.");
        e
    })?);

    init_logging(&config)?;

    info!("Starting Comp Ledger server");
    info!(
        "Policy: base_rate={}, milestones={}, lock_timeout={}ms",
        config.rewards.base_rate,
        config.rewards.milestones.len(),
        config.concurrency.lock_timeout_ms
    );

    // Optional durable journal; the in-memory ledger is authoritative either way.
    let store = if config.database.postgres_enabled {
        let pool = DatabasePool::new(&config.database.postgres_url)
            .await
            .map_err(|e| anyhow::anyhow!("Database initialization failed: {}", e))?;
        pool.init_schema()
            .await
            .map_err(|e| anyhow::anyhow!("Schema initialization failed: {}", e))?;
        Arc::new(LedgerStore::with_journal(pool.ledger()))
    } else {
        warn!("PostgreSQL disabled - settled entries will not be journaled");
        Arc::new(LedgerStore::new())
    };

    // Core components
    let accounts = Arc::new(AccountDirectory::new());
    let awards = Arc::new(AwardBook::new());
    let coordinator = Arc::new(Coordinator::new(config.lock_timeout()));
    let limiter = Arc::new(RateLimiter::new(config.rate_limit_config()));
    let policy = config.reward_policy();

    let processor = Arc::new(RewardProcessor::new(
        accounts.clone(),
        store.clone(),
        awards.clone(),
        coordinator.clone(),
        policy.clone(),
    ));
    let payout = Arc::new(PayoutService::new(
        accounts.clone(),
        store.clone(),
        awards.clone(),
        coordinator.clone(),
        policy,
    ));
    let auth = Arc::new(AuthService::new(accounts.clone()));

    let state = ApiState {
        accounts: accounts.clone(),
        store: store.clone(),
        awards,
        processor,
        payout: payout.clone(),
        limiter: limiter.clone(),
        auth,
    };

    spawn_maintenance(accounts, limiter, payout, store);

    let mut app = api::create_router(state).layer(TraceLayer::new_for_http());
    if config.logging.log_requests {
        app = app.layer(axum::middleware::from_fn(middleware::log_requests));
    }

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", bind_addr, e))?;

    info!("Comp Ledger server listening on {}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn init_logging(config: &CompConfig) -> Result<()> {
    let log_level = match config.logging.level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(if config.logging.log_requests {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        })
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;
    Ok(())
}

/// Periodic maintenance: rate-limit window eviction, quarter rollover,
/// stale-award defaulting, vault expiry, and a projection audit that logs
/// loudly if the ledger ever disagrees with its incremental balances.
fn spawn_maintenance(
    accounts: Arc<AccountDirectory>,
    limiter: Arc<RateLimiter>,
    payout: Arc<PayoutService>,
    store: Arc<LedgerStore>,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        let mut period = period_key(chrono::Utc::now());
        loop {
            interval.tick().await;
            limiter.cleanup();

            let now = chrono::Utc::now();
            let current = period_key(now);
            if current != period {
                accounts.reset_quarter();
                info!(period = %current, "Quarter rolled over; scan counts reset");
                period = current;
            }

            let defaulted = payout.expire_stale_awards(now).await;
            let expired = payout.expire_vaulted(now).await;
            if defaulted > 0 || expired > 0 {
                info!(defaulted, expired, "Award maintenance sweep completed");
            }

            if !store.verify_projections() {
                tracing::error!("Ledger projection mismatch detected during audit sweep");
            }
        }
    });
}
