//! Monitor daemon entrypoint.
//! Loads config, wires storage, guarded fetcher and handlers, then runs the
//! polling loops until Ctrl-C.

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use artfight_monitor::config::load_config_default;
use artfight_monitor::handlers::LoggingHandler;
use artfight_monitor::{
    spawn_cache_sweeper, telemetry, FixtureFetcher, GuardedFetcher, JsonStore, Monitor,
    RateLimiter, TtlCache,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    telemetry::init_tracing();

    let cfg = load_config_default()?;
    if let Some(addr) = cfg.metrics_addr.as_deref() {
        telemetry::install_prometheus(addr)?;
    }

    let store = Arc::new(JsonStore::open(&cfg.store_path)?);
    let limiter = RateLimiter::new(store.clone(), cfg.rate_limit_interval_secs);
    let cache = TtlCache::new(store.clone());
    let fetcher = GuardedFetcher::new(
        Arc::new(FixtureFetcher::new(&cfg.fixtures_dir)),
        limiter,
        cache.clone(),
        store.clone(),
        cfg.cache_ttl_secs,
    );

    tracing::info!(
        store = %cfg.store_path.display(),
        fixtures = %cfg.fixtures_dir.display(),
        users = cfg.monitored_users().len(),
        "starting monitor"
    );

    let sweep_period = std::time::Duration::from_secs(cfg.cache_sweep_interval_secs);
    let teams = cfg.teams.clone();
    let monitor =
        Monitor::new(cfg, Arc::new(fetcher), store.clone()).with_cache(cache.clone());
    monitor
        .dispatcher()
        .register_all(Arc::new(LoggingHandler::new(teams)));

    monitor.start().await;
    let sweeper_token = CancellationToken::new();
    let sweeper = spawn_cache_sweeper(cache, sweep_period, sweeper_token.clone());

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");

    sweeper_token.cancel();
    if let Err(e) = sweeper.await {
        tracing::warn!("cache sweeper join failed: {e}");
    }
    monitor.stop().await;
    store.flush()?;
    Ok(())
}
