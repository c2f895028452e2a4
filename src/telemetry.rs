// src/telemetry.rs
use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const DEFAULT_LOG_FILTER: &str = "artfight_monitor=info,warn";

/// One-time metrics registration (so series show up on /metrics).
pub fn describe_metrics() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("monitor_passes_total", "Polling passes started, per loop.");
        describe_counter!(
            "monitor_pass_errors_total",
            "Passes that failed and triggered the error cooldown, per loop."
        );
        describe_counter!("monitor_events_total", "Events emitted, per event kind.");
        describe_counter!(
            "dispatch_handler_errors_total",
            "Handler invocations that returned an error or panicked."
        );
        describe_counter!(
            "monitor_battle_over_total",
            "Times event monitoring was halted by the battle-over heuristic."
        );
        describe_gauge!("monitor_last_pass_ts", "Unix ts of the last pass, per loop.");
    });
}

/// Install the global tracing subscriber.
/// `RUST_LOG` overrides the default filter; `LOG_FORMAT=json` switches to
/// JSON lines. Calling twice is harmless (the second init is ignored).
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Install the Prometheus recorder with an HTTP listener on `addr`.
pub fn install_prometheus(addr: &str) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid metrics address {addr}"))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("prometheus: install recorder")?;
    tracing::info!(%addr, "metrics exporter listening");
    Ok(())
}
