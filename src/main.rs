//! Live sync service binary entrypoint.
//! Starts the update poller and serves the page view, admin forms and metrics.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use village_live_sync::{metrics::Metrics, router, LiveSync, SyncConfig};

/// Compact logs by default; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("village_live_sync=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = SyncConfig::load_default().context("load live sync config")?;
    let metrics = Metrics::init(cfg.poll_interval_secs).context("install metrics recorder")?;

    let live = LiveSync::from_config(&cfg).await?;
    let handle = live.start(&cfg);
    let _sweeper = live.page.spawn_sweeper(Duration::from_secs(1));

    let app = router(live.app_state(&handle)).merge(metrics.router());

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("bind {}", cfg.bind_addr))?;
    tracing::info!(addr = %cfg.bind_addr, data_url = %cfg.data_url, "live sync listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("serve")?;

    handle.stop();
    Ok(())
}
