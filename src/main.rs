//! System Resource Monitoring Exporter.
//!
//! Periodically samples host CPU, memory, disk, and network utilization and
//! exposes it as a Prometheus text endpoint, a JSON API, and a bundled HTML
//! dashboard.

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use resmon_exporter::registry::Registry;
use resmon_exporter::sampler::{Sampler, SysinfoSampler};
use resmon_exporter::server::{self, AppState};
use resmon_exporter::updater::MetricsUpdater;

const DEFAULT_PORT: u16 = 9100;

/// System resource monitoring exporter with Prometheus and JSON endpoints
#[derive(Parser, Debug)]
#[command(name = "resmon-exporter")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Listening port (overrides the PORT environment variable; default 9100)
    #[arg(short, long)]
    port: Option<u16>,

    /// Background refresh interval in seconds
    #[arg(short, long, default_value = "15")]
    interval: u64,
}

/// CLI flag wins over the PORT environment variable, then the default.
fn resolve_port(cli_port: Option<u16>) -> u16 {
    cli_port
        .or_else(|| std::env::var("PORT").ok().and_then(|v| v.parse().ok()))
        .unwrap_or(DEFAULT_PORT)
}

#[actix_web::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let port = resolve_port(args.port);

    let registry = Arc::new(RwLock::new(Registry::new()));
    let sampler: Arc<dyn Sampler> = Arc::new(SysinfoSampler::new());
    let updater = Arc::new(
        MetricsUpdater::new(registry, Arc::clone(&sampler))
            .context("failed to register exporter metrics")?,
    );

    // Background ticker so the registry holds data even before the first
    // scrape; /metrics additionally refreshes on demand.
    {
        let updater = Arc::clone(&updater);
        let period = Duration::from_secs(args.interval.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                updater.refresh();
            }
        });
    }

    let state = web::Data::new(AppState { updater, sampler });

    tracing::info!("server running on http://localhost:{port}");
    tracing::info!("metrics endpoint: http://localhost:{port}/metrics");

    HttpServer::new(move || App::new().app_data(state.clone()).configure(server::configure))
        .bind(("0.0.0.0", port))
        .with_context(|| format!("failed to bind port {port}"))?
        .run()
        .await?;

    Ok(())
}
