mod sites;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use dredger_core::{DredgerConfig, WebClient};

/// Sitemap-driven recipe discovery and Mealie import.
#[derive(Parser)]
#[command(name = "dredger", version, about, long_about = None)]
struct Cli {
    /// Scan and verify without importing anything
    #[arg(long)]
    dry_run: bool,

    /// Per-site import target for this run
    #[arg(long)]
    limit: Option<usize>,

    /// Maximum sitemap candidates considered per site
    #[arg(long)]
    depth: Option<usize>,

    /// Path to a JSON site list
    #[arg(long)]
    sites: Option<PathBuf>,

    /// Ignore cached sitemaps and re-crawl every site
    #[arg(long)]
    no_cache: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = DredgerConfig::from_env();
    if cli.dry_run {
        config.dry_run = true;
    }
    if let Some(limit) = cli.limit {
        config.target_recipes_per_site = limit;
    }
    if let Some(depth) = cli.depth {
        config.scan_depth = depth;
    }
    if cli.no_cache {
        config.force_refresh = true;
    }
    for warning in config.validate() {
        tracing::warn!("{warning}");
    }

    let sites = sites::resolve_sites(cli.sites.as_deref())?;
    anyhow::ensure!(!sites.is_empty(), "site list is empty");
    tracing::info!(
        sites = sites.len(),
        dry_run = config.dry_run,
        target = config.target_recipes_per_site,
        "starting dredge cycle"
    );

    let crawl_client = WebClient::builder()
        .user_agent(&config.user_agent)
        .build()
        .context("could not build crawl HTTP client")?;
    let import_client = WebClient::builder()
        .user_agent(format!("Dredger/{}", env!("CARGO_PKG_VERSION")))
        .bearer_token(&config.mealie_api_token)
        .timeout(config.import_timeout)
        .build()
        .context("could not build Mealie HTTP client")?;

    let cancel = Arc::new(AtomicBool::new(false));
    spawn_signal_handler(Arc::clone(&cancel));

    let summary = dredger_core::run(
        Arc::new(config),
        sites,
        Arc::new(crawl_client),
        Arc::new(import_client),
        cancel,
    )
    .await?;

    println!(
        "imported {} | rejected {} | retry queue {} | cached sitemaps {}{}",
        summary.imported,
        summary.rejected,
        summary.retry_queued,
        summary.cached_sitemaps,
        if summary.interrupted { " | interrupted" } else { "" },
    );
    Ok(())
}

/// Set the shared cancel flag on SIGINT or SIGTERM. The orchestrator
/// checks it at every loop boundary, so one signal drains the run
/// cleanly; a second signal during the drain kills the process as usual.
fn spawn_signal_handler(cancel: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(_) => std::future::pending().await,
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }
        tracing::info!("stop signal received, finishing in-flight work");
        cancel.store(true, Ordering::Relaxed);
    });
}
