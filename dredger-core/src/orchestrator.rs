//! The dredge cycle: retry queue first, then every site in random order.
//!
//! All store mutation happens on the control task. Parallel imports run
//! on a `JoinSet` and hand their outcomes back here instead of touching
//! shared state, so the store needs no locking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use rand::seq::SliceRandom;
use tokio::task::JoinSet;

use crate::config::DredgerConfig;
use crate::error::StoreError;
use crate::http::{HttpClient, RateLimiter};
use crate::import::ImportManager;
use crate::sitemap::SitemapCrawler;
use crate::store::Store;
use crate::types::{ImportOutcome, SiteStats, Verdict};
use crate::urls::canonicalize_url;
use crate::verify::RecipeVerifier;

/// Totals for one dredge cycle, read back from the store when it ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub imported: usize,
    pub rejected: usize,
    pub retry_queued: usize,
    pub cached_sitemaps: usize,
    pub interrupted: bool,
}

/// An import outcome travelling back from a worker to the control task.
type ImportJob = (String, String, ImportOutcome);

/// Per-site bookkeeping for the candidate loop.
#[derive(Default)]
struct SiteProgress {
    stats: SiteStats,
    imported_count: usize,
    failure_streak: u32,
    abort_site: bool,
}

/// Run one full dredge cycle over `sites`.
///
/// `crawl_client` fetches robots, sitemaps, and candidate pages;
/// `import_client` talks to Mealie and carries its bearer token. The
/// cancel flag is checked at every loop boundary; in-flight imports are
/// drained or aborted and the store flushed before returning.
pub async fn run(
    config: Arc<DredgerConfig>,
    sites: Vec<String>,
    crawl_client: Arc<dyn HttpClient>,
    import_client: Arc<dyn HttpClient>,
    cancel: Arc<AtomicBool>,
) -> Result<RunSummary, StoreError> {
    let mut store = Store::open(&config)?;
    let rate_limiter = Arc::new(RateLimiter::new(Arc::clone(&crawl_client), &config));
    let crawler = SitemapCrawler::new(Arc::clone(&crawl_client), &config);
    let verifier = RecipeVerifier::new(Arc::clone(&crawl_client), Arc::clone(&config));
    let importer = Arc::new(ImportManager::new(
        import_client,
        Arc::clone(&config),
        Arc::clone(&rate_limiter),
    ));

    process_retry_queue(&mut store, &config, &verifier, &importer, &rate_limiter, &cancel).await?;

    let mut sites = sites;
    sites.shuffle(&mut rand::thread_rng());

    for site in &sites {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        tracing::info!(site = %site, "processing site");

        let raw_candidates = crawler
            .urls_for_site(&mut store, site, config.force_refresh)
            .await?;
        if raw_candidates.is_empty() {
            continue;
        }

        let mut candidates: Vec<_> = raw_candidates
            .into_iter()
            .take(config.scan_depth)
            .collect();
        candidates.shuffle(&mut rand::thread_rng());

        let mut progress = SiteProgress::default();
        let mut joins: JoinSet<ImportJob> = JoinSet::new();
        let use_pool = config.import_workers > 1 && !config.dry_run;

        for candidate in candidates {
            if cancel.load(Ordering::Relaxed) || progress.abort_site {
                break;
            }
            if progress.imported_count >= config.target_recipes_per_site {
                break;
            }

            let url = candidate.url;
            let url_key = canonical_key(&url);
            if store.seen(&url_key) {
                continue;
            }

            rate_limiter.wait_if_needed(&url).await;

            match verifier.verify_recipe(&url).await {
                Verdict::Accept => {
                    progress.stats.recipes_found += 1;

                    if !use_pool {
                        let outcome = importer.import_recipe(&url).await;
                        settle_import(
                            &mut store, &config, &mut progress, site, &url, &url_key, outcome,
                        )?;
                        continue;
                    }

                    // Hold submission while the pool is full or the
                    // in-flight imports alone could reach the target.
                    while !joins.is_empty()
                        && (joins.len() >= config.import_workers
                            || progress.imported_count + joins.len()
                                >= config.target_recipes_per_site)
                    {
                        drain_imports(&mut joins, true, &mut store, &config, &mut progress, site)
                            .await?;
                        if cancel.load(Ordering::Relaxed) {
                            break;
                        }
                    }
                    if cancel.load(Ordering::Relaxed)
                        || progress.imported_count >= config.target_recipes_per_site
                    {
                        break;
                    }

                    let task_importer = Arc::clone(&importer);
                    let task_url = url.clone();
                    let task_key = url_key.clone();
                    joins.spawn(async move {
                        let outcome = task_importer.import_recipe(&task_url).await;
                        (task_url, task_key, outcome)
                    });
                    drain_imports(&mut joins, false, &mut store, &config, &mut progress, site)
                        .await?;
                }
                Verdict::Reject { reason, transient } => {
                    if transient {
                        store.add_retry(&url_key, &reason, true)?;
                        let attempts = store.retry_attempts(&url_key).unwrap_or(0);
                        tracing::warn!(
                            url = %url,
                            attempts,
                            max_attempts = config.max_retry_attempts,
                            "transient verification failure queued for retry"
                        );
                    } else {
                        tracing::debug!(url = %url, reason = %reason, "skipping candidate");
                        store.add_reject(&url_key)?;
                        progress.stats.recipes_rejected += 1;
                    }
                }
            }
        }

        while !joins.is_empty()
            && !cancel.load(Ordering::Relaxed)
            && progress.imported_count < config.target_recipes_per_site
            && !progress.abort_site
        {
            drain_imports(&mut joins, true, &mut store, &config, &mut progress, site).await?;
        }
        joins.shutdown().await;

        tracing::info!(
            site = %site,
            imported = progress.stats.recipes_imported,
            rejected = progress.stats.recipes_rejected,
            errors = progress.stats.errors,
            "site results"
        );

        progress.stats.last_run = Some(Utc::now());
        store.update_stats(site, progress.stats)?;
        store.flush()?;
    }

    store.flush()?;
    let summary = RunSummary {
        imported: store.imported_count(),
        rejected: store.reject_count(),
        retry_queued: store.retry_count(),
        cached_sitemaps: store.cached_sitemap_count(),
        interrupted: cancel.load(Ordering::Relaxed),
    };
    if summary.interrupted {
        tracing::info!("stopped by signal before completing the cycle");
    }
    tracing::info!(
        imported = summary.imported,
        rejected = summary.rejected,
        retry_queued = summary.retry_queued,
        cached_sitemaps = summary.cached_sitemaps,
        "dredge cycle complete"
    );
    Ok(summary)
}

/// Re-run every queued URL through verify and import. Entries at the
/// attempt cap are evicted to rejected without another attempt.
async fn process_retry_queue(
    store: &mut Store,
    config: &DredgerConfig,
    verifier: &RecipeVerifier,
    importer: &ImportManager,
    rate_limiter: &RateLimiter,
    cancel: &AtomicBool,
) -> Result<(), StoreError> {
    let pending = store.retry_snapshot();
    if pending.is_empty() {
        return Ok(());
    }
    tracing::info!(count = pending.len(), "processing retry queue");

    for (url, entry) in pending {
        if cancel.load(Ordering::Relaxed) {
            break;
        }

        let url_key = canonical_key(&url);
        if entry.attempts >= config.max_retry_attempts {
            tracing::warn!(url = %url, attempts = entry.attempts, "giving up after max attempts");
            store.remove_retry(&url_key)?;
            store.add_reject(&url_key)?;
            continue;
        }

        rate_limiter.wait_if_needed(&url).await;

        if let Verdict::Reject { reason, transient } = verifier.verify_recipe(&url).await {
            if transient {
                requeue_or_evict(store, config, &url, &url_key, &reason, "verify")?;
            } else {
                store.remove_retry(&url_key)?;
                store.add_reject(&url_key)?;
            }
            continue;
        }

        let outcome = importer.import_recipe(&url).await;
        if outcome.imported {
            store.add_imported(&url_key)?;
            continue;
        }
        if outcome.transient {
            let reason = outcome
                .error
                .unwrap_or_else(|| "Transient import failure".to_string());
            requeue_or_evict(store, config, &url, &url_key, &reason, "import")?;
        } else {
            store.remove_retry(&url_key)?;
            store.add_reject(&url_key)?;
        }
    }
    Ok(())
}

/// Bump the attempt count for a transient failure, evicting to rejected
/// when the increment lands on the cap.
fn requeue_or_evict(
    store: &mut Store,
    config: &DredgerConfig,
    url: &str,
    url_key: &str,
    reason: &str,
    stage: &str,
) -> Result<(), StoreError> {
    store.add_retry(url_key, reason, true)?;
    let attempts = store.retry_attempts(url_key).unwrap_or(0);
    if attempts >= config.max_retry_attempts {
        tracing::warn!(url = %url, stage, "max retries reached, rejecting");
        store.remove_retry(url_key)?;
        store.add_reject(url_key)?;
    } else {
        tracing::warn!(
            url = %url,
            stage,
            attempts,
            max_attempts = config.max_retry_attempts,
            "retry queued"
        );
    }
    Ok(())
}

/// Collect finished import workers and apply their outcomes. Blocking
/// mode waits for at least one completion first; either way every
/// already-finished worker is settled before returning.
async fn drain_imports(
    joins: &mut JoinSet<ImportJob>,
    block: bool,
    store: &mut Store,
    config: &DredgerConfig,
    progress: &mut SiteProgress,
    site: &str,
) -> Result<(), StoreError> {
    if joins.is_empty() {
        return Ok(());
    }

    if block {
        if let Some(joined) = joins.join_next().await {
            settle_joined(joined, store, config, progress, site)?;
        }
    }
    while let Some(joined) = joins.try_join_next() {
        settle_joined(joined, store, config, progress, site)?;
    }
    Ok(())
}

fn settle_joined(
    joined: Result<ImportJob, tokio::task::JoinError>,
    store: &mut Store,
    config: &DredgerConfig,
    progress: &mut SiteProgress,
    site: &str,
) -> Result<(), StoreError> {
    match joined {
        Ok((url, url_key, outcome)) => {
            settle_import(store, config, progress, site, &url, &url_key, outcome)
        }
        Err(err) => {
            progress.stats.errors += 1;
            tracing::error!(error = %err, "import worker failed");
            Ok(())
        }
    }
}

/// Apply one import outcome to the store and the site's bookkeeping,
/// including the consecutive-5xx circuit breaker.
fn settle_import(
    store: &mut Store,
    config: &DredgerConfig,
    progress: &mut SiteProgress,
    site: &str,
    url: &str,
    url_key: &str,
    outcome: ImportOutcome,
) -> Result<(), StoreError> {
    if outcome.imported {
        store.add_imported(url_key)?;
        progress.stats.recipes_imported += 1;
        progress.imported_count += 1;
        progress.failure_streak = 0;
        return Ok(());
    }

    progress.stats.errors += 1;
    let error = outcome.error.unwrap_or_default();

    if outcome.transient {
        let reason = if error.is_empty() {
            "Transient import failure"
        } else {
            error.as_str()
        };
        store.add_retry(url_key, reason, true)?;
        let attempts = store.retry_attempts(url_key).unwrap_or(0);
        tracing::warn!(
            url = %url,
            attempts,
            max_attempts = config.max_retry_attempts,
            "transient import failure queued for retry"
        );
    } else {
        store.add_reject(url_key)?;
        tracing::error!(url = %url, error = %error, "import failed");
    }

    if error.starts_with("HTTP 5") {
        progress.failure_streak += 1;
        if config.site_import_failure_threshold > 0
            && progress.failure_streak >= config.site_import_failure_threshold
        {
            if !progress.abort_site {
                tracing::warn!(
                    site = %site,
                    streak = progress.failure_streak,
                    "aborting site after repeated server-side import failures"
                );
            }
            progress.abort_site = true;
        }
    } else {
        progress.failure_streak = 0;
    }

    Ok(())
}

fn canonical_key(url: &str) -> String {
    let canonical = canonicalize_url(url);
    if canonical.is_empty() {
        url.to_string()
    } else {
        canonical
    }
}
