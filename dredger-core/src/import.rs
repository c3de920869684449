//! Mealie import pipeline.
//!
//! Imports go through Mealie's scrape-by-URL endpoint. The endpoint path
//! moved between Mealie releases, so the first successful path is
//! remembered and tried first on later imports. An optional duplicate
//! precheck loads the instance's existing source URLs once per run and
//! skips candidates Mealie already has.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::config::DredgerConfig;
use crate::http::{is_transient_status, HttpClient, RateLimiter};
use crate::types::ImportOutcome;
use crate::urls::canonicalize_url;

/// Import endpoint paths across Mealie releases, newest first.
const ENDPOINT_CANDIDATES: [&str; 2] = ["/api/recipes/create/url", "/api/recipes/create-url"];

/// Canonical source URLs already present in the Mealie instance.
///
/// Loaded lazily before the first real import. A failed load marks the
/// index unusable and disables the precheck for the rest of the run
/// rather than stalling imports.
#[derive(Default)]
struct SourceIndex {
    loaded: bool,
    failed: bool,
    urls: HashSet<String>,
}

pub struct ImportManager {
    client: Arc<dyn HttpClient>,
    config: Arc<DredgerConfig>,
    rate_limiter: Arc<RateLimiter>,
    working_endpoint: Mutex<Option<&'static str>>,
    source_index: Mutex<SourceIndex>,
}

impl ImportManager {
    pub fn new(
        client: Arc<dyn HttpClient>,
        config: Arc<DredgerConfig>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            client,
            config,
            rate_limiter,
            working_endpoint: Mutex::new(None),
            source_index: Mutex::new(SourceIndex::default()),
        }
    }

    /// Import one verified recipe URL into Mealie.
    pub async fn import_recipe(&self, url: &str) -> ImportOutcome {
        if !self.config.mealie_enabled {
            return ImportOutcome::failure("Mealie import is disabled");
        }
        self.import_to_mealie(url).await
    }

    async fn import_to_mealie(&self, url: &str) -> ImportOutcome {
        if self.config.dry_run {
            tracing::info!(url, "dry run, skipping Mealie import");
            return ImportOutcome::success();
        }

        if self.is_duplicate_source(url).await {
            return ImportOutcome::success();
        }

        self.rate_limiter.wait_if_needed(&self.config.mealie_url).await;

        let mut endpoint_error: Option<String> = None;
        for path in self.candidate_paths().await {
            let endpoint = format!("{}{}", self.config.mealie_url, path);
            let response = match self
                .client
                .post_json(&endpoint, &json!({ "url": url }), self.config.import_timeout)
                .await
            {
                Ok(response) => response,
                Err(err) if err.is_transient() => {
                    return ImportOutcome::failure_transient(err.to_string());
                }
                Err(err) => return ImportOutcome::failure(err.to_string()),
            };

            match response.status {
                200 | 201 | 202 => {
                    self.remember_endpoint(path).await;
                    self.remember_source(url).await;
                    tracing::info!(url, "imported into Mealie");
                    return ImportOutcome::success();
                }
                // Mealie already has this recipe; counts as imported.
                409 => {
                    self.remember_endpoint(path).await;
                    self.remember_source(url).await;
                    tracing::info!(url, "Mealie reports duplicate");
                    return ImportOutcome::success();
                }
                404 | 405 => {
                    endpoint_error = Some(format!("HTTP {}", response.status));
                    continue;
                }
                status if is_transient_status(status) => {
                    return ImportOutcome::failure_transient(format!("HTTP {status}"));
                }
                status => {
                    let body = flatten_body(&response.text());
                    let reason = if body.is_empty() {
                        format!("HTTP {status}")
                    } else {
                        format!("HTTP {status} - {body}")
                    };
                    return ImportOutcome::failure(reason);
                }
            }
        }

        ImportOutcome::failure(
            endpoint_error
                .unwrap_or_else(|| "No compatible Mealie import endpoint found".to_string()),
        )
    }

    /// Endpoint candidates with the last known working path first.
    async fn candidate_paths(&self) -> Vec<&'static str> {
        let mut paths = ENDPOINT_CANDIDATES.to_vec();
        if let Some(working) = *self.working_endpoint.lock().await {
            if let Some(pos) = paths.iter().position(|path| *path == working) {
                paths.remove(pos);
                paths.insert(0, working);
            }
        }
        paths
    }

    async fn remember_endpoint(&self, path: &'static str) {
        let mut memo = self.working_endpoint.lock().await;
        if *memo != Some(path) {
            *memo = Some(path);
            tracing::info!(path, "using Mealie import endpoint");
        }
    }

    async fn remember_source(&self, url: &str) {
        let canonical = canonicalize_url(url);
        if canonical.is_empty() {
            return;
        }
        self.source_index.lock().await.urls.insert(canonical);
    }

    async fn is_duplicate_source(&self, url: &str) -> bool {
        if !self.config.import_precheck_duplicates {
            return false;
        }

        let mut index = self.source_index.lock().await;
        self.ensure_index_loaded(&mut index).await;
        if index.failed {
            return false;
        }

        let canonical = canonicalize_url(url);
        if !canonical.is_empty() && index.urls.contains(&canonical) {
            tracing::info!(url, "duplicate source URL, skipping import");
            return true;
        }
        false
    }

    /// Page through `/api/recipes` and collect every canonical source URL.
    /// Any failure poisons the index so the precheck is skipped for the
    /// rest of the run.
    async fn ensure_index_loaded(&self, index: &mut SourceIndex) {
        if index.loaded || index.failed {
            return;
        }

        let mut urls = HashSet::new();
        let mut page = 1u32;
        loop {
            let endpoint = format!(
                "{}/api/recipes?page={page}&perPage=1000",
                self.config.mealie_url
            );
            let response = match self.client.get(&endpoint, self.config.import_timeout).await {
                Ok(response) => response,
                Err(err) => {
                    tracing::warn!(error = %err, "duplicate precheck unavailable");
                    index.failed = true;
                    return;
                }
            };
            if response.status != 200 {
                tracing::warn!(
                    status = response.status,
                    "duplicate precheck disabled: recipe list request failed"
                );
                index.failed = true;
                return;
            }

            let payload: Value = match serde_json::from_slice(&response.body) {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(error = %err, "duplicate precheck unavailable");
                    index.failed = true;
                    return;
                }
            };
            if !payload.is_object() {
                index.failed = true;
                return;
            }

            let items = match payload.get("items").and_then(Value::as_array) {
                Some(items) if !items.is_empty() => items,
                _ => break,
            };
            for item in items {
                let canonical = canonicalize_url(&extract_source_url(item));
                if !canonical.is_empty() {
                    urls.insert(canonical);
                }
            }

            page += 1;
        }

        tracing::info!(entries = urls.len(), "duplicate precheck source index loaded");
        index.urls = urls;
        index.loaded = true;
    }
}

/// The source URL Mealie recorded for a recipe, across the field names
/// different releases use.
fn extract_source_url(recipe: &Value) -> String {
    for key in ["orgURL", "originalURL", "source"] {
        if let Some(value) = recipe.get(key).and_then(Value::as_str) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    String::new()
}

/// Collapse an error body onto one line and cap its length so reject
/// reasons stay readable in the store.
fn flatten_body(body: &str) -> String {
    let body = body.trim().replace('\n', " ");
    if body.chars().count() > 180 {
        let truncated: String = body.chars().take(177).collect();
        format!("{truncated}...")
    } else {
        body
    }
}
