//! Sitemap discovery and URL extraction.
//!
//! Discovery never fails: a site without a findable sitemap yields no
//! candidates and the run moves on. Scans are cached in the store so a
//! site's sitemap tree is walked at most once per expiry window.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use flate2::read::GzDecoder;
use quick_xml::de::from_str;
use serde::Deserialize;
use texting_robots::Robot;

use crate::config::DredgerConfig;
use crate::error::StoreError;
use crate::http::HttpClient;
use crate::store::Store;
use crate::types::RecipeCandidate;

const ROBOTS_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const SITEMAP_TIMEOUT: Duration = Duration::from_secs(10);

/// Well-known sitemap locations, probed in order after robots.txt.
const WELL_KNOWN_SITEMAPS: &[&str] = &[
    "sitemap_index.xml",
    "sitemap.xml",
    "wp-sitemap.xml",
    "post-sitemap.xml",
    "recipe-sitemap.xml",
];

/// Nesting levels of sitemap indexes to follow.
const MAX_SITEMAP_DEPTH: u8 = 2;

/// Sub-sitemaps fetched per index level.
const MAX_SUB_SITEMAPS: usize = 3;

// Sitemap XML shapes. `sitemap` stays a required field so that a urlset
// document fails this parse and falls through to the `Urlset` attempt.
#[derive(Debug, Deserialize)]
struct SitemapIndex {
    sitemap: Vec<SitemapEntry>,
}

#[derive(Debug, Deserialize)]
struct SitemapEntry {
    loc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Urlset {
    #[serde(default)]
    url: Vec<UrlEntry>,
}

#[derive(Debug, Deserialize)]
struct UrlEntry {
    // Only the direct <loc> child counts; a namespaced <image:loc> is a
    // different element name and deserializes to nothing here.
    loc: Option<String>,
}

pub struct SitemapCrawler {
    client: Arc<dyn HttpClient>,
    user_agent: String,
}

impl SitemapCrawler {
    pub fn new(client: Arc<dyn HttpClient>, config: &DredgerConfig) -> Self {
        Self {
            client,
            user_agent: config.user_agent.clone(),
        }
    }

    /// Candidates for a site, from the cached scan when fresh enough,
    /// otherwise from a live sitemap walk whose result is cached even when
    /// empty. A site with no discoverable sitemap yields no candidates and
    /// caches nothing.
    pub async fn urls_for_site(
        &self,
        store: &mut Store,
        site_url: &str,
        force_refresh: bool,
    ) -> Result<Vec<RecipeCandidate>, StoreError> {
        if !force_refresh {
            if let Some(cached) = store.get_cached_sitemap(site_url) {
                tracing::debug!(site = site_url, count = cached.urls.len(), "using cached sitemap");
                return Ok(cached.urls.iter().map(RecipeCandidate::new).collect());
            }
        }

        let Some(sitemap_url) = self.find_sitemap(site_url).await else {
            tracing::warn!(site = site_url, "no sitemap found");
            return Ok(Vec::new());
        };

        let urls = self.fetch_sitemap_urls(&sitemap_url).await;
        tracing::info!(site = site_url, sitemap = %sitemap_url, count = urls.len(), "sitemap scanned");
        store.cache_sitemap(site_url, &sitemap_url, urls.clone())?;
        Ok(urls.into_iter().map(RecipeCandidate::new).collect())
    }

    /// Locate a site's sitemap: the robots.txt `Sitemap:` directive first,
    /// then HEAD probes over the well-known paths. Servers that reject
    /// HEAD (405/501) get a GET fallback. Returns the final URL after
    /// redirects, or `None` when nothing answers.
    pub async fn find_sitemap(&self, base_url: &str) -> Option<String> {
        let base = base_url.trim_end_matches('/');

        let robots_url = format!("{base}/robots.txt");
        if let Ok(response) = self.client.get(&robots_url, ROBOTS_TIMEOUT).await {
            if response.status == 200 {
                if let Ok(robot) = Robot::new(&self.user_agent, &response.body) {
                    if let Some(sitemap) = robot.sitemaps.first() {
                        tracing::debug!(site = base, sitemap = %sitemap, "sitemap from robots.txt");
                        return Some(sitemap.clone());
                    }
                }
            }
        }

        for path in WELL_KNOWN_SITEMAPS {
            let url = format!("{base}/{path}");
            match self.client.head(&url, PROBE_TIMEOUT).await {
                Ok(response) if response.status == 200 => return Some(response.url),
                Ok(response) if response.status == 405 || response.status == 501 => {
                    if let Ok(fallback) = self.client.get(&url, PROBE_TIMEOUT).await {
                        if fallback.status == 200 {
                            return Some(fallback.url);
                        }
                    }
                }
                _ => {}
            }
        }

        None
    }

    /// All page URLs reachable from a sitemap, following index nesting up
    /// to [`MAX_SITEMAP_DEPTH`] levels. Failures degrade to an empty list.
    pub async fn fetch_sitemap_urls(&self, url: &str) -> Vec<String> {
        self.fetch_level(url, 0).await
    }

    async fn fetch_level(&self, url: &str, depth: u8) -> Vec<String> {
        if depth > MAX_SITEMAP_DEPTH {
            return Vec::new();
        }

        let response = match self.client.get(url, SITEMAP_TIMEOUT).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(url, error = %err, "sitemap fetch failed");
                return Vec::new();
            }
        };
        if response.status != 200 {
            tracing::debug!(url, status = response.status, "sitemap fetch returned non-200");
            return Vec::new();
        }

        let body = maybe_decompress(url, &response.body);
        let content = String::from_utf8_lossy(&body);

        if let Ok(index) = from_str::<SitemapIndex>(&content) {
            let sub_maps: Vec<String> = index
                .sitemap
                .into_iter()
                .filter_map(|entry| entry.loc)
                .map(|loc| loc.trim().to_string())
                .filter(|loc| !loc.is_empty())
                .collect();

            // Prefer post/recipe sub-sitemaps; fall back to everything.
            let mut targets: Vec<&String> = sub_maps
                .iter()
                .filter(|loc| loc.contains("post") || loc.contains("recipe"))
                .collect();
            if targets.is_empty() {
                targets = sub_maps.iter().collect();
            }

            let mut all_urls = Vec::new();
            for sub_map in targets.into_iter().take(MAX_SUB_SITEMAPS) {
                let sub_urls = Box::pin(self.fetch_level(sub_map, depth + 1)).await;
                all_urls.extend(sub_urls);
            }
            return all_urls;
        }

        if let Ok(urlset) = from_str::<Urlset>(&content) {
            return urlset
                .url
                .into_iter()
                .filter_map(|entry| entry.loc)
                .map(|loc| loc.trim().to_string())
                .filter(|loc| loc.starts_with("http://") || loc.starts_with("https://"))
                .collect();
        }

        tracing::warn!(url, "unrecognized sitemap format");
        Vec::new()
    }
}

/// Undo gzip compression for `.gz` sitemap files and payloads that carry
/// the gzip magic despite the transfer encoding saying otherwise.
fn maybe_decompress(url: &str, body: &[u8]) -> Vec<u8> {
    let gzipped = url.ends_with(".gz") || body.starts_with(&[0x1f, 0x8b]);
    if !gzipped {
        return body.to_vec();
    }
    let mut decoder = GzDecoder::new(body);
    let mut out = Vec::new();
    match decoder.read_to_end(&mut out) {
        Ok(_) => out,
        Err(err) => {
            tracing::warn!(url, error = %err, "failed to decompress sitemap");
            body.to_vec()
        }
    }
}
