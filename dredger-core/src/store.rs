//! JSON-file persistence for crawl state.
//!
//! Five artifacts live under the data directory: the imported and rejected
//! URL sets, the retry queue, per-site stats, and the sitemap cache. All
//! keys are canonical URLs. Files are rewritten whole on flush; a flush
//! happens automatically every [`FLUSH_THRESHOLD`] mutations and explicitly
//! after each site and at shutdown, so a crash loses at most a bounded
//! slice of progress.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::DredgerConfig;
use crate::error::StoreError;
use crate::types::{CachedSitemap, RetryEntry, SiteStats};

const REJECTS_FILE: &str = "rejects.json";
const IMPORTED_FILE: &str = "imported.json";
const RETRY_FILE: &str = "retry_queue.json";
const STATS_FILE: &str = "stats.json";
const SITEMAP_CACHE_FILE: &str = "sitemap_cache.json";

/// Mutations between automatic flushes.
const FLUSH_THRESHOLD: usize = 50;

pub struct Store {
    data_dir: PathBuf,
    rejects: HashSet<String>,
    imported: HashSet<String>,
    retry_queue: HashMap<String, RetryEntry>,
    stats: HashMap<String, SiteStats>,
    sitemap_cache: HashMap<String, CachedSitemap>,
    cache_expiry_days: i64,
    changes_since_flush: usize,
}

impl Store {
    /// Open the store, creating the data directory if needed. Missing
    /// artifacts start empty; unreadable or corrupt ones are logged and
    /// start empty rather than aborting the run.
    pub fn open(config: &DredgerConfig) -> Result<Self, StoreError> {
        let data_dir = config.data_dir.clone();
        fs::create_dir_all(&data_dir).map_err(|source| StoreError::Io {
            path: data_dir.clone(),
            source,
        })?;

        Ok(Self {
            rejects: load_json(&data_dir.join(REJECTS_FILE)),
            imported: load_json(&data_dir.join(IMPORTED_FILE)),
            retry_queue: load_json(&data_dir.join(RETRY_FILE)),
            stats: load_json(&data_dir.join(STATS_FILE)),
            sitemap_cache: load_json(&data_dir.join(SITEMAP_CACHE_FILE)),
            data_dir,
            cache_expiry_days: config.cache_expiry_days,
            changes_since_flush: 0,
        })
    }

    /// Record a successful import. Drops the key from the rejected set and
    /// the retry queue; a URL is never in two sets at once.
    pub fn add_imported(&mut self, url: &str) -> Result<(), StoreError> {
        self.imported.insert(url.to_string());
        self.rejects.remove(url);
        self.retry_queue.remove(url);
        self.bump()
    }

    /// Record a permanent rejection. Drops the key from the imported set
    /// and the retry queue.
    pub fn add_reject(&mut self, url: &str) -> Result<(), StoreError> {
        self.rejects.insert(url.to_string());
        self.imported.remove(url);
        self.retry_queue.remove(url);
        self.bump()
    }

    /// Queue a URL for a later attempt. Attempts carry over from any
    /// existing entry and only grow when `increment` is set, so re-queuing
    /// with a fresh reason does not burn an attempt.
    pub fn add_retry(&mut self, url: &str, reason: &str, increment: bool) -> Result<(), StoreError> {
        let attempts = self
            .retry_queue
            .get(url)
            .map(|entry| entry.attempts)
            .unwrap_or(0);
        let attempts = if increment { attempts + 1 } else { attempts };
        self.imported.remove(url);
        self.rejects.remove(url);
        self.retry_queue.insert(
            url.to_string(),
            RetryEntry {
                reason: reason.to_string(),
                attempts,
                last_attempt: Utc::now(),
            },
        );
        self.bump()
    }

    pub fn remove_retry(&mut self, url: &str) -> Result<(), StoreError> {
        if self.retry_queue.remove(url).is_some() {
            return self.bump();
        }
        Ok(())
    }

    pub fn update_stats(&mut self, site_url: &str, stats: SiteStats) -> Result<(), StoreError> {
        self.stats.insert(site_url.to_string(), stats);
        self.bump()
    }

    pub fn cache_sitemap(
        &mut self,
        site_url: &str,
        sitemap_url: &str,
        urls: Vec<String>,
    ) -> Result<(), StoreError> {
        self.sitemap_cache.insert(
            site_url.to_string(),
            CachedSitemap {
                sitemap_url: sitemap_url.to_string(),
                urls,
                timestamp: Utc::now(),
            },
        );
        self.bump()
    }

    /// Cached sitemap scan for a site, or `None` once the entry has aged
    /// past the expiry window.
    pub fn get_cached_sitemap(&self, site_url: &str) -> Option<&CachedSitemap> {
        let entry = self.sitemap_cache.get(site_url)?;
        if Utc::now() - entry.timestamp > Duration::days(self.cache_expiry_days) {
            return None;
        }
        Some(entry)
    }

    /// Whether this key is already imported, rejected, or queued for retry.
    pub fn seen(&self, url: &str) -> bool {
        self.imported.contains(url) || self.rejects.contains(url) || self.retry_queue.contains_key(url)
    }

    pub fn is_imported(&self, url: &str) -> bool {
        self.imported.contains(url)
    }

    pub fn is_rejected(&self, url: &str) -> bool {
        self.rejects.contains(url)
    }

    pub fn retry_attempts(&self, url: &str) -> Option<u32> {
        self.retry_queue.get(url).map(|entry| entry.attempts)
    }

    /// Snapshot of the retry queue, for draining while mutating the store.
    pub fn retry_snapshot(&self) -> Vec<(String, RetryEntry)> {
        self.retry_queue
            .iter()
            .map(|(url, entry)| (url.clone(), entry.clone()))
            .collect()
    }

    pub fn imported_count(&self) -> usize {
        self.imported.len()
    }

    pub fn reject_count(&self) -> usize {
        self.rejects.len()
    }

    pub fn retry_count(&self) -> usize {
        self.retry_queue.len()
    }

    pub fn cached_sitemap_count(&self) -> usize {
        self.sitemap_cache.len()
    }

    /// Write all five artifacts to disk.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        save_json(&self.data_dir.join(REJECTS_FILE), &self.rejects)?;
        save_json(&self.data_dir.join(IMPORTED_FILE), &self.imported)?;
        save_json(&self.data_dir.join(RETRY_FILE), &self.retry_queue)?;
        save_json(&self.data_dir.join(STATS_FILE), &self.stats)?;
        save_json(&self.data_dir.join(SITEMAP_CACHE_FILE), &self.sitemap_cache)?;
        self.changes_since_flush = 0;
        Ok(())
    }

    fn bump(&mut self) -> Result<(), StoreError> {
        self.changes_since_flush += 1;
        if self.changes_since_flush >= FLUSH_THRESHOLD {
            return self.flush();
        }
        Ok(())
    }
}

fn load_json<T: DeserializeOwned + Default>(path: &Path) -> T {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return T::default(),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "could not read store file, starting empty");
            return T::default();
        }
    };
    match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "corrupt store file, starting empty");
            T::default()
        }
    }
}

fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> DredgerConfig {
        DredgerConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn round_trips_across_reopen() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        {
            let mut store = Store::open(&config).unwrap();
            store.add_imported("https://example.com/a").unwrap();
            store.add_reject("https://example.com/b").unwrap();
            store.add_retry("https://example.com/c", "HTTP 503", false).unwrap();
            store.flush().unwrap();
        }
        let store = Store::open(&config).unwrap();
        assert!(store.is_imported("https://example.com/a"));
        assert!(store.is_rejected("https://example.com/b"));
        assert_eq!(store.retry_attempts("https://example.com/c"), Some(0));
        assert_eq!(store.imported_count(), 1);
    }

    #[test]
    fn imported_and_rejected_evict_retry_entries() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(&test_config(&dir)).unwrap();

        store.add_retry("https://example.com/a", "Timeout", false).unwrap();
        store.add_imported("https://example.com/a").unwrap();
        assert!(store.retry_attempts("https://example.com/a").is_none());
        assert!(store.is_imported("https://example.com/a"));

        store.add_retry("https://example.com/b", "Timeout", false).unwrap();
        store.add_reject("https://example.com/b").unwrap();
        assert!(store.retry_attempts("https://example.com/b").is_none());
        assert!(store.is_rejected("https://example.com/b"));
    }

    #[test]
    fn retry_attempts_grow_only_on_increment() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(&test_config(&dir)).unwrap();

        store.add_retry("https://example.com/a", "HTTP 503", false).unwrap();
        assert_eq!(store.retry_attempts("https://example.com/a"), Some(0));

        store.add_retry("https://example.com/a", "HTTP 500", true).unwrap();
        assert_eq!(store.retry_attempts("https://example.com/a"), Some(1));

        store.add_retry("https://example.com/a", "Timeout", false).unwrap();
        assert_eq!(store.retry_attempts("https://example.com/a"), Some(1));
    }

    #[test]
    fn key_lives_in_exactly_one_set() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(&test_config(&dir)).unwrap();
        let url = "https://example.com/pie";

        store.add_reject(url).unwrap();
        store.add_imported(url).unwrap();
        assert!(store.is_imported(url));
        assert!(!store.is_rejected(url));
        assert!(store.retry_attempts(url).is_none());

        store.add_retry(url, "HTTP 503", true).unwrap();
        assert!(!store.is_imported(url));
        assert_eq!(store.retry_attempts(url), Some(1));

        store.add_reject(url).unwrap();
        assert!(store.is_rejected(url));
        assert!(!store.is_imported(url));
        assert!(store.retry_attempts(url).is_none());
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        fs::write(dir.path().join(IMPORTED_FILE), "{not json").unwrap();

        let mut store = Store::open(&config).unwrap();
        assert_eq!(store.imported_count(), 0);
        store.add_imported("https://example.com/a").unwrap();
        store.flush().unwrap();

        let reopened = Store::open(&config).unwrap();
        assert!(reopened.is_imported("https://example.com/a"));
    }

    #[test]
    fn sitemap_cache_expires() {
        let dir = TempDir::new().unwrap();

        let mut fresh = Store::open(&test_config(&dir)).unwrap();
        fresh
            .cache_sitemap("https://example.com", "https://example.com/sitemap.xml", vec![
                "https://example.com/r/1".to_string(),
            ])
            .unwrap();
        assert!(fresh.get_cached_sitemap("https://example.com").is_some());

        let mut expired_config = test_config(&dir);
        expired_config.cache_expiry_days = 0;
        let mut store = Store::open(&expired_config).unwrap();
        store
            .cache_sitemap("https://example.com", "https://example.com/sitemap.xml", vec![])
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(store.get_cached_sitemap("https://example.com").is_none());
    }

    #[test]
    fn auto_flush_after_threshold() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let mut store = Store::open(&config).unwrap();
        for i in 0..FLUSH_THRESHOLD {
            store.add_reject(&format!("https://example.com/r/{i}")).unwrap();
        }
        // No explicit flush: the threshold wrote the files.
        let reopened = Store::open(&config).unwrap();
        assert_eq!(reopened.reject_count(), FLUSH_THRESHOLD);
    }

    #[test]
    fn seen_covers_all_three_sets() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(&test_config(&dir)).unwrap();
        store.add_imported("https://example.com/a").unwrap();
        store.add_reject("https://example.com/b").unwrap();
        store.add_retry("https://example.com/c", "Timeout", false).unwrap();
        assert!(store.seen("https://example.com/a"));
        assert!(store.seen("https://example.com/b"));
        assert!(store.seen("https://example.com/c"));
        assert!(!store.seen("https://example.com/d"));
    }
}
