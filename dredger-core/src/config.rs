//! Runtime configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::language::normalize_language_code;

/// Default Mealie base URL.
pub const DEFAULT_MEALIE_URL: &str = "http://localhost:9000";

/// Placeholder token shipped in the sample environment file.
pub const PLACEHOLDER_API_TOKEN: &str = "your-token";

/// Default per-domain crawl delay in seconds.
pub const DEFAULT_CRAWL_DELAY_SECS: f64 = 2.0;

/// Default number of recipes to import per site per run.
pub const DEFAULT_TARGET_RECIPES_PER_SITE: usize = 50;

/// Default number of sitemap candidates to consider per site.
pub const DEFAULT_SCAN_DEPTH: usize = 1000;

/// Default sitemap cache lifetime in days.
pub const DEFAULT_CACHE_EXPIRY_DAYS: i64 = 7;

/// Default number of transient failures before a URL is given up on.
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;

/// Default consecutive server-error imports that abort a site.
pub const DEFAULT_SITE_FAILURE_THRESHOLD: u32 = 3;

/// Default Mealie request timeout in seconds.
pub const DEFAULT_IMPORT_TIMEOUT_SECS: u64 = 20;

/// Default confidence floor for statistical language detection.
pub const DEFAULT_LANGUAGE_MIN_CONFIDENCE: f64 = 0.70;

/// Crawler configuration, read once at startup and shared by every
/// component. Command-line flags overlay individual fields after
/// [`DredgerConfig::from_env`].
#[derive(Debug, Clone)]
pub struct DredgerConfig {
    /// Scan and verify without importing.
    pub dry_run: bool,
    /// Stop scanning a site once this many imports succeeded.
    pub target_recipes_per_site: usize,
    /// Maximum sitemap candidates considered per site.
    pub scan_depth: usize,
    /// Whether the Mealie importer is active at all.
    pub mealie_enabled: bool,
    /// Mealie base URL, no trailing slash.
    pub mealie_url: String,
    /// Bearer token for the Mealie API.
    pub mealie_api_token: String,
    /// Timeout for Mealie import and listing requests.
    pub import_timeout: Duration,
    /// Check Mealie's existing recipes before posting new imports.
    pub import_precheck_duplicates: bool,
    /// Concurrent import workers; 1 keeps imports on the control task.
    pub import_workers: usize,
    /// Consecutive HTTP 5xx import failures that abort a site; 0 disables.
    pub site_import_failure_threshold: u32,
    /// Default seconds between requests to the same domain.
    pub crawl_delay: f64,
    /// Honor robots.txt crawl-delay directives.
    pub respect_robots_txt: bool,
    /// Sitemap cache lifetime in days.
    pub cache_expiry_days: i64,
    /// Transient-failure attempts before a URL moves to rejected.
    pub max_retry_attempts: u32,
    /// Primary language subtag to keep, e.g. "en"; empty disables the gate.
    pub target_language: String,
    /// Whether the language gate runs at all.
    pub language_filter_enabled: bool,
    /// Reject pages whose language cannot be determined.
    pub language_detection_strict: bool,
    /// Confidence floor for statistical detection.
    pub language_min_confidence: f64,
    /// Directory holding the JSON store artifacts.
    pub data_dir: PathBuf,
    /// Ignore cached sitemaps for this run. Set by `--no-cache` only.
    pub force_refresh: bool,
    /// User agent for all outbound requests.
    pub user_agent: String,
}

impl Default for DredgerConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            target_recipes_per_site: DEFAULT_TARGET_RECIPES_PER_SITE,
            scan_depth: DEFAULT_SCAN_DEPTH,
            mealie_enabled: true,
            mealie_url: DEFAULT_MEALIE_URL.to_string(),
            mealie_api_token: PLACEHOLDER_API_TOKEN.to_string(),
            import_timeout: Duration::from_secs(DEFAULT_IMPORT_TIMEOUT_SECS),
            import_precheck_duplicates: true,
            import_workers: 1,
            site_import_failure_threshold: DEFAULT_SITE_FAILURE_THRESHOLD,
            crawl_delay: DEFAULT_CRAWL_DELAY_SECS,
            respect_robots_txt: true,
            cache_expiry_days: DEFAULT_CACHE_EXPIRY_DAYS,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            target_language: "en".to_string(),
            language_filter_enabled: true,
            language_detection_strict: true,
            language_min_confidence: DEFAULT_LANGUAGE_MIN_CONFIDENCE,
            data_dir: PathBuf::from("data"),
            force_refresh: false,
            user_agent: format!(
                "Mozilla/5.0 (compatible; Dredger/{})",
                env!("CARGO_PKG_VERSION")
            ),
        }
    }
}

impl DredgerConfig {
    /// Load configuration from environment variables.
    ///
    /// Recognized variables (all optional): `DRY_RUN`,
    /// `TARGET_RECIPES_PER_SITE`, `SCAN_DEPTH`, `MEALIE_ENABLED`,
    /// `MEALIE_URL`, `MEALIE_API_TOKEN`, `MEALIE_IMPORT_TIMEOUT`,
    /// `IMPORT_PRECHECK_DUPLICATES`, `IMPORT_WORKERS`,
    /// `SITE_IMPORT_FAILURE_THRESHOLD`, `CRAWL_DELAY`,
    /// `RESPECT_ROBOTS_TXT`, `CACHE_EXPIRY_DAYS`, `MAX_RETRY_ATTEMPTS`,
    /// `TARGET_LANGUAGE`, `LANGUAGE_FILTER_ENABLED`,
    /// `LANGUAGE_DETECTION_STRICT`, `LANGUAGE_MIN_CONFIDENCE`, `DATA_DIR`.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mealie_url = env_string("MEALIE_URL", &defaults.mealie_url)
            .trim_end_matches('/')
            .to_string();

        let target_language = normalize_language_code(&env_string(
            "TARGET_LANGUAGE",
            &defaults.target_language,
        ))
        .unwrap_or_default();

        Self {
            dry_run: env_bool("DRY_RUN", defaults.dry_run),
            target_recipes_per_site: env_parse(
                "TARGET_RECIPES_PER_SITE",
                defaults.target_recipes_per_site,
            ),
            scan_depth: env_parse("SCAN_DEPTH", defaults.scan_depth),
            mealie_enabled: env_bool("MEALIE_ENABLED", defaults.mealie_enabled),
            mealie_url,
            mealie_api_token: env_string("MEALIE_API_TOKEN", &defaults.mealie_api_token),
            import_timeout: Duration::from_secs(env_parse(
                "MEALIE_IMPORT_TIMEOUT",
                DEFAULT_IMPORT_TIMEOUT_SECS,
            )),
            import_precheck_duplicates: env_bool(
                "IMPORT_PRECHECK_DUPLICATES",
                defaults.import_precheck_duplicates,
            ),
            import_workers: env_parse("IMPORT_WORKERS", defaults.import_workers).max(1),
            site_import_failure_threshold: env_parse(
                "SITE_IMPORT_FAILURE_THRESHOLD",
                defaults.site_import_failure_threshold,
            ),
            crawl_delay: env_parse("CRAWL_DELAY", defaults.crawl_delay),
            respect_robots_txt: env_bool("RESPECT_ROBOTS_TXT", defaults.respect_robots_txt),
            cache_expiry_days: env_parse("CACHE_EXPIRY_DAYS", defaults.cache_expiry_days),
            max_retry_attempts: env_parse("MAX_RETRY_ATTEMPTS", defaults.max_retry_attempts),
            target_language,
            language_filter_enabled: env_bool(
                "LANGUAGE_FILTER_ENABLED",
                defaults.language_filter_enabled,
            ),
            language_detection_strict: env_bool(
                "LANGUAGE_DETECTION_STRICT",
                defaults.language_detection_strict,
            ),
            language_min_confidence: env_parse(
                "LANGUAGE_MIN_CONFIDENCE",
                defaults.language_min_confidence,
            ),
            data_dir: PathBuf::from(env_string(
                "DATA_DIR",
                &defaults.data_dir.to_string_lossy(),
            )),
            force_refresh: false,
            user_agent: defaults.user_agent,
        }
    }

    /// Sanity-check the configuration and return warnings for the common
    /// footguns. Never fatal.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !self.dry_run && !self.mealie_enabled {
            warnings.push(
                "Mealie import is disabled but DRY_RUN is off; verified recipes will be dropped"
                    .to_string(),
            );
        }
        if self.mealie_enabled && !self.dry_run && self.mealie_api_token == PLACEHOLDER_API_TOKEN {
            warnings.push(
                "MEALIE_API_TOKEN looks like a placeholder; imports will fail with HTTP 401"
                    .to_string(),
            );
        }
        warnings
    }
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
