use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A candidate recipe URL pulled from a sitemap.
///
/// Identity is the URL alone; priority only orders candidates within a
/// scan and never distinguishes two entries for the same page.
#[derive(Debug, Clone)]
pub struct RecipeCandidate {
    pub url: String,
    pub priority: i32,
}

impl RecipeCandidate {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            priority: 0,
        }
    }
}

impl PartialEq for RecipeCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for RecipeCandidate {}

impl std::hash::Hash for RecipeCandidate {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.url.hash(state);
    }
}

/// Outcome of verifying one candidate page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject { reason: String, transient: bool },
}

impl Verdict {
    /// Permanent rejection.
    pub fn reject(reason: impl Into<String>) -> Self {
        Verdict::Reject {
            reason: reason.into(),
            transient: false,
        }
    }

    /// Rejection worth retrying in a later run.
    pub fn reject_transient(reason: impl Into<String>) -> Self {
        Verdict::Reject {
            reason: reason.into(),
            transient: true,
        }
    }

    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }
}

/// Outcome of one import attempt. Failures carry a reason and whether the
/// attempt is worth repeating later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOutcome {
    pub imported: bool,
    pub error: Option<String>,
    pub transient: bool,
}

impl ImportOutcome {
    pub fn success() -> Self {
        Self {
            imported: true,
            error: None,
            transient: false,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            imported: false,
            error: Some(error.into()),
            transient: false,
        }
    }

    pub fn failure_transient(error: impl Into<String>) -> Self {
        Self {
            imported: false,
            error: Some(error.into()),
            transient: true,
        }
    }
}

/// One entry in the retry queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryEntry {
    pub reason: String,
    pub attempts: u32,
    pub last_attempt: DateTime<Utc>,
}

/// Cached sitemap scan for one site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSitemap {
    pub sitemap_url: String,
    pub urls: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Per-site counters for one run, persisted in `stats.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteStats {
    pub recipes_found: usize,
    pub recipes_imported: usize,
    pub recipes_rejected: usize,
    pub errors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
}
