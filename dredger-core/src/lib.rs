pub mod config;
pub mod error;
pub mod http;
pub mod import;
pub mod language;
pub mod orchestrator;
pub mod sitemap;
pub mod store;
pub mod types;
pub mod urls;
pub mod verify;

pub use config::DredgerConfig;
pub use error::{FetchError, StoreError};
pub use http::{
    HttpClient, HttpResponse, MockClient, MockResponse, RateLimiter, WebClient, WebClientBuilder,
};
pub use import::ImportManager;
pub use orchestrator::{run, RunSummary};
pub use sitemap::SitemapCrawler;
pub use store::Store;
pub use types::{CachedSitemap, ImportOutcome, RecipeCandidate, RetryEntry, SiteStats, Verdict};
pub use urls::{canonicalize_url, domain_of};
pub use verify::RecipeVerifier;
