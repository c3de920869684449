//! Per-domain rate limiting with robots.txt crawl-delay support.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;
use texting_robots::Robot;
use tokio::time::sleep;

use crate::config::DredgerConfig;
use crate::http::HttpClient;
use crate::urls::domain_of;

const ROBOTS_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-domain rate limiter to avoid hammering external servers.
///
/// Shared by the control task and the import workers, so both maps are
/// sharded rather than behind one lock.
pub struct RateLimiter {
    client: Arc<dyn HttpClient>,
    default_delay: f64,
    respect_robots: bool,
    user_agent: String,
    /// Effective delay per domain, resolved once per run.
    crawl_delays: DashMap<String, f64>,
    /// Last request time per domain.
    last_request: DashMap<String, Instant>,
}

impl RateLimiter {
    pub fn new(client: Arc<dyn HttpClient>, config: &DredgerConfig) -> Self {
        Self {
            client,
            default_delay: config.crawl_delay,
            respect_robots: config.respect_robots_txt,
            user_agent: config.user_agent.clone(),
            crawl_delays: DashMap::new(),
            last_request: DashMap::new(),
        }
    }

    /// Effective delay for a domain: the site's robots.txt crawl-delay when
    /// it declares one and honoring it is enabled, otherwise the configured
    /// default. Memoized per domain; never fails.
    pub async fn crawl_delay(&self, domain: &str) -> f64 {
        if domain.is_empty() {
            return self.default_delay;
        }
        if let Some(delay) = self.crawl_delays.get(domain) {
            return *delay;
        }

        let delay = if self.respect_robots {
            self.robots_delay(domain)
                .await
                .unwrap_or(self.default_delay)
        } else {
            self.default_delay
        };
        self.crawl_delays.insert(domain.to_string(), delay);
        delay
    }

    async fn robots_delay(&self, domain: &str) -> Option<f64> {
        let robots_url = format!("https://{domain}/robots.txt");
        let response = self.client.get(&robots_url, ROBOTS_TIMEOUT).await.ok()?;
        if response.status != 200 {
            return None;
        }
        let robot = Robot::new(&self.user_agent, &response.body).ok()?;
        let delay = f64::from(robot.delay?);
        tracing::debug!(domain, delay, "using robots.txt crawl-delay");
        Some(delay)
    }

    /// Sleep long enough to honor the domain's delay since our previous
    /// request, jittered so the cadence does not look mechanical, then
    /// record this request.
    pub async fn wait_if_needed(&self, url: &str) {
        let domain = domain_of(url);
        let delay = self.crawl_delay(&domain).await;

        let last = self.last_request.get(&domain).map(|entry| *entry);
        if let Some(last) = last {
            let elapsed = last.elapsed().as_secs_f64();
            if elapsed < delay {
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                sleep(Duration::from_secs_f64((delay - elapsed) * jitter)).await;
            }
        }
        self.last_request.insert(domain, Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::MockClient;

    fn config(crawl_delay: f64, respect_robots: bool) -> DredgerConfig {
        DredgerConfig {
            crawl_delay,
            respect_robots_txt: respect_robots,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn robots_crawl_delay_overrides_default() {
        let client = MockClient::new().with_html(
            "https://example.com/robots.txt",
            "User-agent: *\nCrawl-delay: 7\n",
        );
        let limiter = RateLimiter::new(Arc::new(client), &config(2.0, true));
        assert_eq!(limiter.crawl_delay("example.com").await, 7.0);
        // Memoized: answered again without refetching.
        assert_eq!(limiter.crawl_delay("example.com").await, 7.0);
    }

    #[tokio::test]
    async fn missing_robots_falls_back_to_default() {
        let limiter = RateLimiter::new(Arc::new(MockClient::new()), &config(2.0, true));
        assert_eq!(limiter.crawl_delay("example.com").await, 2.0);
    }

    #[tokio::test]
    async fn robots_ignored_when_disabled() {
        let client = MockClient::new().with_html(
            "https://example.com/robots.txt",
            "User-agent: *\nCrawl-delay: 30\n",
        );
        let limiter = RateLimiter::new(Arc::new(client), &config(0.5, false));
        assert_eq!(limiter.crawl_delay("example.com").await, 0.5);
    }

    #[tokio::test]
    async fn second_request_to_same_domain_waits() {
        let limiter = RateLimiter::new(Arc::new(MockClient::new()), &config(0.05, false));
        limiter.wait_if_needed("https://example.com/a").await;
        let start = Instant::now();
        limiter.wait_if_needed("https://example.com/b").await;
        // Jitter bottoms out at half the remaining delay.
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn different_domains_do_not_block_each_other() {
        let limiter = RateLimiter::new(Arc::new(MockClient::new()), &config(5.0, false));
        limiter.wait_if_needed("https://one.example.com/a").await;
        let start = Instant::now();
        limiter.wait_if_needed("https://two.example.com/a").await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
