//! HTTP client trait and implementations.

use std::borrow::Cow;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::FetchError;

/// A completed HTTP exchange.
///
/// `url` is the final URL after redirects, which discovery relies on when a
/// well-known sitemap path bounces to the real location.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub url: String,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as text, replacing invalid UTF-8 rather than failing. Recipe
    /// sites serve enough broken encodings that lossy is the right call.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Trait for HTTP clients, enabling mockability in tests.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse, FetchError>;

    async fn head(&self, url: &str, timeout: Duration) -> Result<HttpResponse, FetchError>;

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<HttpResponse, FetchError>;
}

/// Configuration for [`WebClient`].
#[derive(Clone)]
pub struct WebClientBuilder {
    timeout: Duration,
    user_agent: String,
    bearer_token: Option<String>,
}

impl Default for WebClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WebClientBuilder {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!(
                "Mozilla/5.0 (compatible; Dredger/{})",
                env!("CARGO_PKG_VERSION")
            ),
            bearer_token: None,
        }
    }

    /// Set the fallback timeout used when a call-site timeout is not
    /// enforced by reqwest (connection setup etc.).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Attach a bearer token to every request from this client.
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn build(self) -> Result<WebClient, reqwest::Error> {
        let inner = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(&self.user_agent)
            .build()?;
        Ok(WebClient {
            inner,
            bearer_token: self.bearer_token,
        })
    }
}

/// Production HTTP client backed by reqwest.
///
/// Redirects are followed (the final URL lands in [`HttpResponse::url`])
/// and gzip content encoding is decompressed transparently.
pub struct WebClient {
    inner: reqwest::Client,
    bearer_token: Option<String>,
}

impl WebClient {
    pub fn builder() -> WebClientBuilder {
        WebClientBuilder::new()
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<HttpResponse, FetchError> {
        let mut request = request;
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let body = response.bytes().await?.to_vec();
        Ok(HttpResponse { status, url, body })
    }
}

#[async_trait]
impl HttpClient for WebClient {
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse, FetchError> {
        self.execute(self.inner.get(url).timeout(timeout)).await
    }

    async fn head(&self, url: &str, timeout: Duration) -> Result<HttpResponse, FetchError> {
        self.execute(self.inner.head(url).timeout(timeout)).await
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<HttpResponse, FetchError> {
        self.execute(self.inner.post(url).timeout(timeout).json(body))
            .await
    }
}

/// Mock response for testing.
#[derive(Clone)]
pub enum MockResponse {
    /// 200 with the given body.
    Html(String),
    /// 200 with a raw byte body, e.g. a gzipped sitemap.
    Bytes(Vec<u8>),
    /// Explicit status code with the given body.
    Status(u16, String),
    /// 200 served from a different final URL, as after a redirect.
    Redirected { final_url: String, body: String },
    /// Simulated request timeout.
    Timeout,
    /// Simulated connection failure.
    ConnectionError(String),
}

impl MockResponse {
    fn to_result(&self, requested: &str) -> Result<HttpResponse, FetchError> {
        match self {
            MockResponse::Html(body) => Ok(HttpResponse {
                status: 200,
                url: requested.to_string(),
                body: body.clone().into_bytes(),
            }),
            MockResponse::Bytes(body) => Ok(HttpResponse {
                status: 200,
                url: requested.to_string(),
                body: body.clone(),
            }),
            MockResponse::Status(status, body) => Ok(HttpResponse {
                status: *status,
                url: requested.to_string(),
                body: body.clone().into_bytes(),
            }),
            MockResponse::Redirected { final_url, body } => Ok(HttpResponse {
                status: 200,
                url: final_url.clone(),
                body: body.clone().into_bytes(),
            }),
            MockResponse::Timeout => Err(FetchError::Timeout(format!(
                "simulated timeout for {requested}"
            ))),
            MockResponse::ConnectionError(msg) => Err(FetchError::Connect(msg.clone())),
        }
    }
}

/// Mock HTTP client for testing.
///
/// GET responses are keyed by exact URL. HEAD falls back to the GET map
/// when no HEAD-specific response is registered. POST responses form a
/// per-URL queue; the last entry repeats once the queue drains. Every POST
/// body is recorded for assertions.
pub struct MockClient {
    responses: HashMap<String, MockResponse>,
    head_responses: HashMap<String, MockResponse>,
    post_responses: Mutex<HashMap<String, VecDeque<MockResponse>>>,
    posts: Mutex<Vec<(String, serde_json::Value)>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            head_responses: HashMap::new(),
            post_responses: Mutex::new(HashMap::new()),
            posts: Mutex::new(Vec::new()),
        }
    }

    /// Add a GET response for a URL.
    pub fn with_response(mut self, url: &str, response: MockResponse) -> Self {
        self.responses.insert(url.to_string(), response);
        self
    }

    /// Add a 200 HTML GET response for a URL.
    pub fn with_html(self, url: &str, html: &str) -> Self {
        self.with_response(url, MockResponse::Html(html.to_string()))
    }

    /// Add a 200 GET response with a raw byte body.
    pub fn with_bytes(self, url: &str, bytes: Vec<u8>) -> Self {
        self.with_response(url, MockResponse::Bytes(bytes))
    }

    /// Add a GET response with an explicit status code.
    pub fn with_status(self, url: &str, status: u16, body: &str) -> Self {
        self.with_response(url, MockResponse::Status(status, body.to_string()))
    }

    /// Simulate a GET timeout for a URL.
    pub fn with_timeout(self, url: &str) -> Self {
        self.with_response(url, MockResponse::Timeout)
    }

    /// Simulate a GET connection failure for a URL.
    pub fn with_connection_error(self, url: &str, message: &str) -> Self {
        self.with_response(url, MockResponse::ConnectionError(message.to_string()))
    }

    /// Add a HEAD-specific response for a URL.
    pub fn with_head(mut self, url: &str, response: MockResponse) -> Self {
        self.head_responses.insert(url.to_string(), response);
        self
    }

    /// Queue a POST response for a URL.
    pub fn with_post(self, url: &str, response: MockResponse) -> Self {
        {
            let mut posts = self
                .post_responses
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            posts.entry(url.to_string()).or_default().push_back(response);
        }
        self
    }

    /// All POST bodies sent through this client, in order.
    pub fn recorded_posts(&self) -> Vec<(String, serde_json::Value)> {
        self.posts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for MockClient {
    async fn get(&self, url: &str, _timeout: Duration) -> Result<HttpResponse, FetchError> {
        match self.responses.get(url) {
            Some(response) => response.to_result(url),
            None => Err(FetchError::Connect(format!(
                "No mock response for URL: {url}"
            ))),
        }
    }

    async fn head(&self, url: &str, _timeout: Duration) -> Result<HttpResponse, FetchError> {
        match self.head_responses.get(url).or_else(|| self.responses.get(url)) {
            Some(response) => response.to_result(url),
            None => Err(FetchError::Connect(format!(
                "No mock response for URL: {url}"
            ))),
        }
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        _timeout: Duration,
    ) -> Result<HttpResponse, FetchError> {
        self.posts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((url.to_string(), body.clone()));

        let mut queues = self
            .post_responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let response = match queues.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        match response {
            Some(response) => response.to_result(url),
            None => Err(FetchError::Connect(format!(
                "No mock response for URL: {url}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn mock_serves_canned_html() {
        let client = MockClient::new().with_html("https://example.com/a", "<html></html>");
        let response = client.get("https://example.com/a", TIMEOUT).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.url, "https://example.com/a");
        assert_eq!(response.text(), "<html></html>");
    }

    #[tokio::test]
    async fn head_falls_back_to_get_map() {
        let client = MockClient::new()
            .with_html("https://example.com/sitemap.xml", "<urlset/>")
            .with_head(
                "https://example.com/other.xml",
                MockResponse::Status(405, String::new()),
            );
        let fallback = client
            .head("https://example.com/sitemap.xml", TIMEOUT)
            .await
            .unwrap();
        assert_eq!(fallback.status, 200);
        let explicit = client
            .head("https://example.com/other.xml", TIMEOUT)
            .await
            .unwrap();
        assert_eq!(explicit.status, 405);
    }

    #[tokio::test]
    async fn post_queue_pops_in_order_and_last_repeats() {
        let client = MockClient::new()
            .with_post("https://api/x", MockResponse::Status(503, String::new()))
            .with_post("https://api/x", MockResponse::Status(201, "{}".to_string()));
        let body = serde_json::json!({"url": "https://example.com/r"});
        assert_eq!(
            client.post_json("https://api/x", &body, TIMEOUT).await.unwrap().status,
            503
        );
        assert_eq!(
            client.post_json("https://api/x", &body, TIMEOUT).await.unwrap().status,
            201
        );
        assert_eq!(
            client.post_json("https://api/x", &body, TIMEOUT).await.unwrap().status,
            201
        );
        assert_eq!(client.recorded_posts().len(), 3);
    }

    #[tokio::test]
    async fn missing_mock_is_a_connection_error() {
        let client = MockClient::new();
        let err = client.get("https://nowhere", TIMEOUT).await.unwrap_err();
        assert!(matches!(err, FetchError::Connect(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn simulated_timeout_maps_to_timeout_error() {
        let client = MockClient::new().with_timeout("https://slow.example.com");
        let err = client.get("https://slow.example.com", TIMEOUT).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout(_)));
        assert!(err.is_transient());
    }
}
