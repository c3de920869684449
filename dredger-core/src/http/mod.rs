//! HTTP plumbing shared by the sitemap crawler, the verifier, and the
//! importer.
//!
//! All outgoing requests go through the [`HttpClient`] trait so tests can
//! swap in [`MockClient`] with canned responses.

mod client;
mod rate_limiter;

pub use client::{HttpClient, HttpResponse, MockClient, MockResponse, WebClient, WebClientBuilder};
pub use rate_limiter::RateLimiter;

/// Status codes treated as transient wherever an HTTP status turns into a
/// failure: request timeout, too early, too many requests, the 5xx server
/// family, and Cloudflare's 52x origin errors.
pub const TRANSIENT_HTTP_CODES: &[u16] = &[
    408, 425, 429, 500, 502, 503, 504, 520, 521, 522, 523, 524,
];

/// Whether a failure with this status code is worth retrying later.
pub fn is_transient_status(status: u16) -> bool {
    TRANSIENT_HTTP_CODES.contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_statuses() {
        assert!(is_transient_status(503));
        assert!(is_transient_status(429));
        assert!(is_transient_status(522));
        assert!(!is_transient_status(404));
        assert!(!is_transient_status(200));
        assert!(!is_transient_status(401));
    }
}
