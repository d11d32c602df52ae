//! Fixed-window rate limiting for the anonymous registration endpoint
//!
//! Registration requires no credentials, so it is the one place an outsider
//! can create server state at will. Each client gets a counting window; once
//! the count is spent, further requests are refused until the window rolls
//! over. State lives in [`AppState`](crate::state::AppState), not in a
//! process-wide global, so tests and multiple servers in one process stay
//! independent.

use axum::http::HeaderMap;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Prune stale windows once the map grows past this many clients
const MAX_TRACKED_CLIENTS: usize = 10_000;

/// Per-client request count within the current window
#[derive(Debug)]
struct Bucket {
    count: u32,
    window_start: Instant,
}

/// Fixed-window request counter keyed by client address
pub struct RateLimiter {
    /// Requests allowed per window
    max_per_window: u32,
    /// Window length
    window: Duration,
    /// Open windows by client key
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    /// Create a limiter allowing `max_per_window` requests per `window`
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Record one request for `key`
    ///
    /// Returns `false` when the client has spent its window; the request
    /// should be refused without touching any store.
    pub async fn check(&self, key: &str) -> bool {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();

        if buckets.len() > MAX_TRACKED_CLIENTS {
            let window = self.window;
            buckets.retain(|_, bucket| now.duration_since(bucket.window_start) <= window);
        }

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            count: 0,
            window_start: now,
        });

        if now.duration_since(bucket.window_start) > self.window {
            bucket.count = 0;
            bucket.window_start = now;
        }

        if bucket.count >= self.max_per_window {
            return false;
        }

        bucket.count += 1;
        true
    }
}

/// Key identifying the client behind a request
///
/// Prefers the first `x-forwarded-for` hop (the server normally sits behind
/// the dashboard's reverse proxy), then the socket peer address.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_is_allowed_then_denied() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));

        for _ in 0..3 {
            assert!(limiter.check("10.0.0.1").await);
        }
        assert!(!limiter.check("10.0.0.1").await);
    }

    #[tokio::test]
    async fn test_clients_are_counted_separately() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));

        assert!(limiter.check("10.0.0.1").await);
        assert!(limiter.check("10.0.0.2").await);
        assert!(!limiter.check("10.0.0.1").await);
    }

    #[tokio::test]
    async fn test_window_rolls_over() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20));

        assert!(limiter.check("10.0.0.1").await);
        assert!(!limiter.check("10.0.0.1").await);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(limiter.check("10.0.0.1").await);
    }

    #[test]
    fn test_client_key_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        let peer: SocketAddr = "127.0.0.1:9999".parse().unwrap();

        assert_eq!(client_key(&headers, Some(peer)), "203.0.113.9");
    }

    #[test]
    fn test_client_key_falls_back_to_peer_address() {
        let headers = HeaderMap::new();
        let peer: SocketAddr = "192.0.2.4:51000".parse().unwrap();

        assert_eq!(client_key(&headers, Some(peer)), "192.0.2.4");
        assert_eq!(client_key(&headers, None), "unknown");
    }
}
