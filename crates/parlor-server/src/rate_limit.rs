use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::ConnectInfo,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use parlor_shared::constants::{SEND_BURST_CAPACITY, SEND_WINDOW_SECS};

// ---------------------------------------------------------------------------
// Sliding window
// ---------------------------------------------------------------------------

/// Sliding-window admission control keyed by `K`.
///
/// Each key keeps the instants of its admissions inside the trailing window.
/// A call is admitted while fewer than `capacity` admissions remain after
/// pruning; rejected calls are not recorded. Buckets never hold more than
/// `capacity` entries.
#[derive(Debug)]
pub struct SlidingWindowLimiter<K> {
    buckets: HashMap<K, VecDeque<Instant>>,
    window: Duration,
    capacity: usize,
}

impl<K: Eq + Hash> SlidingWindowLimiter<K> {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            buckets: HashMap::new(),
            window,
            capacity,
        }
    }

    /// Decide whether the action keyed by `key` may proceed at `now`.
    pub fn admit(&mut self, key: K, now: Instant) -> bool {
        let window = self.window;
        let bucket = self.buckets.entry(key).or_default();

        while let Some(oldest) = bucket.front() {
            if now.saturating_duration_since(*oldest) >= window {
                bucket.pop_front();
            } else {
                break;
            }
        }

        if bucket.len() >= self.capacity {
            return false;
        }

        bucket.push_back(now);
        true
    }

    /// Drop every bucket whose newest admission has left the window.
    /// Returns how many buckets were evicted.
    pub fn purge_idle(&mut self, now: Instant) -> usize {
        let before = self.buckets.len();
        let window = self.window;
        self.buckets.retain(|_, bucket| {
            bucket
                .back()
                .is_some_and(|newest| now.saturating_duration_since(*newest) < window)
        });
        before - self.buckets.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }
}

impl<K: Eq + Hash> Default for SlidingWindowLimiter<K> {
    /// The relay's message budget: 5 admissions per 10 seconds.
    fn default() -> Self {
        Self::new(Duration::from_secs(SEND_WINDOW_SECS), SEND_BURST_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Per-IP HTTP limiter
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct HttpRateLimiter {
    inner: Arc<Mutex<SlidingWindowLimiter<IpAddr>>>,
}

impl HttpRateLimiter {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SlidingWindowLimiter::new(window, capacity))),
        }
    }

    pub async fn check(&self, ip: IpAddr) -> bool {
        self.inner.lock().await.admit(ip, Instant::now())
    }

    pub async fn purge_stale(&self) {
        let removed = self.inner.lock().await.purge_idle(Instant::now());
        if removed > 0 {
            debug!(removed, "Purged idle HTTP rate-limit buckets");
        }
    }
}

pub async fn rate_limit_middleware(
    axum::extract::State(limiter): axum::extract::State<HttpRateLimiter>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let ip = extract_client_ip(&req);

    if let Some(ip) = ip {
        if !limiter.check(ip).await {
            warn!(ip = %ip, "Rate limit exceeded");
            return Err(StatusCode::TOO_MANY_REQUESTS);
        }
    }

    Ok(next.run(req).await)
}

/// Try ConnectInfo first, then X-Forwarded-For, then X-Real-IP.
fn extract_client_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    if let Some(connect_info) = req.extensions().get::<ConnectInfo<std::net::SocketAddr>>() {
        return Some(connect_info.0.ip());
    }

    if let Some(forwarded) = req.headers().get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(first) = value.split(',').next() {
                if let Ok(ip) = first.trim().parse::<IpAddr>() {
                    return Some(ip);
                }
            }
        }
    }

    if let Some(real_ip) = req.headers().get("x-real-ip") {
        if let Ok(value) = real_ip.to_str() {
            if let Ok(ip) = value.trim().parse::<IpAddr>() {
                return Some(ip);
            }
        }
    }

    None
}
