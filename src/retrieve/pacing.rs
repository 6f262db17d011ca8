//! Request pacing for the archive dataportal.
//!
//! Bulk retrievals issue one request per dataset; [`RequestPacer`] enforces
//! a minimum spacing between consecutive requests to the same host and
//! remembers server-mandated delays from `Retry-After` headers.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Maximum honored Retry-After value; larger values are clamped.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

#[derive(Debug)]
struct HostState {
    // None until the first request; the first request is never delayed.
    not_before: Mutex<Option<Instant>>,
}

/// Per-host spacing of consecutive requests.
///
/// Designed to be wrapped in `Arc` and shared across tasks; `DashMap`
/// shards the per-host state so unrelated hosts never contend.
#[derive(Debug)]
pub struct RequestPacer {
    spacing: Duration,
    hosts: DashMap<String, Arc<HostState>>,
}

impl RequestPacer {
    /// Creates a pacer enforcing `spacing` between requests to one host.
    #[must_use]
    pub fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            hosts: DashMap::new(),
        }
    }

    /// Creates a pacer that applies no delays.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Waits until a request to `url`'s host is allowed, then reserves the
    /// next slot.
    pub async fn acquire(&self, url: &str) {
        if self.spacing.is_zero() && self.hosts.is_empty() {
            return;
        }

        let host = host_of(url);
        // Clone the Arc so the DashMap shard lock is released before awaiting.
        let state = self
            .hosts
            .entry(host.clone())
            .or_insert_with(|| {
                Arc::new(HostState {
                    not_before: Mutex::new(None),
                })
            })
            .clone();

        let mut guard = state.not_before.lock().await;
        let now = Instant::now();
        if let Some(not_before) = *guard
            && not_before > now
        {
            let wait = not_before - now;
            debug!(host = %host, wait_ms = wait.as_millis() as u64, "pacing request");
            tokio::time::sleep(wait).await;
        }
        *guard = Some(Instant::now() + self.spacing);
    }

    /// Records a server-mandated delay for `url`'s host (Retry-After).
    pub async fn record_server_delay(&self, url: &str, delay: Duration) {
        let delay = delay.min(MAX_RETRY_AFTER);
        let host = host_of(url);
        let state = self
            .hosts
            .entry(host.clone())
            .or_insert_with(|| {
                Arc::new(HostState {
                    not_before: Mutex::new(None),
                })
            })
            .clone();
        let mut guard = state.not_before.lock().await;
        let candidate = Instant::now() + delay;
        if guard.is_none_or(|existing| candidate > existing) {
            debug!(host = %host, delay_ms = delay.as_millis() as u64, "honoring server delay");
            *guard = Some(candidate);
        }
    }
}

/// Parses a Retry-After header value: either delta-seconds or an HTTP-date.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds).min(MAX_RETRY_AFTER));
    }
    let when = httpdate::parse_http_date(value).ok()?;
    when.duration_since(std::time::SystemTime::now())
        .ok()
        .map(|d| d.min(MAX_RETRY_AFTER))
}

fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}
