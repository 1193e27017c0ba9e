// Timer abstraction for retry loops.
//
// The hub connection loop never calls `tokio::time::sleep` directly; it asks
// a `Scheduler`, so tests can observe every scheduled retry.

use std::time::Duration;

use async_trait::async_trait;

/// Default delay between failed hub handshakes.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(5000);

/// Source of delays for retry loops.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Resolve after `delay` has elapsed.
    async fn sleep(&self, delay: Duration);
}

/// Production scheduler backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

// ── ReconnectPolicy ──────────────────────────────────────────────────

/// Hub reconnection policy: a fixed delay after every failed handshake,
/// retried until the connection is stopped. Closed connections reconnect
/// immediately without waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub retry_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}
