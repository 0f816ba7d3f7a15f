//! Cancellation and wait limits for lock acquisition

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default interval at which a blocked acquisition re-checks its token
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// A shared flag an upstream caller flips to abandon pending lock waits
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// How long, and under what signal, an acquisition may wait
#[derive(Debug, Clone)]
pub struct Acquire {
    pub cancel: Option<CancelToken>,
    pub timeout: Option<Duration>,
    pub poll_interval: Duration,
}

impl Default for Acquire {
    fn default() -> Self {
        Self {
            cancel: None,
            timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl Acquire {
    /// Wait until granted
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(CancelToken::is_cancelled).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let acquire = Acquire::new().with_cancel(token.clone());
        assert!(!acquire.is_cancelled());
        token.cancel();
        assert!(acquire.is_cancelled());
    }

    #[test]
    fn test_poll_interval_has_floor() {
        let acquire = Acquire::new().with_poll_interval(Duration::ZERO);
        assert_eq!(acquire.poll_interval, Duration::from_millis(1));
    }
}
