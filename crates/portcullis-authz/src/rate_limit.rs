//! Fixed-window rate limit arithmetic.
//!
//! Storage of the counter lives with the gateway; this module only turns a
//! post-increment count and remaining TTL into a decision.
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    pub window: Duration,
    pub max: u64,
}

impl WindowConfig {
    pub fn new(window: Duration, max: u64) -> Self {
        Self { window, max }
    }

    /// A zero window or a zero maximum disables limiting.
    pub fn is_enabled(&self) -> bool {
        !self.window.is_zero() && self.max > 0
    }

    pub fn decide(&self, count: u64, ttl: Option<Duration>) -> WindowDecision {
        if count <= self.max {
            return WindowDecision::Allow {
                remaining: self.max - count,
            };
        }
        WindowDecision::Reject {
            retry_after: retry_after(ttl, self.window),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowDecision {
    Allow { remaining: u64 },
    Reject { retry_after: Duration },
}

/// Whole seconds until the window resets, never below one.
///
/// Falls back to the full window when the store reports no TTL.
pub fn retry_after(ttl: Option<Duration>, window: Duration) -> Duration {
    let wait = match ttl {
        Some(ttl) if !ttl.is_zero() => ttl,
        _ => window,
    };
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    Duration::from_secs(secs.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_max() {
        let config = WindowConfig::new(Duration::from_secs(60), 3);
        assert_eq!(
            config.decide(1, Some(Duration::from_secs(60))),
            WindowDecision::Allow { remaining: 2 }
        );
        assert_eq!(config.decide(3, None), WindowDecision::Allow { remaining: 0 });
    }

    #[test]
    fn rejects_past_max_with_ttl() {
        let config = WindowConfig::new(Duration::from_secs(60), 3);
        assert_eq!(
            config.decide(4, Some(Duration::from_secs(17))),
            WindowDecision::Reject {
                retry_after: Duration::from_secs(17)
            }
        );
    }

    #[test]
    fn retry_after_falls_back_and_clamps() {
        let window = Duration::from_secs(30);
        assert_eq!(retry_after(None, window), window);
        assert_eq!(retry_after(Some(Duration::ZERO), window), window);
        assert_eq!(
            retry_after(Some(Duration::from_millis(200)), window),
            Duration::from_secs(1)
        );
        assert_eq!(
            retry_after(Some(Duration::from_millis(2_500)), window),
            Duration::from_secs(3)
        );
        assert_eq!(
            retry_after(None, Duration::from_millis(10)),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn disabled_configs() {
        assert!(!WindowConfig::new(Duration::ZERO, 5).is_enabled());
        assert!(!WindowConfig::new(Duration::from_secs(1), 0).is_enabled());
        assert!(WindowConfig::new(Duration::from_secs(1), 1).is_enabled());
    }
}
