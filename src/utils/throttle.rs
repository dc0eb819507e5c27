//! Log throttling
//!
//! Limits how often the same warning is written while a condition persists,
//! e.g. every dropped send while the signaling link is down.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Slot {
    last: Instant,
    suppressed: u64,
}

/// Rate limiter keyed by message kind
///
/// ```rust
/// use fieldcam::utils::LogThrottler;
/// use std::time::Duration;
///
/// let throttler = LogThrottler::new(Duration::from_secs(5));
/// assert!(throttler.should_log("send_dropped"));
/// assert!(!throttler.should_log("send_dropped"));
/// ```
pub struct LogThrottler {
    slots: Mutex<HashMap<String, Slot>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `true` if a message for `key` should be written now.
    pub fn should_log(&self, key: &str) -> bool {
        self.admit(key).is_some()
    }

    /// Like [`should_log`](Self::should_log), but also returns how many
    /// messages for `key` were swallowed since the last admitted one.
    pub fn admit(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        match slots.get_mut(key) {
            Some(slot) if now.duration_since(slot.last) < self.interval => {
                slot.suppressed += 1;
                None
            }
            Some(slot) => {
                let suppressed = slot.suppressed;
                *slot = Slot {
                    last: now,
                    suppressed: 0,
                };
                Some(suppressed)
            }
            None => {
                slots.insert(
                    key.to_string(),
                    Slot {
                        last: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }

    /// Forget `key`, so the next occurrence is logged immediately.
    ///
    /// Call when the condition recovers.
    pub fn clear(&self, key: &str) {
        self.slots.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

impl Default for LogThrottler {
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled `tracing::warn!`
///
/// ```rust
/// use fieldcam::utils::LogThrottler;
/// use fieldcam::warn_throttled;
///
/// let throttler = LogThrottler::default();
/// warn_throttled!(throttler, "link_down", "Link down: {}", "timeout");
/// ```
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if let Some(suppressed) = $throttler.admit($key) {
            tracing::warn!(suppressed, $($arg)*);
        }
    };
}
