//! Sliding-window rate limiter for outbound Realtime Client traffic
//! (§4.4.5). Window is 60s wide; at most 100 requests and 10 MiB may be
//! sent within it. Evict-then-check-then-append on every call, same
//! order the original Python `RateLimit` class used.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const WINDOW: Duration = Duration::from_secs(60);
pub const MAX_REQUESTS: usize = 100;
pub const MAX_BYTES: usize = 10 * 1024 * 1024;

struct Entry {
    at: Instant,
    bytes: usize,
}

/// Tracks recent send events and decides whether a new one of `bytes`
/// size is allowed right now.
pub struct RateLimiter {
    entries: VecDeque<Entry>,
    total_bytes: usize,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            total_bytes: 0,
        }
    }

    fn evict(&mut self, now: Instant) {
        while let Some(front) = self.entries.front() {
            if now.duration_since(front.at) > WINDOW {
                let popped = self.entries.pop_front().expect("front just checked");
                self.total_bytes -= popped.bytes;
            } else {
                break;
            }
        }
    }

    /// Returns whether a send of `bytes` is allowed right now, without
    /// recording it (§4.4.5: the Realtime Client checks before sending).
    pub fn check(&mut self, now: Instant, bytes: usize) -> bool {
        self.evict(now);
        self.entries.len() < MAX_REQUESTS && self.total_bytes + bytes <= MAX_BYTES
    }

    /// Record a send that has just happened. Callers must have already
    /// called `check` and gotten `true`; `record` itself does not
    /// re-validate (mirrors the `reconnecting` style at-most-once
    /// discipline elsewhere in this client: check then commit).
    pub fn record(&mut self, now: Instant, bytes: usize) {
        self.entries.push_back(Entry { at: now, bytes });
        self.total_bytes += bytes;
    }

    pub fn requests_in_window(&mut self, now: Instant) -> usize {
        self.evict(now);
        self.entries.len()
    }

    pub fn bytes_in_window(&mut self, now: Instant) -> usize {
        self.evict(now);
        self.total_bytes
    }
}
