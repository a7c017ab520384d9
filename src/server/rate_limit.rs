//! Fixed-window request limiter, keyed by client IP
//!
//! An explicitly constructed instance owned by the server state. The
//! counter for an IP resets when its window elapses; requests past the
//! per-window maximum are rejected with `Error::RateLimited` upstream.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

#[derive(Debug)]
struct Window {
    started_at: DateTime<Utc>,
    count: u32,
}

#[derive(Debug)]
pub struct FixedWindowLimiter {
    windows: Mutex<HashMap<IpAddr, Window>>,
    window: Duration,
    max_requests: u32,
}

impl FixedWindowLimiter {
    pub fn new(window_secs: i64, max_requests: u32) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            window: Duration::seconds(window_secs),
            max_requests,
        }
    }

    /// Record a request from `ip`. Returns false when the window budget is
    /// exhausted.
    pub fn check(&self, ip: IpAddr) -> bool {
        self.check_at(ip, Utc::now())
    }

    fn check_at(&self, ip: IpAddr, now: DateTime<Utc>) -> bool {
        let mut windows = self.windows.lock().unwrap();

        // Drop every expired window, not just the caller's, so idle IPs do
        // not accumulate in the map.
        windows.retain(|_, window| now - window.started_at < self.window);

        let window = windows.entry(ip).or_insert(Window {
            started_at: now,
            count: 0,
        });

        if window.count >= self.max_requests {
            return false;
        }
        window.count += 1;
        true
    }

    #[cfg(test)]
    fn tracked_ips(&self) -> usize {
        self.windows.lock().unwrap().len()
    }
}
