//! Per-client request throttling for the service socket

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::ClientId;

/// Fixed-window token bucket, one bucket per connected client
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    window: Duration,
    buckets: HashMap<ClientId, Bucket>,
}

#[derive(Debug)]
struct Bucket {
    remaining: u32,
    window_start: Instant,
}

impl RateLimiter {
    /// Allow up to `max_requests` per `window` for each client
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            capacity: max_requests,
            window,
            buckets: HashMap::new(),
        }
    }

    /// Consume one request for `client_id`. Returns `false` when throttled.
    pub fn check(&mut self, client_id: &ClientId) -> bool {
        self.check_at(client_id, Instant::now())
    }

    fn check_at(&mut self, client_id: &ClientId, now: Instant) -> bool {
        let capacity = self.capacity;
        let bucket = self.buckets.entry(*client_id).or_insert(Bucket {
            remaining: capacity,
            window_start: now,
        });

        if now.duration_since(bucket.window_start) >= self.window {
            bucket.remaining = capacity;
            bucket.window_start = now;
        }

        match bucket.remaining.checked_sub(1) {
            Some(left) => {
                bucket.remaining = left;
                true
            }
            None => false,
        }
    }

    /// Forget a disconnected client
    pub fn remove_client(&mut self, client_id: &ClientId) {
        self.buckets.remove(client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_within_limit() {
        let mut limiter = RateLimiter::new(3, Duration::from_secs(1));
        let client = ClientId::new();

        assert!(limiter.check(&client));
        assert!(limiter.check(&client));
        assert!(limiter.check(&client));
        assert!(!limiter.check(&client));
    }

    #[test]
    fn window_rollover_refills() {
        let mut limiter = RateLimiter::new(1, Duration::from_secs(1));
        let client = ClientId::new();
        let start = Instant::now();

        assert!(limiter.check_at(&client, start));
        assert!(!limiter.check_at(&client, start + Duration::from_millis(500)));
        assert!(limiter.check_at(&client, start + Duration::from_secs(1)));
    }

    #[test]
    fn clients_have_separate_buckets() {
        let mut limiter = RateLimiter::new(1, Duration::from_secs(1));
        let a = ClientId::new();
        let b = ClientId::new();

        assert!(limiter.check(&a));
        assert!(!limiter.check(&a));
        assert!(limiter.check(&b));

        limiter.remove_client(&a);
        assert!(limiter.check(&a));
    }
}
