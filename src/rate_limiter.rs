use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Token-bucket limiter guarding how often a single instance may refresh its
/// connection info. Waiters are served strictly in arrival order.
pub struct RateLimiter {
    inner: Mutex<Inner>,
    next_ticket: AtomicU64,
    serving: AtomicU64,
}

struct Inner {
    tokens: u64,
    capacity: u64,
    rate: f64,
    last_refill: Instant,
}

const POLL_INTERVAL: Duration = Duration::from_millis(5);

impl RateLimiter {
    /// `capacity` is the maximum number of tokens the bucket can hold;
    /// `rate` is the number of tokens added per second.
    pub fn new(capacity: u64, rate: f64) -> Self {
        RateLimiter {
            inner: Mutex::new(Inner {
                tokens: capacity,
                capacity,
                rate,
                last_refill: Instant::now(),
            }),
            next_ticket: AtomicU64::new(0),
            serving: AtomicU64::new(0),
        }
    }

    /// Blocks until a token is available, consuming it. Callers queue in
    /// FIFO order; a caller that never receives a token because a later
    /// operation fails does not give its token back to anyone else, since
    /// the token was already spent at acquire time.
    pub async fn acquire(&self) {
        let my_ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        loop {
            if self.serving.load(Ordering::SeqCst) == my_ticket {
                let mut inner = self.inner.lock().unwrap();
                inner.refill(Instant::now());
                if inner.tokens >= 1 {
                    inner.tokens -= 1;
                    drop(inner);
                    self.serving.fetch_add(1, Ordering::SeqCst);
                    return;
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

impl Inner {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        let added = (elapsed * self.rate).floor() as u64;
        if added > 0 {
            self.tokens = (self.tokens + added).min(self.capacity);
            self.last_refill = now;
        }
    }
}
