use tokio::sync::Mutex;
use tokio::time::{sleep_until, Duration, Instant};

/// Spaces outbound requests by at least `min_interval`, whichever task issues
/// them. The lock is held across the wait so request issuance is serialized.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits until a request may be issued and records its issue time.
    pub async fn acquire(&self) -> Instant {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.min_interval;
            if ready_at > Instant::now() {
                log::trace!("[RATE] waiting {:?}", ready_at - Instant::now());
                sleep_until(ready_at).await;
            }
        }
        let issued = Instant::now();
        *last = Some(issued);
        issued
    }
}
