use relaycore::{NodeError, RateLimiter, Signal};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Token bucket holding `requests_per_second` permits, refilled once a second.
///
/// Acquiring never blocks; an empty bucket reports `RateLimited`. The refill
/// task stops once the manager is dropped.
pub struct SimpleResourceManager {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl SimpleResourceManager {
    /// Must be called from within a tokio runtime.
    pub fn new(requests_per_second: u32) -> Self {
        let capacity = requests_per_second as usize;
        let permits = Arc::new(Semaphore::new(capacity));
        tokio::spawn(refill(Arc::downgrade(&permits), capacity));
        Self { permits, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl RateLimiter for SimpleResourceManager {
    fn rate_limit(&self, signal: &Signal) -> Result<(), NodeError> {
        match self.permits.try_acquire() {
            Ok(permit) => {
                permit.forget();
                Ok(())
            }
            Err(_) => Err(NodeError::RateLimited(signal.node_id.clone())),
        }
    }
}

async fn refill(permits: Weak<Semaphore>, capacity: usize) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately and the bucket starts full.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(permits) = permits.upgrade() else {
            debug!("rate limiter dropped, stopping refill");
            return;
        };
        let missing = capacity.saturating_sub(permits.available_permits());
        if missing > 0 {
            permits.add_permits(missing);
        }
    }
}
