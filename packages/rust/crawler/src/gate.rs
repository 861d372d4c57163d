//! Global politeness gate.
//!
//! One gate instance is shared by every worker of a run, so the configured
//! delay is a property of the whole run rather than of each worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use tracing::trace;

use tagcrawl_shared::DelayWindow;

/// Serializes outbound requests with a randomized spacing drawn from a
/// [`DelayWindow`].
#[derive(Debug)]
pub struct PolitenessGate {
    window: DelayWindow,
    /// Instant of the last release. Held across the sleep so that callers
    /// are released one at a time.
    last_release: Mutex<Option<Instant>>,
    releases: AtomicU64,
}

impl PolitenessGate {
    pub fn new(window: DelayWindow) -> Self {
        Self {
            window,
            last_release: Mutex::new(None),
            releases: AtomicU64::new(0),
        }
    }

    /// Number of releases so far.
    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::Relaxed)
    }

    /// Block until a freshly drawn delay has elapsed since the previous
    /// release, then release the caller. The first release is immediate.
    ///
    /// Returns how long the caller actually slept (lock contention excluded).
    pub async fn wait(&self) -> Duration {
        let mut last = self.last_release.lock().await;
        let delay = self.draw_delay();

        let slept = match *last {
            Some(prev) => {
                let deadline = prev + delay;
                let now = Instant::now();
                if deadline > now {
                    sleep_until(deadline).await;
                    deadline - now
                } else {
                    Duration::ZERO
                }
            }
            None => Duration::ZERO,
        };

        *last = Some(Instant::now());
        self.releases.fetch_add(1, Ordering::Relaxed);
        trace!(delay_ms = delay.as_millis() as u64, slept_ms = slept.as_millis() as u64, "gate released");
        slept
    }

    fn draw_delay(&self) -> Duration {
        let (min, max) = (self.window.min_secs(), self.window.max_secs());
        if max <= min {
            return Duration::from_secs_f64(min);
        }
        Duration::from_secs_f64(rand::rng().random_range(min..=max))
    }
}
