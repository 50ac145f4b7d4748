use std::time::Duration;

use rand::Rng;

/// Randomized delay inserted before each provider call so access looks
/// human-paced and stays under provider throttling.
#[derive(Debug, Clone)]
pub struct Pacer {
    min: Duration,
    max: Duration,
}

impl Pacer {
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    /// No delay at all
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Draw the next delay uniformly from `[min, max]`
    pub fn next_delay(&self) -> Duration {
        let min_ms = self.min.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        if min_ms == max_ms {
            return self.min;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
    }

    /// Sleep for a freshly drawn delay and return it
    pub async fn pause(&self) -> Duration {
        let delay = self.next_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        delay
    }
}
