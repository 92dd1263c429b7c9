use std::time::Duration;

use tokio::time::Instant;

/// Enforces a minimum delay between outbound API calls. The pipeline is
/// strictly sequential, so a plain `&mut self` is enough; the fetcher wraps
/// this in a mutex to share it across retries.
pub struct RateLimiter {
    interval: Duration,
    last_turn: Option<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        RateLimiter {
            interval,
            last_turn: None,
        }
    }

    /// Blocks until at least the configured interval has passed since the
    /// previous turn. The first turn is free.
    pub async fn wait_turn(&mut self) {
        if let Some(last) = self.last_turn {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                tokio::time::sleep(self.interval - elapsed).await;
            }
        }
        self.last_turn = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_turn_is_immediate() {
        let mut limiter = RateLimiter::new(Duration::from_secs(5));
        let start = Instant::now();
        limiter.wait_turn().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_turns_are_spaced_by_the_interval() {
        let interval = Duration::from_millis(1200);
        let mut limiter = RateLimiter::new(interval);
        let start = Instant::now();

        limiter.wait_turn().await;
        limiter.wait_turn().await;
        limiter.wait_turn().await;

        assert!(start.elapsed() >= interval * 2);
        assert!(start.elapsed() < interval * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_time_counts_toward_the_interval() {
        let interval = Duration::from_millis(1000);
        let mut limiter = RateLimiter::new(interval);

        limiter.wait_turn().await;
        tokio::time::sleep(Duration::from_millis(400)).await;

        let before = Instant::now();
        limiter.wait_turn().await;
        assert_eq!(before.elapsed(), Duration::from_millis(600));
    }
}
