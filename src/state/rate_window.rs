use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Smallest `retry_after` handed back on a denial
pub const MIN_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Sliding window of admitted request timestamps for one domain
///
/// Timestamps are kept oldest-first; anything at least `window` old is
/// purged before every decision.
#[derive(Debug)]
pub struct RateWindow {
    max_requests: usize,
    window: Duration,
    admitted: VecDeque<Instant>,
}

impl RateWindow {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1) as usize,
            window,
            admitted: VecDeque::with_capacity(max_requests as usize),
        }
    }

    /// Drops timestamps that have left the window
    pub fn purge(&mut self, now: Instant) {
        while let Some(&oldest) = self.admitted.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
    }

    /// Records a request at `now` if the window has room
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Admitted; `now` is recorded
    /// * `Err(Duration)` - Denied; wait this long before the oldest slot frees up
    pub fn try_admit(&mut self, now: Instant) -> Result<(), Duration> {
        self.purge(now);

        if self.admitted.len() >= self.max_requests {
            return Err(self.time_until_slot(now));
        }

        self.admitted.push_back(now);
        Ok(())
    }

    /// Time until the oldest admitted request leaves the window, floored at `MIN_RETRY_AFTER`
    pub fn time_until_slot(&self, now: Instant) -> Duration {
        self.admitted
            .front()
            .map(|&oldest| (oldest + self.window).saturating_duration_since(now))
            .unwrap_or_default()
            .max(MIN_RETRY_AFTER)
    }

    /// Number of requests currently counted against the window
    pub fn in_window(&self) -> usize {
        self.admitted.len()
    }
}
