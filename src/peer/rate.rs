use std::time::Instant;

/// Sliding-window transfer rate, one bucket per second.
const WINDOW_SECS: usize = 20;

/// Meters bytes over the last [`WINDOW_SECS`] seconds.
///
/// The chokers rank peers by these rates, so the meter must decay:
/// a peer that stopped sending ten seconds ago should not keep its old
/// ranking.
#[derive(Debug, Clone)]
pub struct RateCounter {
    buckets: [u64; WINDOW_SECS],
    epoch: Instant,
    /// Seconds since `epoch` of the most recent sample.
    cursor: u64,
}

impl RateCounter {
    pub fn new(now: Instant) -> Self {
        Self {
            buckets: [0; WINDOW_SECS],
            epoch: now,
            cursor: 0,
        }
    }

    /// Records `bytes` transferred at `now`.
    pub fn record(&mut self, now: Instant, bytes: u64) {
        let second = self.advance_to(now);
        self.buckets[(second % WINDOW_SECS as u64) as usize] += bytes;
    }

    /// Average bytes per second over the window.
    pub fn rate(&mut self, now: Instant) -> u64 {
        self.advance_to(now);
        self.buckets.iter().sum::<u64>() / WINDOW_SECS as u64
    }

    /// Moves the cursor to `now`, zeroing buckets the window slid past.
    fn advance_to(&mut self, now: Instant) -> u64 {
        let second = now.duration_since(self.epoch).as_secs();
        if second > self.cursor {
            let stale = (second - self.cursor).min(WINDOW_SECS as u64);
            for i in 0..stale {
                self.buckets[((self.cursor + 1 + i) % WINDOW_SECS as u64) as usize] = 0;
            }
            self.cursor = second;
        }
        second
    }
}
