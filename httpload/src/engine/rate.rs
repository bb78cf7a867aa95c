use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{Instant, sleep_until};

/// Global token bucket shared by all workers.
///
/// The bucket is kept in its "theoretical arrival time" form:
/// instead of a floating token count it tracks the instant at which
/// the bucket would be full again. Every admission reserves the next
/// slot and moves that instant one emission interval forward,
/// so concurrent callers are served in reservation order and a caller
/// only ever waits for the slots reserved before its own.
///
/// A rate of `0` means unlimited: admission is bounded by concurrency only.
#[derive(Debug)]
pub struct RateController {
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    rate: u32,
    burst_size: u32,
    /// Time between two admissions at the configured rate,
    /// rounded up so that `rate` slots never fit in less than a second.
    interval: Duration,
    /// Instant at which all reserved slots are consumed.
    tat: Instant,
    /// Bumped on every reset, invalidates reservations still waiting.
    generation: u64,
}

impl Bucket {
    fn reserve(&mut self, now: Instant) -> Instant {
        if self.rate == 0 {
            return now;
        }

        let tolerance = self.interval * self.burst_size.saturating_sub(1);
        let tat = self.tat.max(now);
        let admit_at = tat.checked_sub(tolerance).unwrap_or(now).max(now);

        self.tat = tat + self.interval;
        admit_at
    }
}

fn emission_interval(rate: u32) -> Duration {
    if rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(1_000_000_000u64.div_ceil(u64::from(rate)))
}

impl RateController {
    pub fn new(rate: u32, burst_size: u32) -> Self {
        Self {
            bucket: Mutex::new(Bucket {
                rate,
                burst_size: burst_size.max(1),
                interval: emission_interval(rate),
                tat: Instant::now(),
                generation: 0,
            }),
        }
    }

    #[cfg(test)]
    pub fn unlimited() -> Self {
        Self::new(0, 1)
    }

    /// Current ceiling in requests per second (0 = unlimited).
    #[cfg(test)]
    pub fn rate(&self) -> u32 {
        self.bucket.lock().rate
    }

    /// Wait until the next request is allowed to start.
    ///
    /// A reservation made before a [`Self::reset`] is given up
    /// and taken again from the fresh bucket.
    pub async fn admit(&self) {
        loop {
            let now = Instant::now();
            let (admit_at, generation) = {
                let mut bucket = self.bucket.lock();
                (bucket.reserve(now), bucket.generation)
            };
            if admit_at <= now {
                return;
            }

            sleep_until(admit_at).await;
            if self.bucket.lock().generation == generation {
                return;
            }
        }
    }

    /// Reserve the next admission slot, returning when it opens.
    #[cfg(test)]
    fn reserve_at(&self, now: Instant) -> Instant {
        self.bucket.lock().reserve(now)
    }

    /// Change the ceiling for every admission reserved from now on.
    ///
    /// Slots reserved before the change keep their time.
    pub fn set_rate(&self, rate: u32) {
        let mut bucket = self.bucket.lock();
        bucket.rate = rate;
        bucket.interval = emission_interval(rate);
    }

    /// Start a fresh (full) bucket at the given ceiling,
    /// used at stage boundaries.
    pub fn reset(&self, rate: u32) {
        self.set_rate(rate);
        let mut bucket = self.bucket.lock();
        bucket.tat = Instant::now();
        bucket.generation += 1;
    }
}
