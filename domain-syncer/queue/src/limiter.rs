use ahash::AHashMap as HashMap;
use parking_lot::Mutex;
use std::hash::Hash;
use tokio::time::{Duration, Instant};

/// Spaces out admissions to a queue.
///
/// All admissions share a single cursor, so a burst of admissions is spread
/// `interval` apart regardless of which keys are admitted. This shapes the
/// total throughput of the queue; it is not a per-key backoff. Per-key
/// admission counts are tracked separately so that callers can bound retries.
#[derive(Debug)]
pub struct RateLimiter<T> {
    interval: Duration,
    state: Mutex<State<T>>,
}

#[derive(Debug)]
struct State<T> {
    /// The time of the most recently scheduled admission.
    cursor: Option<Instant>,
    requeues: HashMap<T, usize>,
}

// === impl RateLimiter ===

impl<T: Clone + Eq + Hash> RateLimiter<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: Mutex::new(State {
                cursor: None,
                requeues: HashMap::default(),
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns how long `item` must wait before it is admitted.
    pub fn when(&self, item: &T) -> Duration {
        self.when_at(item, Instant::now())
    }

    fn when_at(&self, item: &T, now: Instant) -> Duration {
        let mut state = self.state.lock();
        *state.requeues.entry(item.clone()).or_default() += 1;

        match state.cursor {
            // Still within the current burst: admit one interval after the last
            // scheduled admission.
            Some(cursor) if now <= cursor + self.interval => {
                let next = cursor + self.interval;
                state.cursor = Some(next);
                next.saturating_duration_since(now)
            }
            _ => {
                state.cursor = Some(now);
                Duration::ZERO
            }
        }
    }

    /// Clears the admission count of `item`.
    pub fn forget(&self, item: &T) {
        self.state.lock().requeues.remove(item);
    }

    pub fn num_requeues(&self, item: &T) -> usize {
        self.state.lock().requeues.get(item).copied().unwrap_or(0)
    }
}
