use crate::RateLimiter;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use parking_lot::Mutex;
use std::{
    cmp::Ordering,
    collections::{BinaryHeap, VecDeque},
    hash::Hash,
    sync::Arc,
};
use tokio::{
    sync::Notify,
    time::{self, Duration, Instant},
};

/// A shared, coalescing work queue.
#[derive(Debug)]
pub struct Queue<T> {
    inner: Arc<Inner<T>>,
}

#[derive(Debug)]
struct Inner<T> {
    state: Mutex<State<T>>,
    notify: Notify,
    limiter: RateLimiter<T>,
}

#[derive(Debug)]
struct State<T> {
    /// Keys ready to be handed to a worker, in admission order.
    ready: VecDeque<T>,

    /// Keys that need processing. A dirty key is either in `ready` or is
    /// currently being processed.
    dirty: HashSet<T>,

    processing: HashSet<T>,

    /// Keys waiting for their admission time. A key may have stale entries in
    /// the heap; only the entry matching `waiting` counts.
    delayed: BinaryHeap<Delayed<T>>,
    waiting: HashMap<T, Instant>,
    seq: u64,

    shutting_down: bool,
}

#[derive(Debug)]
struct Delayed<T> {
    at: Instant,
    seq: u64,
    item: T,
}

// === impl Queue ===

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Queue<T>
where
    T: Clone + Eq + Hash,
{
    /// Creates a queue whose rate-limited admissions are spaced `interval`
    /// apart.
    pub fn new(interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    ready: VecDeque::new(),
                    dirty: HashSet::default(),
                    processing: HashSet::default(),
                    delayed: BinaryHeap::new(),
                    waiting: HashMap::default(),
                    seq: 0,
                    shutting_down: false,
                }),
                notify: Notify::new(),
                limiter: RateLimiter::new(interval),
            }),
        }
    }

    /// Queues `item` for immediate processing.
    pub fn add(&self, item: T) {
        let queued = self.inner.state.lock().insert(item);
        if queued {
            self.inner.notify.notify_one();
        }
    }

    /// Queues `item` once `delay` has elapsed.
    pub fn add_after(&self, item: T, delay: Duration) {
        if delay.is_zero() {
            return self.add(item);
        }

        let at = Instant::now() + delay;
        let mut state = self.inner.state.lock();
        if state.shutting_down {
            return;
        }
        if let Some(waiting) = state.waiting.get(&item) {
            if *waiting <= at {
                return;
            }
        }
        state.seq += 1;
        let seq = state.seq;
        state.waiting.insert(item.clone(), at);
        state.delayed.push(Delayed { at, seq, item });
        drop(state);

        // Wake a worker so that it can wait for the new deadline.
        self.inner.notify.notify_one();
    }

    /// Queues `item` after the delay imposed by the rate limiter.
    pub fn add_rate_limited(&self, item: T) {
        let delay = self.inner.limiter.when(&item);
        self.add_after(item, delay);
    }

    /// Clears the rate limiter's admission count for `item`.
    pub fn forget(&self, item: &T) {
        self.inner.limiter.forget(item);
    }

    pub fn num_requeues(&self, item: &T) -> usize {
        self.inner.limiter.num_requeues(item)
    }

    /// Waits for an item to process.
    ///
    /// The caller must call [`Queue::done`] once it has finished with the item.
    /// Returns `None` once the queue has been shut down and drained.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let mut state = self.inner.state.lock();
                state.promote(Instant::now());
                if let Some(item) = state.ready.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    let more = !state.ready.is_empty();
                    drop(state);
                    if more {
                        self.inner.notify.notify_one();
                    }
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
                state.delayed.peek().map(|d| d.at)
            };

            match deadline {
                Some(at) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Marks `item` as processed, queueing it again if it was added while it
    /// was being processed.
    pub fn done(&self, item: &T) {
        let mut state = self.inner.state.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.ready.push_back(item.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Stops admitting items.
    ///
    /// Items that are already ready are still handed out; delayed items are
    /// dropped. Once the ready items are drained, [`Queue::get`] returns `None`.
    pub fn shut_down(&self) {
        let mut state = self.inner.state.lock();
        state.shutting_down = true;
        state.delayed.clear();
        state.waiting.clear();
        drop(state);
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }

    /// The number of items ready to be processed.
    pub fn len(&self) -> usize {
        self.inner.state.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// === impl State ===

impl<T: Clone + Eq + Hash> State<T> {
    /// Marks `item` dirty, queueing it unless it is already queued or being
    /// processed. Returns true if the item became ready.
    fn insert(&mut self, item: T) -> bool {
        if self.shutting_down || self.dirty.contains(&item) {
            return false;
        }
        self.dirty.insert(item.clone());
        if self.processing.contains(&item) {
            return false;
        }
        self.ready.push_back(item);
        true
    }

    /// Moves delayed items whose admission time has passed to the ready queue.
    fn promote(&mut self, now: Instant) {
        while self.delayed.peek().map(|d| d.at <= now).unwrap_or(false) {
            let Some(Delayed { at, item, .. }) = self.delayed.pop() else {
                break;
            };
            if self.waiting.get(&item) == Some(&at) {
                self.waiting.remove(&item);
                self.insert(item);
            }
        }
    }
}

// === impl Delayed ===

// Ordered so that the earliest admission is at the top of the max-heap.
impl<T> Ord for Delayed<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for Delayed<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for Delayed<T> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl<T> Eq for Delayed<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    const INTERVAL: Duration = Duration::from_millis(250);

    #[tokio::test(start_paused = true)]
    async fn coalesces_queued_items() {
        let queue = Queue::new(INTERVAL);
        queue.add("a");
        queue.add("a");
        queue.add("b");
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.get().await, Some("a"));
        assert_eq!(queue.get().await, Some("b"));
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn requeues_items_added_while_processing() {
        let queue = Queue::new(INTERVAL);
        queue.add("a");
        assert_eq!(queue.get().await, Some("a"));

        // The item isn't handed to another worker while it's being processed.
        queue.add("a");
        queue.add("a");
        assert!(queue.is_empty());
        assert!(timeout(Duration::from_secs(1), queue.get()).await.is_err());

        queue.done(&"a");
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await, Some("a"));
        queue.done(&"a");
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn delays_items() {
        let queue = Queue::new(INTERVAL);
        let start = Instant::now();
        queue.add_after("a", Duration::from_secs(2));
        // An earlier deadline replaces a later one.
        queue.add_after("a", Duration::from_secs(1));
        // A later deadline doesn't replace an earlier one.
        queue.add_after("a", Duration::from_secs(3));
        assert!(queue.is_empty());

        assert_eq!(queue.get().await, Some("a"));
        assert_eq!(start.elapsed(), Duration::from_secs(1));
        queue.done(&"a");

        assert!(timeout(Duration::from_secs(5), queue.get()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn wakes_waiting_workers_for_new_deadlines() {
        let queue = Queue::new(INTERVAL);
        let start = Instant::now();
        queue.add_after("a", Duration::from_secs(10));

        let worker = tokio::spawn({
            let queue = queue.clone();
            async move { queue.get().await }
        });
        tokio::task::yield_now().await;

        queue.add_after("b", Duration::from_secs(1));
        assert_eq!(worker.await.unwrap(), Some("b"));
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn spaces_rate_limited_admissions() {
        let queue = Queue::new(INTERVAL);
        let start = Instant::now();
        queue.add_rate_limited("a");
        queue.add_rate_limited("b");
        queue.add_rate_limited("c");

        assert_eq!(queue.get().await, Some("a"));
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(queue.get().await, Some("b"));
        assert_eq!(start.elapsed(), INTERVAL);
        assert_eq!(queue.get().await, Some("c"));
        assert_eq!(start.elapsed(), INTERVAL * 2);

        assert_eq!(queue.num_requeues(&"a"), 1);
        queue.forget(&"a");
        assert_eq!(queue.num_requeues(&"a"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drains_ready_items_on_shutdown() {
        let queue = Queue::new(INTERVAL);
        queue.add("a");
        queue.add_after("b", Duration::from_secs(1));
        queue.shut_down();
        queue.add("c");

        assert!(queue.is_shutting_down());
        assert_eq!(queue.get().await, Some("a"));
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_wakes_idle_workers() {
        let queue = Queue::<&'static str>::new(INTERVAL);
        let worker = tokio::spawn({
            let queue = queue.clone();
            async move { queue.get().await }
        });
        tokio::task::yield_now().await;

        queue.shut_down();
        assert_eq!(worker.await.unwrap(), None);
    }
}
