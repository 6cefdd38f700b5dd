//! Event stream processor
//!
//! Producers push activity events into the lock-free ring and never
//! block; one dedicated consumer thread drains it, folds every event
//! into the channel statistics (Count-Min Sketch, exact channel counts,
//! per-minute HyperLogLog buckets) and accumulates a pending batch.
//! Batches are handed to the registered flush callback on the worker
//! pool once they reach `batch_size`, the flush interval elapses, or a
//! flush is requested explicitly.
//!
//! `flush_now` is a synchronous barrier: it returns only after the
//! consumer has dispatched the current batch, every outstanding flush
//! task has completed, and the pipeline has re-derived a quiescent
//! (drained) state.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::pool::WorkerPool;
use crate::ring::RingBuffer;
use crate::sketch::{CountMinSketch, HyperLogLog};

/// Sliding retention horizon for unique-user buckets.
pub const WINDOW_SPAN_SECS: i64 = 3600;
/// Span of one HyperLogLog bucket.
pub const BUCKET_SPAN_SECS: i64 = 60;

const CONSUMER_WAIT: Duration = Duration::from_millis(5);

/// A single user-activity event.
///
/// `timestamp <= 0` means "assign now": the consumer buckets the event
/// under its own wall clock at processing time. The record itself keeps
/// the value the producer supplied.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub event_type: String,
    pub user_id: String,
    pub channel_id: String,
    pub timestamp: i64,
}

/// Callback receiving each flushed batch, invoked on a pool worker.
pub type FlushCallback = Arc<dyn Fn(Vec<Event>) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Ring capacity; rounded up to a power of two. Zero means 1024.
    pub buffer_capacity: usize,
    /// Flush worker threads. Zero means available parallelism.
    pub worker_threads: usize,
    /// Events per flushed batch. Zero means 1.
    pub batch_size: usize,
    /// Idle flush interval. Zero means 1 ms.
    pub flush_interval_ms: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1024,
            worker_threads: 0,
            batch_size: 1,
            flush_interval_ms: 1,
        }
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn bucket_start(timestamp: i64) -> i64 {
    let timestamp = if timestamp <= 0 { now_secs() } else { timestamp };
    (timestamp / BUCKET_SPAN_SECS) * BUCKET_SPAN_SECS
}

struct UserWindow {
    start: i64,
    sketch: HyperLogLog,
}

struct ChannelStats {
    frequency: CountMinSketch,
    counts: HashMap<String, u64>,
    windows: VecDeque<UserWindow>,
}

struct Shared {
    batch_size: usize,
    flush_interval: Duration,

    ring: RingBuffer<Event>,
    pool: WorkerPool,

    callback: Mutex<Option<FlushCallback>>,

    running: AtomicBool,
    total_processed: AtomicU64,
    events_dropped: AtomicU64,

    stats: Mutex<ChannelStats>,
    pending: Mutex<Vec<Event>>,

    data_lock: Mutex<()>,
    data_cv: Condvar,

    flush_requested: AtomicBool,
    flush_lock: Mutex<()>,
    flush_cv: Condvar,

    pending_flush_tasks: AtomicUsize,
    tasks_lock: Mutex<()>,
    tasks_cv: Condvar,

    drained: AtomicBool,
    drain_lock: Mutex<()>,
    drain_cv: Condvar,
}

impl Shared {
    fn consume_loop(self: Arc<Self>) {
        info!("event consumer started");
        let mut last_flush = Instant::now();

        while self.running.load(Ordering::Acquire) || !self.ring.is_empty() {
            if let Some(event) = self.ring.pop() {
                self.update_stats(&event);
                self.total_processed.fetch_add(1, Ordering::Relaxed);

                let reached_batch = {
                    let mut pending = self.pending.lock().unwrap();
                    pending.push(event);
                    pending.len() >= self.batch_size
                };

                if reached_batch {
                    let batch = std::mem::take(&mut *self.pending.lock().unwrap());
                    Self::flush_batch(&self, batch);
                    last_flush = Instant::now();
                    self.notify_idle_state();
                }
                continue;
            }

            let timer_elapsed = {
                let pending = self.pending.lock().unwrap();
                !pending.is_empty() && last_flush.elapsed() >= self.flush_interval
            };

            if timer_elapsed || self.flush_requested.load(Ordering::Acquire) {
                let batch = std::mem::take(&mut *self.pending.lock().unwrap());
                if !batch.is_empty() {
                    Self::flush_batch(&self, batch);
                }
                last_flush = Instant::now();
                self.flush_requested.store(false, Ordering::Release);
                {
                    let _guard = self.flush_lock.lock().unwrap();
                    self.flush_cv.notify_all();
                }
                self.notify_idle_state();
                continue;
            }

            let guard = self.data_lock.lock().unwrap();
            let (guard, _timed_out) = self
                .data_cv
                .wait_timeout_while(guard, CONSUMER_WAIT, |_| {
                    self.running.load(Ordering::Acquire)
                        && self.ring.is_empty()
                        && !self.flush_requested.load(Ordering::Acquire)
                })
                .unwrap();
            drop(guard);
            self.notify_idle_state();
        }

        // Shutdown path: whatever is still pending goes out now.
        let remaining = std::mem::take(&mut *self.pending.lock().unwrap());
        if !remaining.is_empty() {
            Self::flush_batch(&self, remaining);
        }
        self.flush_requested.store(false, Ordering::Release);
        {
            let _guard = self.flush_lock.lock().unwrap();
            self.flush_cv.notify_all();
        }
        self.notify_idle_state();
        info!("event consumer stopped");
    }

    fn update_stats(&self, event: &Event) {
        let bucket = bucket_start(event.timestamp);
        let cutoff = bucket - WINDOW_SPAN_SECS;

        let mut stats = self.stats.lock().unwrap();
        stats.frequency.increment(&event.channel_id, 1);
        *stats.counts.entry(event.channel_id.clone()).or_insert(0) += 1;

        while stats.windows.front().is_some_and(|w| w.start < cutoff) {
            stats.windows.pop_front();
        }

        match stats.windows.iter().position(|w| w.start == bucket) {
            Some(i) => stats.windows[i].sketch.add(&event.user_id),
            None => {
                let mut window = UserWindow {
                    start: bucket,
                    sketch: HyperLogLog::default(),
                };
                window.sketch.add(&event.user_id);
                // Late events can open a bucket behind the newest one;
                // insert at the sorted position.
                let at = stats.windows.partition_point(|w| w.start < bucket);
                stats.windows.insert(at, window);
            }
        }
    }

    fn flush_batch(shared: &Arc<Self>, batch: Vec<Event>) {
        if batch.is_empty() {
            return;
        }

        let callback = shared.callback.lock().unwrap().clone();
        let Some(callback) = callback else {
            // No receiver registered: hold the events at the tail of the
            // pending batch instead of dropping them.
            shared.pending.lock().unwrap().extend(batch);
            return;
        };

        debug!(events = batch.len(), "dispatching flush batch");
        shared.pending_flush_tasks.fetch_add(1, Ordering::AcqRel);

        let payload = Arc::new(Mutex::new(Some(batch)));
        let task = {
            let shared = Arc::clone(shared);
            let callback = callback.clone();
            let payload = Arc::clone(&payload);
            move || {
                if let Some(batch) = payload.lock().unwrap().take() {
                    shared.deliver(&callback, batch);
                }
            }
        };

        if shared.pool.execute(task).is_err() {
            // Pool already stopped; deliver on this thread with the same
            // bookkeeping.
            if let Some(batch) = payload.lock().unwrap().take() {
                shared.deliver(&callback, batch);
            }
        }
    }

    fn deliver(&self, callback: &FlushCallback, batch: Vec<Event>) {
        let count = batch.len();
        if catch_unwind(AssertUnwindSafe(|| callback(batch))).is_err() {
            warn!(events = count, "flush callback panicked; batch counted as flushed");
        }
        self.pending_flush_tasks.fetch_sub(1, Ordering::AcqRel);
        {
            let _guard = self.tasks_lock.lock().unwrap();
            self.tasks_cv.notify_all();
        }
        self.notify_idle_state();
    }

    /// Re-derive `drained` := ring empty ∧ pending batch empty ∧ no
    /// in-flight flush tasks, waking barrier waiters when it flips true.
    fn notify_idle_state(&self) {
        if !self.ring.is_empty() {
            self.drained.store(false, Ordering::Release);
            return;
        }
        if !self.pending.lock().unwrap().is_empty() {
            self.drained.store(false, Ordering::Release);
            return;
        }
        if self.pending_flush_tasks.load(Ordering::Acquire) != 0 {
            self.drained.store(false, Ordering::Release);
            return;
        }
        self.drained.store(true, Ordering::Release);
        let _guard = self.drain_lock.lock().unwrap();
        self.drain_cv.notify_all();
    }
}

pub struct EventStreamProcessor {
    shared: Arc<Shared>,
    consumer: Option<JoinHandle<()>>,
}

impl EventStreamProcessor {
    pub fn new() -> Self {
        Self::with_config(ProcessorConfig::default())
    }

    pub fn with_config(config: ProcessorConfig) -> Self {
        let batch_size = config.batch_size.max(1);
        let buffer_capacity = if config.buffer_capacity == 0 {
            1024
        } else {
            config.buffer_capacity
        };

        let shared = Arc::new(Shared {
            batch_size,
            flush_interval: Duration::from_millis(config.flush_interval_ms.max(1)),
            ring: RingBuffer::new(buffer_capacity),
            pool: WorkerPool::new(config.worker_threads),
            callback: Mutex::new(None),
            running: AtomicBool::new(true),
            total_processed: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            stats: Mutex::new(ChannelStats {
                frequency: CountMinSketch::default(),
                counts: HashMap::new(),
                windows: VecDeque::new(),
            }),
            pending: Mutex::new(Vec::with_capacity(batch_size * 2)),
            data_lock: Mutex::new(()),
            data_cv: Condvar::new(),
            flush_requested: AtomicBool::new(false),
            flush_lock: Mutex::new(()),
            flush_cv: Condvar::new(),
            pending_flush_tasks: AtomicUsize::new(0),
            tasks_lock: Mutex::new(()),
            tasks_cv: Condvar::new(),
            drained: AtomicBool::new(true),
            drain_lock: Mutex::new(()),
            drain_cv: Condvar::new(),
        });

        let consumer = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("pulse-consumer".into())
                .spawn(move || shared.consume_loop())
                .expect("failed to spawn consumer thread")
        };

        Self {
            shared,
            consumer: Some(consumer),
        }
    }

    /// Non-blocking ingest. Returns `false` (and counts a drop) when the
    /// ring is full.
    pub fn push_event(
        &self,
        event_type: &str,
        user_id: &str,
        channel_id: &str,
        timestamp: i64,
    ) -> bool {
        let event = Event {
            event_type: event_type.to_owned(),
            user_id: user_id.to_owned(),
            channel_id: channel_id.to_owned(),
            timestamp,
        };
        if self.shared.ring.push(event).is_err() {
            self.shared.events_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.shared.drained.store(false, Ordering::Release);
        self.shared.data_cv.notify_one();
        true
    }

    /// Approximate distinct users over the trailing hour, from the union
    /// of all live minute buckets.
    pub fn get_unique_users_last_hour(&self) -> u64 {
        let cutoff = now_secs() - WINDOW_SPAN_SECS;
        let mut stats = self.shared.stats.lock().unwrap();
        while stats.windows.front().is_some_and(|w| w.start < cutoff) {
            stats.windows.pop_front();
        }
        let mut aggregate = HyperLogLog::default();
        for window in &stats.windows {
            aggregate
                .merge(&window.sketch)
                .expect("window sketches share the default precision");
        }
        aggregate.cardinality()
    }

    /// Top channels by exact count, descending; ties break on channel id
    /// ascending. Returns at most `k` entries.
    pub fn get_top_channels(&self, k: usize) -> Vec<(String, u64)> {
        let mut entries: Vec<(String, u64)> = {
            let stats = self.shared.stats.lock().unwrap();
            stats.counts.iter().map(|(c, &n)| (c.clone(), n)).collect()
        };
        entries.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries.truncate(k);
        entries
    }

    /// Sketched frequency for one channel; may overestimate, never
    /// underestimates. Secondary oracle next to `get_top_channels`.
    pub fn estimate_channel_frequency(&self, channel_id: &str) -> u64 {
        self.shared.stats.lock().unwrap().frequency.estimate(channel_id)
    }

    pub fn set_flush_callback(&self, callback: Option<FlushCallback>) {
        *self.shared.callback.lock().unwrap() = callback;
    }

    /// Synchronous barrier: dispatch the pending batch and wait until
    /// every accepted event has been delivered and the pipeline is idle.
    pub fn flush_now(&self) {
        self.shared.flush_requested.store(true, Ordering::Release);
        {
            let _guard = self.shared.data_lock.lock().unwrap();
            self.shared.data_cv.notify_all();
        }

        let guard = self.shared.flush_lock.lock().unwrap();
        drop(
            self.shared
                .flush_cv
                .wait_while(guard, |_| {
                    self.shared.flush_requested.load(Ordering::Acquire)
                })
                .unwrap(),
        );

        let guard = self.shared.tasks_lock.lock().unwrap();
        drop(
            self.shared
                .tasks_cv
                .wait_while(guard, |_| {
                    self.shared.pending_flush_tasks.load(Ordering::Acquire) != 0
                })
                .unwrap(),
        );

        self.shared.notify_idle_state();

        let guard = self.shared.drain_lock.lock().unwrap();
        drop(
            self.shared
                .drain_cv
                .wait_while(guard, |_| !self.shared.drained.load(Ordering::Acquire))
                .unwrap(),
        );
    }

    /// Events consumed from the ring, each counted exactly once.
    pub fn total_events_processed(&self) -> u64 {
        self.shared.total_processed.load(Ordering::Relaxed)
    }

    /// Pushes rejected because the ring was full.
    pub fn events_dropped(&self) -> u64 {
        self.shared.events_dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventStreamProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventStreamProcessor {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.flush_requested.store(true, Ordering::Release);
        {
            let _guard = self.shared.data_lock.lock().unwrap();
            self.shared.data_cv.notify_all();
        }
        if let Some(handle) = self.consumer.take() {
            let _ = handle.join();
        }
        self.shared.pool.shutdown();
    }
}
