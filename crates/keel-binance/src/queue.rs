//! Rate-limited order dispatch queue.
//!
//! Payloads are queued and drained by a single processing task that
//! enforces the venue's order-count limits with two rolling windows —
//! 300 orders per 10 seconds and 1200 per 60 seconds — at payload
//! granularity. Work is grouped into lots of at most 5 (the batch
//! endpoint's maximum) and submitted without awaiting, so several lots
//! may be in flight at once; window accounting is conservative because
//! every payload is charged at admission, before its dispatch resolves.
//!
//! Callers observe outcomes two ways: a `BatchResolved` event per lot
//! with every payload's success or error, and [`DispatchQueue::drain_results`]
//! which atomically snapshots-and-clears the accumulated successful
//! client IDs. [`DispatchQueue::wait_idle`] is the completion signal —
//! it resolves once the queue is empty and no dispatch is in flight.

use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use keel_core::events::{AdapterEvent, EventEmitter};
use keel_core::types::BatchOutcome;
use tokio::sync::{Mutex, Notify};
use tokio::time::{Duration, Instant, sleep};
use tracing::debug;

use crate::payload::PayloadOrder;

/// Venue cap: orders per 10-second window.
const WINDOW_10S_CAP: usize = 300;
/// Venue cap: orders per 60-second window.
const WINDOW_60S_CAP: usize = 1200;
/// Batch endpoint maximum lot size.
const MAX_LOT: usize = 5;

const WINDOW_10S: Duration = Duration::from_secs(10);
const WINDOW_60S: Duration = Duration::from_secs(60);

/// Fast-path submission seam: one lot in, per-payload outcomes out.
///
/// Implementations must never error; endpoint-level failures are charged
/// to every payload of the lot.
#[async_trait::async_trait]
pub trait BatchSubmit: Send + Sync + 'static {
    async fn submit_batch(&self, batch: &[PayloadOrder]) -> Vec<BatchOutcome>;
}

// ---------------------------------------------------------------------------
// Rolling windows
// ---------------------------------------------------------------------------

/// Timestamps of every payload admitted in the trailing 10s / 60s horizons.
struct RateWindows {
    w10: VecDeque<Instant>,
    w60: VecDeque<Instant>,
}

impl RateWindows {
    fn new() -> Self {
        Self {
            w10: VecDeque::with_capacity(WINDOW_10S_CAP),
            w60: VecDeque::with_capacity(WINDOW_60S_CAP),
        }
    }

    /// Age out entries older than each window's horizon.
    fn prune(&mut self, now: Instant) {
        while self.w10.front().is_some_and(|&t| now - t >= WINDOW_10S) {
            self.w10.pop_front();
        }
        while self.w60.front().is_some_and(|&t| now - t >= WINDOW_60S) {
            self.w60.pop_front();
        }
    }

    /// When a window is saturated, how long until its oldest entry ages out.
    fn saturation_wait(&self, now: Instant) -> Option<Duration> {
        let mut wait = Duration::ZERO;
        if self.w10.len() >= WINDOW_10S_CAP {
            let oldest = *self.w10.front().expect("saturated window is non-empty");
            wait = wait.max(WINDOW_10S.saturating_sub(now - oldest));
        }
        if self.w60.len() >= WINDOW_60S_CAP {
            let oldest = *self.w60.front().expect("saturated window is non-empty");
            wait = wait.max(WINDOW_60S.saturating_sub(now - oldest));
        }
        (!wait.is_zero()).then_some(wait)
    }

    /// Remaining payload capacity across both windows.
    fn capacity(&self) -> usize {
        (WINDOW_10S_CAP - self.w10.len()).min(WINDOW_60S_CAP - self.w60.len())
    }

    /// Charge `count` payloads to both windows at `now`.
    ///
    /// All payloads of a lot share the iteration's timestamp, sampled before
    /// chunking; it is not re-sampled mid-iteration.
    fn admit(&mut self, now: Instant, count: usize) {
        for _ in 0..count {
            self.w10.push_back(now);
            self.w60.push_back(now);
        }
    }

    /// Pacing delay before the next lot: spread the remaining lot budget of
    /// each window across the time left until the window resets, and take
    /// the tighter of the two.
    fn paced_sleep(&self, now: Instant) -> Duration {
        let s10 = Self::window_pace(&self.w10, WINDOW_10S_CAP, WINDOW_10S, now);
        let s60 = Self::window_pace(&self.w60, WINDOW_60S_CAP, WINDOW_60S, now);
        s10.min(s60)
    }

    fn window_pace(
        window: &VecDeque<Instant>,
        cap: usize,
        horizon: Duration,
        now: Instant,
    ) -> Duration {
        let remaining_lots = (cap - window.len()) / MAX_LOT;
        if remaining_lots == 0 {
            return Duration::from_millis(1000);
        }
        let remaining_time = match window.front() {
            Some(&oldest) => horizon.saturating_sub(now - oldest),
            None => horizon,
        };
        remaining_time / remaining_lots as u32
    }
}

// ---------------------------------------------------------------------------
// DispatchQueue
// ---------------------------------------------------------------------------

/// Concurrent, rate-window-governed batch submitter.
///
/// Cheap to clone; all clones share one queue and one set of windows.
#[derive(Clone)]
pub struct DispatchQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    submitter: Arc<dyn BatchSubmit>,
    events: EventEmitter,
    /// Pending payloads; guards the splice in the processing loop.
    queue: Mutex<VecDeque<PayloadOrder>>,
    /// Rolling windows; only the processing task touches these.
    windows: Mutex<RateWindows>,
    /// Client IDs of successful placements since the last drain.
    results: StdMutex<Vec<String>>,
    /// Whether the processing task is running.
    processing: AtomicBool,
    /// Lots dispatched but not yet resolved.
    in_flight: AtomicUsize,
    /// Signalled when the loop exits or an in-flight dispatch resolves.
    idle: Notify,
}

impl DispatchQueue {
    pub fn new(submitter: Arc<dyn BatchSubmit>, events: EventEmitter) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                submitter,
                events,
                queue: Mutex::new(VecDeque::new()),
                windows: Mutex::new(RateWindows::new()),
                results: StdMutex::new(Vec::new()),
                processing: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Append payloads and start the processing task if idle.
    ///
    /// FIFO within one call; concurrent calls are ordered by the queue
    /// mutex, atomically but arbitrarily.
    pub async fn enqueue(&self, payloads: Vec<PayloadOrder>) {
        if payloads.is_empty() {
            return;
        }
        let depth = {
            let mut queue = self.inner.queue.lock().await;
            queue.extend(payloads);
            queue.len()
        };
        self.inner
            .events
            .emit(AdapterEvent::OrderManager { queue_depth: depth });

        if !self.inner.processing.swap(true, Ordering::SeqCst) {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.process().await });
        }
    }

    /// Whether the processing task is currently running.
    pub fn is_processing(&self) -> bool {
        self.inner.processing.load(Ordering::SeqCst)
    }

    /// Await full completion: queue drained and no dispatch in flight.
    pub async fn wait_idle(&self) {
        loop {
            // Register for the wakeup before checking, so a notification
            // landing between the check and the await is not lost.
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let drained = self.inner.queue.lock().await.is_empty();
            if drained && !self.is_processing() && self.inner.in_flight.load(Ordering::SeqCst) == 0
            {
                return;
            }
            notified.await;
        }
    }

    /// Atomically snapshot-and-clear the successful client IDs.
    pub fn drain_results(&self) -> Vec<String> {
        std::mem::take(&mut *self.inner.results.lock().unwrap())
    }

    /// Current queue depth (pending, not yet admitted payloads).
    pub async fn depth(&self) -> usize {
        self.inner.queue.lock().await.len()
    }
}

impl QueueInner {
    /// The processing loop. Exactly one instance runs at a time.
    async fn process(self: Arc<Self>) {
        loop {
            loop {
                let now = Instant::now();
                let mut windows = self.windows.lock().await;
                windows.prune(now);

                if let Some(wait) = windows.saturation_wait(now) {
                    drop(windows);
                    debug!("[dispatch] rate window saturated, sleeping {wait:?}");
                    sleep(wait).await;
                    continue;
                }

                let batch: Vec<PayloadOrder> = {
                    let mut queue = self.queue.lock().await;
                    let capacity = windows.capacity().min(MAX_LOT).min(queue.len());
                    queue.drain(..capacity).collect()
                };
                if batch.is_empty() {
                    break;
                }

                // Charge the windows before dispatching, all at the same
                // pre-chunking timestamp.
                windows.admit(now, batch.len());
                let pace = windows.paced_sleep(now);
                drop(windows);

                self.in_flight.fetch_add(1, Ordering::SeqCst);
                let inner = Arc::clone(&self);
                tokio::spawn(async move { inner.dispatch(batch).await });

                sleep(pace).await;
            }

            self.processing.store(false, Ordering::SeqCst);
            self.idle.notify_waiters();

            // An enqueue may have landed between the empty check and the
            // flag reset; reclaim the task if so.
            let pending = !self.queue.lock().await.is_empty();
            if pending && !self.processing.swap(true, Ordering::SeqCst) {
                continue;
            }
            return;
        }
    }

    /// Submit one lot and record its outcomes. Runs un-awaited.
    async fn dispatch(self: Arc<Self>, batch: Vec<PayloadOrder>) {
        let outcomes = self.submitter.submit_batch(&batch).await;
        {
            let mut results = self.results.lock().unwrap();
            results.extend(
                outcomes
                    .iter()
                    .filter(|o| o.error.is_none())
                    .map(|o| o.order_id.clone()),
            );
        }
        self.events.emit(AdapterEvent::BatchResolved(outcomes));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.idle.notify_waiters();
    }
}
