//! Timer Queue
//!
//! A binary min-heap of one-shot and repeating timers keyed by absolute
//! deadline, with insertion order breaking ties. The queue owns no wakeup
//! source of its own: [`TimerQueue::next_deadline`] tells the driver how
//! long it may sleep, and [`TimerQueue::process_expired`] fires everything
//! that has come due.
//!
//! [`TimerDriver`] is the background task that drives a shared queue on
//! the Tokio runtime. All periodic server work (expired-key sweeping, AOF
//! fsync under `everysec`) registers here rather than spawning its own
//! loops, so there is a single place that decides when the process wakes
//! up.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, trace};

/// Type-erased timer callback.
pub type TimerCallback = Box<dyn FnMut() + Send>;

/// Opaque handle identifying a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    id: TimerId,
    callback: TimerCallback,
    repeat: Option<Duration>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; invert so the earliest deadline pops
        // first and ties resolve in insertion order.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Min-heap of pending timers.
#[derive(Default)]
pub struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    next_seq: u64,
    next_id: u64,
}

impl std::fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerQueue")
            .field("pending", &self.heap.len())
            .field("next_deadline", &self.next_deadline())
            .finish()
    }
}

impl TimerQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules a callback to fire after `delay`.
    ///
    /// `repeat = Some(interval)` reschedules the timer at
    /// `deadline + interval` every time it fires. A zero interval is
    /// coerced to a one-shot.
    pub fn add_timer<F>(&mut self, delay: Duration, callback: F, repeat: Option<Duration>) -> TimerId
    where
        F: FnMut() + Send + 'static,
    {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        let seq = self.next_seq;
        self.next_seq += 1;

        self.heap.push(TimerEntry {
            deadline: Instant::now() + delay,
            seq,
            id,
            callback: Box::new(callback),
            repeat: repeat.filter(|interval| !interval.is_zero()),
        });
        id
    }

    /// The earliest pending deadline, if any. The driver bounds its sleep
    /// with this.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|entry| entry.deadline)
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns true when no timers are pending.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Cancels a pending timer by its handle.
    ///
    /// Returns `true` if the timer was still pending. O(n): the heap is
    /// rebuilt, which is fine for the expected timer cardinality (tens).
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.heap.len();
        let entries = std::mem::take(&mut self.heap).into_vec();
        self.heap = entries.into_iter().filter(|entry| entry.id != id).collect();
        self.heap.len() != before
    }

    /// Fires every timer whose deadline is at or before `now`, in
    /// deadline order (ties in insertion order). Repeating timers are
    /// reinserted at `deadline + interval`.
    ///
    /// Returns the number of callbacks invoked.
    pub fn process_expired(&mut self, now: Instant) -> usize {
        let mut fired = 0;
        while self
            .heap
            .peek()
            .is_some_and(|entry| entry.deadline <= now)
        {
            let Some(mut entry) = self.heap.pop() else {
                break;
            };
            (entry.callback)();
            fired += 1;

            if let Some(interval) = entry.repeat {
                entry.deadline += interval;
                entry.seq = self.next_seq;
                self.next_seq += 1;
                self.heap.push(entry);
            }
        }
        fired
    }
}

/// Fallback sleep when no timers are pending (new timers are registered at
/// bootstrap, so this is rarely exercised).
const IDLE_POLL: Duration = Duration::from_millis(500);

/// Handle to the background task driving a shared [`TimerQueue`].
///
/// Dropping the handle stops the task.
#[derive(Debug)]
pub struct TimerDriver {
    shutdown_tx: watch::Sender<bool>,
}

impl TimerDriver {
    /// Spawns the driver task for `queue`.
    pub fn start(queue: Arc<Mutex<TimerQueue>>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(driver_loop(queue, shutdown_rx));
        info!("timer driver started");
        Self { shutdown_tx }
    }

    /// Stops the driver task. Called automatically on drop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for TimerDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn driver_loop(queue: Arc<Mutex<TimerQueue>>, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        let timeout = {
            let queue = queue.lock().unwrap();
            queue
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                .unwrap_or(IDLE_POLL)
        };

        tokio::select! {
            _ = tokio::time::sleep(timeout) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("timer driver received shutdown signal");
                    return;
                }
            }
        }

        let fired = queue.lock().unwrap().process_expired(Instant::now());
        if fired > 0 {
            trace!(fired, "timers fired");
        }
    }
}
