//! The two sample buffers fed by the ingestion task.
//!
//! * [`LiveWindow`] keeps the most recent [`LIVE_WINDOW_CAPACITY`] samples for
//!   display and evicts from the head.
//! * [`AccumulationQueue`] collects every sample between two flush ticks and
//!   is emptied wholesale by [`crate::flush::FlushScheduler`].
//!
//! Both are cheap to clone handles over shared state. Every operation takes
//! the inner lock once and never awaits while holding it, so a push and a
//! drain can never interleave mid-operation.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::protocol::LIVE_WINDOW_CAPACITY;
use crate::types::Sample;

// ── LiveWindow ────────────────────────────────────────────────────────────────

/// Bounded, insertion-ordered window of recent samples.
///
/// Single writer (the ingestion task), any number of readers. Readers always
/// get a full ordered copy via [`LiveWindow::snapshot`]; there is no partial
/// or streaming read.
#[derive(Clone, Debug)]
pub struct LiveWindow {
    inner: Arc<Mutex<VecDeque<Sample>>>,
    capacity: usize,
}

impl LiveWindow {
    /// Window holding at most `capacity` samples. A capacity of 0 is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity + 1))),
            capacity,
        }
    }

    /// Append `sample` at the tail, then trim the head so that only the newest
    /// `capacity` samples remain.
    pub fn push(&self, sample: Sample) {
        let mut buf = self.inner.lock();
        buf.push_back(sample);
        while buf.len() > self.capacity {
            buf.pop_front();
        }
    }

    /// Ordered copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.inner.lock().iter().cloned().collect()
    }

    /// The newest sample, if any.
    pub fn latest(&self) -> Option<Sample> {
        self.inner.lock().back().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for LiveWindow {
    fn default() -> Self {
        Self::new(LIVE_WINDOW_CAPACITY)
    }
}

// ── AccumulationQueue ─────────────────────────────────────────────────────────

/// Unbounded queue of samples awaiting the next flush tick.
///
/// Outside the crate the queue is append-only: [`AccumulationQueue::enqueue`]
/// is public, while draining is reserved for the flush scheduler. A sample
/// therefore belongs to exactly one drained snapshot.
#[derive(Clone, Debug, Default)]
pub struct AccumulationQueue {
    inner: Arc<Mutex<Vec<Sample>>>,
}

impl AccumulationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `sample` at the tail.
    pub fn enqueue(&self, sample: Sample) {
        self.inner.lock().push(sample);
    }

    /// Number of samples waiting for the next tick.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Take everything queued so far and leave the queue empty, in one step.
    ///
    /// Samples enqueued after this returns land in the next snapshot.
    pub(crate) fn drain_snapshot(&self) -> Vec<Sample> {
        std::mem::take(&mut *self.inner.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ts: u64) -> Sample {
        Sample::new(ts, vec![ts as f64])
    }

    #[test]
    fn window_below_capacity_keeps_everything() {
        let window = LiveWindow::new(4);
        for ts in 0..3 {
            window.push(sample(ts));
        }
        let ts: Vec<u64> = window.snapshot().iter().map(|s| s.timestamp).collect();
        assert_eq!(ts, vec![0, 1, 2]);
    }

    #[test]
    fn window_never_exceeds_capacity_and_keeps_newest_in_order() {
        let window = LiveWindow::new(LIVE_WINDOW_CAPACITY);
        for ts in 0..1_234u64 {
            window.push(sample(ts));
            assert!(window.len() <= LIVE_WINDOW_CAPACITY);
        }
        let snap = window.snapshot();
        assert_eq!(snap.len(), LIVE_WINDOW_CAPACITY);
        let expected: Vec<u64> = (1_234 - LIVE_WINDOW_CAPACITY as u64..1_234).collect();
        let got: Vec<u64> = snap.iter().map(|s| s.timestamp).collect();
        assert_eq!(got, expected);
        assert_eq!(window.latest().map(|s| s.timestamp), Some(1_233));
    }

    #[test]
    fn window_default_capacity_is_500() {
        assert_eq!(LiveWindow::default().capacity(), 500);
        assert_eq!(LiveWindow::new(0).capacity(), 1);
    }

    #[test]
    fn snapshot_is_detached_from_later_pushes() {
        let window = LiveWindow::new(2);
        window.push(sample(1));
        let snap = window.snapshot();
        window.push(sample(2));
        window.push(sample(3));
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].timestamp, 1);
    }

    #[test]
    fn drain_empties_queue_and_later_samples_go_to_next_snapshot() {
        let queue = AccumulationQueue::new();
        queue.enqueue(sample(1));
        queue.enqueue(sample(2));

        let first = queue.drain_snapshot();
        assert_eq!(first.len(), 2);
        assert!(queue.is_empty());

        queue.enqueue(sample(3));
        let second = queue.drain_snapshot();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].timestamp, 3);
        assert!(queue.drain_snapshot().is_empty());
    }

    #[test]
    fn concurrent_enqueue_and_drain_lose_nothing() {
        let queue = AccumulationQueue::new();
        let writer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                for ts in 0..10_000u64 {
                    queue.enqueue(sample(ts));
                }
            })
        };

        let mut drained = Vec::new();
        while !writer.is_finished() {
            drained.extend(queue.drain_snapshot());
        }
        writer.join().unwrap();
        drained.extend(queue.drain_snapshot());

        let ts: Vec<u64> = drained.iter().map(|s| s.timestamp).collect();
        assert_eq!(ts, (0..10_000).collect::<Vec<_>>());
    }
}
