//! Periodic drain of the accumulation queue into the persistence sink.
//!
//! The scheduler owns the [`AccumulationQueue`]. Producers get an
//! enqueue-only clone through [`FlushScheduler::queue`]; only the tick
//! handler drains it.
//!
//! Each tick:
//!
//! 1. takes and clears the queue in one non-suspending step,
//! 2. returns early if the snapshot is empty (no batch, no sink call),
//! 3. stamps a [`Batch`] with the current wall-clock time,
//! 4. hands it to the sink on a task of its own.
//!
//! Writes are fire-and-forget relative to the tick loop: a slow sink never
//! delays the next tick, so two writes may be in flight at once. A failed
//! write is logged and its samples are gone; the next tick is unaffected.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::buffer::AccumulationQueue;
use crate::config::FlushConfig;
use crate::sink::PersistenceSink;
use crate::types::Batch;

/// Commands accepted by a running scheduler.
enum FlushCommand {
    /// Run one tick now, outside the regular cadence.
    FlushNow,
    /// Run a last tick, wait for in-flight writes, and stop.
    Shutdown,
}

/// Counters shared between the tick loop and its write tasks.
#[derive(Debug, Default)]
struct Counters {
    ticks: AtomicU64,
    empty_ticks: AtomicU64,
    batches_written: AtomicU64,
    batches_failed: AtomicU64,
    samples_written: AtomicU64,
    samples_lost: AtomicU64,
}

/// Point-in-time copy of the scheduler counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushStats {
    pub ticks: u64,
    /// Ticks that found the queue empty and made no sink call.
    pub empty_ticks: u64,
    pub batches_written: u64,
    pub batches_failed: u64,
    pub samples_written: u64,
    /// Samples dropped together with a failed batch.
    pub samples_lost: u64,
}

impl Counters {
    fn snapshot(&self) -> FlushStats {
        FlushStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            empty_ticks: self.empty_ticks.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            samples_written: self.samples_written.load(Ordering::Relaxed),
            samples_lost: self.samples_lost.load(Ordering::Relaxed),
        }
    }
}

/// Timer-driven drain-and-forward loop.
pub struct FlushScheduler {
    queue: AccumulationQueue,
    sink: Arc<dyn PersistenceSink>,
    config: FlushConfig,
    counters: Arc<Counters>,
}

impl FlushScheduler {
    pub fn new(sink: Arc<dyn PersistenceSink>, config: FlushConfig) -> Self {
        Self {
            queue: AccumulationQueue::new(),
            sink,
            config,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Enqueue-only handle to the accumulation queue.
    pub fn queue(&self) -> AccumulationQueue {
        self.queue.clone()
    }

    pub fn stats(&self) -> FlushStats {
        self.counters.snapshot()
    }

    /// Run one flush tick.
    ///
    /// Returns the spawned write task, or `None` when the queue was empty and
    /// no sink call was made. Awaiting the handle is optional.
    pub fn tick(&self) -> Option<JoinHandle<()>> {
        self.counters.ticks.fetch_add(1, Ordering::Relaxed);

        let samples = self.queue.drain_snapshot();
        if samples.is_empty() {
            self.counters.empty_ticks.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let (batch, key) = Batch::new(Utc::now(), samples);
        let sink = Arc::clone(&self.sink);
        let counters = Arc::clone(&self.counters);
        let collection = self.config.collection.clone();

        Some(tokio::spawn(async move {
            let n = batch.len() as u64;
            match sink.write(&collection, &key, &batch).await {
                Ok(()) => {
                    counters.batches_written.fetch_add(1, Ordering::Relaxed);
                    counters.samples_written.fetch_add(n, Ordering::Relaxed);
                    debug!("flush: {collection}/{key} written ({n} samples)");
                }
                Err(e) => {
                    counters.batches_failed.fetch_add(1, Ordering::Relaxed);
                    counters.samples_lost.fetch_add(n, Ordering::Relaxed);
                    warn!("flush: {collection}/{key} failed, {n} samples dropped: {e}");
                }
            }
        }))
    }

    /// Start ticking every `config.interval` on a background task.
    ///
    /// The first tick fires one full interval after the call.
    pub fn spawn(self) -> FlushHandle {
        let (tx, rx) = mpsc::channel(8);
        let stats = Arc::clone(&self.counters);
        let queue = self.queue();
        let task = tokio::spawn(self.run(rx));
        FlushHandle {
            tx,
            task,
            queue,
            counters: stats,
        }
    }

    async fn run(self, mut rx: mpsc::Receiver<FlushCommand>) {
        let period = self.config.interval;
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "flush scheduler started: every {} ms into {:?}",
            period.as_millis(),
            self.config.collection
        );

        let mut in_flight: Vec<JoinHandle<()>> = Vec::new();
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    in_flight.retain(|h| !h.is_finished());
                    in_flight.extend(self.tick());
                }
                cmd = rx.recv() => match cmd {
                    Some(FlushCommand::FlushNow) => {
                        in_flight.extend(self.tick());
                    }
                    Some(FlushCommand::Shutdown) | None => {
                        in_flight.extend(self.tick());
                        break;
                    }
                },
            }
        }

        for handle in in_flight {
            if let Err(e) = handle.await {
                warn!("flush: write task aborted: {e}");
            }
        }
        info!("flush scheduler stopped: {:?}", self.stats());
    }
}

/// Control handle of a scheduler started with [`FlushScheduler::spawn`].
///
/// Dropping the handle stops the scheduler after one final tick.
pub struct FlushHandle {
    tx: mpsc::Sender<FlushCommand>,
    task: JoinHandle<()>,
    queue: AccumulationQueue,
    counters: Arc<Counters>,
}

impl FlushHandle {
    /// Enqueue-only handle to the scheduler's accumulation queue.
    pub fn queue(&self) -> AccumulationQueue {
        self.queue.clone()
    }

    pub fn stats(&self) -> FlushStats {
        self.counters.snapshot()
    }

    /// Ask for an immediate tick. Non-blocking; ignored if the command
    /// channel is full or the scheduler already stopped.
    pub fn flush_now(&self) {
        let _ = self.tx.try_send(FlushCommand::FlushNow);
    }

    /// Run a final tick, wait for every in-flight write, and stop.
    pub async fn shutdown(self) -> FlushStats {
        let _ = self.tx.send(FlushCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!("flush scheduler task failed: {e}");
        }
        self.counters.snapshot()
    }
}
