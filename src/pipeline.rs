//! Ingestion: notification stream → decoder → live window + accumulation queue.

use futures::StreamExt;
use log::{debug, info};
use tokio::task::JoinHandle;

use crate::buffer::{AccumulationQueue, LiveWindow};
use crate::parse::decode;
use crate::transport::NotificationStream;

/// Totals for one ingestion run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    /// Notifications received from the transport.
    pub notifications: u64,
    /// Samples pushed into both buffers.
    pub samples: u64,
    /// Empty notifications dropped without producing a sample.
    pub dropped: u64,
    /// Samples that carried at least one NaN channel.
    pub malformed: u64,
}

/// Consume `stream` until the link drops.
///
/// Every notification is stamped with the time elapsed since the stream's
/// connection origin at the moment it is received, decoded, and pushed into
/// `window` and then `queue`, one notification at a time and in arrival
/// order.
pub async fn ingest(
    mut stream: NotificationStream,
    window: LiveWindow,
    queue: AccumulationQueue,
) -> IngestStats {
    let mut stats = IngestStats::default();

    while let Some(payload) = stream.next().await {
        stats.notifications += 1;
        let elapsed = stream.elapsed_ms();

        let Some(sample) = decode(&payload, elapsed) else {
            stats.dropped += 1;
            debug!("ingest: empty notification #{} dropped", stats.notifications);
            continue;
        };

        if !sample.is_well_formed() {
            stats.malformed += 1;
        }
        if stats.samples < 3 || stats.samples % 500 == 0 {
            debug!(
                "ingest: sample #{} t={} ms channels={} {:?}",
                stats.samples,
                sample.timestamp,
                sample.values.len(),
                sample.values
            );
        }

        window.push(sample.clone());
        queue.enqueue(sample);
        stats.samples += 1;
    }

    info!(
        "ingest: stream ended after {} notifications ({} samples, {} dropped, {} malformed)",
        stats.notifications, stats.samples, stats.dropped, stats.malformed
    );
    stats
}

/// [`ingest`] on its own task.
pub fn spawn_ingest(
    stream: NotificationStream,
    window: LiveWindow,
    queue: AccumulationQueue,
) -> JoinHandle<IngestStats> {
    tokio::spawn(ingest(stream, window, queue))
}
