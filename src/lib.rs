//! # miras-rs
//!
//! Async Rust client for the MIRAS wearable sensor: connects over Bluetooth
//! Low Energy, decodes its comma-separated telemetry notifications, keeps a
//! bounded live window for display, and flushes everything received into a
//! remote document store once per second.
//!
//! ```text
//!  BLE notify ──► parse::decode ──┬──► LiveWindow (last 500, for display)
//!                                 └──► AccumulationQueue ──(1 s tick)──► PersistenceSink
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use miras_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = MirasClientConfig::default();
//!     let sink = SinkConfig::from_env().build()?;
//!     let flush = FlushScheduler::new(sink, FlushConfig::default()).spawn();
//!     let window = LiveWindow::default();
//!
//!     let manager = ConnectionManager::new(BleTransport::new(&config));
//!     let stream = manager.connect_with(&config).await?;
//!     let stats = spawn_ingest(stream, window.clone(), flush.queue()).await?;
//!
//!     println!("{stats:?}, {:?}", flush.shutdown().await);
//!     Ok(())
//! }
//! ```
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`prelude`] | One-line glob import of the most commonly needed types |
//! | [`protocol`] | GATT UUIDs, device name, payload format, pipeline constants |
//! | [`types`] | `Sample`, `Batch`, `ConnectionState` |
//! | [`parse`] | Notification payload decoder |
//! | [`buffer`] | Live window and accumulation queue |
//! | [`transport`] | Transport traits and the connection-anchored notification stream |
//! | [`ble`] | btleplug transport |
//! | [`simulator`] | Hardware-free transport emitting synthetic readings |
//! | [`connection`] | Connection state machine and disconnect handling |
//! | [`pipeline`] | Ingestion task feeding both buffers |
//! | [`flush`] | Periodic batch flush |
//! | [`sink`] | Persistence sinks (Firestore REST, directory, memory) |
//! | [`config`] | Client, flush, and sink configuration |
//! | [`error`] | Error types |

pub mod ble;
pub mod buffer;
pub mod config;
pub mod connection;
pub mod error;
pub mod flush;
pub mod parse;
pub mod pipeline;
pub mod protocol;
pub mod simulator;
pub mod sink;
pub mod transport;
pub mod types;

// ── Prelude ───────────────────────────────────────────────────────────────────

/// Convenience re-exports for binaries and downstream crates.
pub mod prelude {
    // ── Connection ────────────────────────────────────────────────────────────
    pub use crate::ble::{BleDevice, BleTransport};
    pub use crate::connection::ConnectionManager;
    pub use crate::simulator::SimulatedTransport;
    pub use crate::transport::{Device, NotificationStream, Transport};

    // ── Pipeline ──────────────────────────────────────────────────────────────
    pub use crate::buffer::{AccumulationQueue, LiveWindow};
    pub use crate::flush::{FlushHandle, FlushScheduler, FlushStats};
    pub use crate::pipeline::{ingest, spawn_ingest, IngestStats};
    pub use crate::sink::{MemorySink, PersistenceSink};

    // ── Configuration and errors ──────────────────────────────────────────────
    pub use crate::config::{FlushConfig, MirasClientConfig, SinkConfig};
    pub use crate::error::{ConnectError, SinkError};

    // ── Data types and constants ──────────────────────────────────────────────
    pub use crate::protocol::{CHANNEL_COUNT, CHANNEL_NAMES, DEVICE_NAME};
    pub use crate::types::{Batch, ConnectionState, Sample};
}
