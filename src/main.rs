use std::time::Duration;

use anyhow::Result;
use log::{error, info, warn};

use miras_rs::buffer::{AccumulationQueue, LiveWindow};
use miras_rs::ble::BleTransport;
use miras_rs::config::{FlushConfig, MirasClientConfig, SinkConfig};
use miras_rs::connection::ConnectionManager;
use miras_rs::flush::FlushScheduler;
use miras_rs::pipeline::spawn_ingest;
use miras_rs::protocol::CHANNEL_NAMES;
use miras_rs::simulator::SimulatedTransport;
use miras_rs::transport::Transport;
use miras_rs::types::ConnectionState;

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ───────────────────────────────────────────────────────────────
    // Set RUST_LOG=debug for verbose output, e.g.:
    //   RUST_LOG=miras_rs=debug cargo run
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // ── Configuration ─────────────────────────────────────────────────────────
    let simulate = std::env::args().any(|a| a == "--simulate");
    let config = MirasClientConfig::default();
    let sink_config = SinkConfig::from_env();
    info!("Persisting batches to {}", sink_config.describe());

    let flush = FlushScheduler::new(sink_config.build()?, FlushConfig::default()).spawn();
    let window = LiveWindow::default();

    // ── Session ───────────────────────────────────────────────────────────────
    let outcome = if simulate {
        info!("--simulate: using the built-in signal generator");
        run(SimulatedTransport::new(), &config, window, flush.queue()).await
    } else {
        run(BleTransport::new(&config), &config, window, flush.queue()).await
    };

    // Whatever happened to the link, the queue is drained one last time.
    let stats = flush.shutdown().await;
    info!(
        "Flush totals: {} batches / {} samples written, {} batches / {} samples lost",
        stats.batches_written, stats.samples_written, stats.batches_failed, stats.samples_lost
    );
    outcome
}

/// Connect, ingest until the link drops or Ctrl-C, then return.
async fn run<T: Transport>(
    transport: T,
    config: &MirasClientConfig,
    window: LiveWindow,
    queue: AccumulationQueue,
) -> Result<()> {
    let manager = ConnectionManager::new(transport);
    let mut state = manager.subscribe_state();

    let stream = match manager.connect_with(config).await {
        Ok(stream) => stream,
        Err(e) => {
            error!("Connect failed: {e}");
            return Err(e.into());
        }
    };
    let name = manager.device_name().unwrap_or_default();
    info!("✅  Connected to: {name}. Press Ctrl-C to quit.");

    let mut ingest = spawn_ingest(stream, window.clone(), queue);
    let mut report = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Quit requested.");
                if let Err(e) = manager.disconnect().await {
                    warn!("Disconnect error: {e}");
                }
                break;
            }
            changed = state.changed() => {
                if changed.is_err() || *state.borrow() == ConnectionState::Disconnected {
                    info!("❌  Disconnected from {name}.");
                    break;
                }
            }
            _ = report.tick() => {
                if let Some(sample) = window.latest() {
                    let line: Vec<String> = CHANNEL_NAMES
                        .iter()
                        .zip(&sample.values)
                        .map(|(ch, v)| format!("{ch}={v}"))
                        .collect();
                    println!("[{:>8} ms] {}", sample.timestamp, line.join(" "));
                }
            }
        }
    }

    // The stream ends once the link is down; collect the ingest totals.
    match tokio::time::timeout(Duration::from_secs(2), &mut ingest).await {
        Ok(Ok(stats)) => info!("Ingest totals: {stats:?}"),
        Ok(Err(e)) => warn!("Ingest task failed: {e}"),
        Err(_) => {
            warn!("Ingest task still running after disconnect; aborting it");
            ingest.abort();
        }
    }
    Ok(())
}
