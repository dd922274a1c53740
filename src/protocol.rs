//! GATT identifiers, payload format, and pipeline constants for the MIRAS
//! wearable sensor.
//!
//! MIRAS exposes a single vendor service whose notify characteristic carries
//! one telemetry reading per notification as comma-separated ASCII integers:
//!
//! ```text
//! "512,498,503,...,507"   // 12 fields, one per channel
//! ```

use std::time::Duration;

use uuid::Uuid;

// ── Device ────────────────────────────────────────────────────────────────────

/// Advertised BLE local name of the sensor. Discovery requires an exact match.
pub const DEVICE_NAME: &str = "MIRAS";

/// Vendor GATT service carrying the telemetry characteristic.
///
/// Also passed as the discovery allow-list so that platforms which gate
/// service access behind the scan filter (Web Bluetooth, CoreBluetooth)
/// expose it after connecting.
pub const MIRAS_SERVICE_UUID: Uuid = Uuid::from_u128(0x3843d836_4f99_346c_b334_ccc8e9dfafab);

/// Notify characteristic carrying one comma-separated reading per notification.
///
/// The firmware reuses the service UUID for its only characteristic.
pub const MIRAS_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x3843d836_4f99_346c_b334_ccc8e9dfafab);

// ── Payload format ────────────────────────────────────────────────────────────

/// Number of channel readings in a well-formed notification.
///
/// The decoder does not enforce this; it is used by the simulator and the
/// chart viewer.
pub const CHANNEL_COUNT: usize = 12;

/// Field separator inside a notification payload.
pub const FIELD_DELIMITER: char = ',';

/// Channel labels in payload order.
pub const CHANNEL_NAMES: [&str; CHANNEL_COUNT] = [
    "CH1", "CH2", "CH3", "CH4", "CH5", "CH6", "CH7", "CH8", "CH9", "CH10", "CH11", "CH12",
];

// ── Pipeline ──────────────────────────────────────────────────────────────────

/// Number of most-recent samples retained for live display.
pub const LIVE_WINDOW_CAPACITY: usize = 500;

/// Period between two flush ticks.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(1000);

/// Remote collection that receives one document per batch.
pub const BATCH_COLLECTION: &str = "MIRASdata";

/// Encode a reading the way the firmware does: decimal fields joined by `,`
/// with no trailing delimiter.
///
/// ```
/// # use miras_rs::protocol::encode_payload;
/// assert_eq!(encode_payload(&[1, -2, 30]), b"1,-2,30");
/// ```
pub fn encode_payload(values: &[i64]) -> Vec<u8> {
    values
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",")
        .into_bytes()
}
