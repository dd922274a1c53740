//! Runtime configuration.
//!
//! There is no config file. Each struct has a `Default` matching the MIRAS
//! deployment; binaries override fields in code, and the sink is picked from
//! environment variables by [`SinkConfig::from_env`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::SinkError;
use crate::protocol::{
    BATCH_COLLECTION, DEVICE_NAME, FLUSH_INTERVAL, MIRAS_CHARACTERISTIC_UUID, MIRAS_SERVICE_UUID,
};
use crate::sink::{DirectorySink, DiscardSink, FirestoreSink, PersistenceSink};

pub const ENV_FIRESTORE_PROJECT: &str = "MIRAS_FIRESTORE_PROJECT";
pub const ENV_FIRESTORE_API_KEY: &str = "MIRAS_FIRESTORE_API_KEY";
pub const ENV_FIRESTORE_DATABASE: &str = "MIRAS_FIRESTORE_DATABASE";
/// Standard variable honoured by Google client libraries for the local emulator.
pub const ENV_FIRESTORE_EMULATOR_HOST: &str = "FIRESTORE_EMULATOR_HOST";
pub const ENV_SINK_DIR: &str = "MIRAS_SINK_DIR";

// ── MirasClientConfig ─────────────────────────────────────────────────────────

/// Which device to connect to, and how long to wait for it.
#[derive(Debug, Clone)]
pub struct MirasClientConfig {
    /// Exact advertised name to match. Default: `"MIRAS"`.
    pub device_name: String,
    /// GATT service holding the telemetry characteristic.
    pub service_uuid: Uuid,
    /// Notify characteristic carrying comma-separated readings.
    pub characteristic_uuid: Uuid,
    /// BLE scan duration in seconds before giving up. Default: `15`.
    pub scan_timeout_secs: u64,
    /// Upper bound on link establishment in seconds. Default: `10`.
    pub connect_timeout_secs: u64,
}

impl Default for MirasClientConfig {
    fn default() -> Self {
        Self {
            device_name: DEVICE_NAME.into(),
            service_uuid: MIRAS_SERVICE_UUID,
            characteristic_uuid: MIRAS_CHARACTERISTIC_UUID,
            scan_timeout_secs: 15,
            connect_timeout_secs: 10,
        }
    }
}

// ── FlushConfig ───────────────────────────────────────────────────────────────

/// Flush cadence and destination collection.
#[derive(Debug, Clone)]
pub struct FlushConfig {
    /// Period between two ticks. Default: 1 s.
    pub interval: Duration,
    /// Collection that receives one document per batch. Default: `"MIRASdata"`.
    pub collection: String,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            interval: FLUSH_INTERVAL,
            collection: BATCH_COLLECTION.into(),
        }
    }
}

// ── SinkConfig ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct FirestoreConfig {
    pub project_id: String,
    /// Database id. Default: `(default)`.
    pub database: String,
    /// Web API key appended as `?key=`; optional for the emulator.
    pub api_key: Option<String>,
    /// REST root, e.g. `https://firestore.googleapis.com/v1`.
    pub base_url: String,
}

impl FirestoreConfig {
    pub const PRODUCTION_BASE_URL: &'static str = "https://firestore.googleapis.com/v1";

    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database: "(default)".into(),
            api_key: None,
            base_url: Self::PRODUCTION_BASE_URL.into(),
        }
    }
}

/// Where flushed batches go.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkConfig {
    Firestore(FirestoreConfig),
    /// One JSON file per batch under this root.
    Directory(PathBuf),
    /// Log and drop every batch.
    Discard,
}

impl SinkConfig {
    /// Pick a sink from the process environment.
    ///
    /// `MIRAS_FIRESTORE_PROJECT` selects Firestore (with `MIRAS_FIRESTORE_API_KEY`,
    /// `MIRAS_FIRESTORE_DATABASE`, and `FIRESTORE_EMULATOR_HOST` as optional
    /// refinements). Otherwise `MIRAS_SINK_DIR` selects a directory. Otherwise
    /// batches are discarded.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(project) = get(ENV_FIRESTORE_PROJECT) {
            let mut cfg = FirestoreConfig::new(project);
            cfg.api_key = get(ENV_FIRESTORE_API_KEY);
            if let Some(db) = get(ENV_FIRESTORE_DATABASE) {
                cfg.database = db;
            }
            if let Some(host) = get(ENV_FIRESTORE_EMULATOR_HOST) {
                cfg.base_url = format!("http://{host}/v1");
            }
            return SinkConfig::Firestore(cfg);
        }
        if let Some(dir) = get(ENV_SINK_DIR) {
            return SinkConfig::Directory(PathBuf::from(dir));
        }
        SinkConfig::Discard
    }

    /// Construct the configured sink.
    pub fn build(&self) -> Result<Arc<dyn PersistenceSink>, SinkError> {
        Ok(match self {
            SinkConfig::Firestore(cfg) => Arc::new(FirestoreSink::new(cfg.clone())?),
            SinkConfig::Directory(root) => Arc::new(DirectorySink::new(root.clone())),
            SinkConfig::Discard => Arc::new(DiscardSink),
        })
    }

    /// Short human-readable description for status lines.
    pub fn describe(&self) -> String {
        match self {
            SinkConfig::Firestore(cfg) => format!("firestore:{}", cfg.project_id),
            SinkConfig::Directory(root) => format!("dir:{}", root.display()),
            SinkConfig::Discard => "discard".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn defaults_target_miras() {
        let client = MirasClientConfig::default();
        assert_eq!(client.device_name, "MIRAS");
        assert_eq!(
            client.service_uuid.to_string(),
            "3843d836-4f99-346c-b334-ccc8e9dfafab"
        );
        assert_eq!(client.characteristic_uuid, client.service_uuid);

        let flush = FlushConfig::default();
        assert_eq!(flush.interval, Duration::from_millis(1000));
        assert_eq!(flush.collection, "MIRASdata");
    }

    #[test]
    fn no_env_means_discard() {
        assert_eq!(SinkConfig::from_lookup(lookup(&[])), SinkConfig::Discard);
        assert_eq!(
            SinkConfig::from_lookup(lookup(&[(ENV_FIRESTORE_PROJECT, "  ")])),
            SinkConfig::Discard
        );
    }

    #[test]
    fn firestore_takes_precedence_over_directory() {
        let cfg = SinkConfig::from_lookup(lookup(&[
            (ENV_FIRESTORE_PROJECT, "miras-prod"),
            (ENV_FIRESTORE_API_KEY, "k"),
            (ENV_SINK_DIR, "/tmp/miras"),
        ]));
        let SinkConfig::Firestore(fs) = cfg else {
            panic!("expected firestore");
        };
        assert_eq!(fs.project_id, "miras-prod");
        assert_eq!(fs.api_key.as_deref(), Some("k"));
        assert_eq!(fs.database, "(default)");
        assert_eq!(fs.base_url, FirestoreConfig::PRODUCTION_BASE_URL);
    }

    #[test]
    fn emulator_host_overrides_base_url() {
        let cfg = SinkConfig::from_lookup(lookup(&[
            (ENV_FIRESTORE_PROJECT, "demo"),
            (ENV_FIRESTORE_EMULATOR_HOST, "localhost:8080"),
        ]));
        let SinkConfig::Firestore(fs) = cfg else {
            panic!("expected firestore");
        };
        assert_eq!(fs.base_url, "http://localhost:8080/v1");
        assert!(fs.api_key.is_none());
    }

    #[test]
    fn directory_sink_from_env() {
        let cfg = SinkConfig::from_lookup(lookup(&[(ENV_SINK_DIR, "/var/lib/miras")]));
        assert_eq!(cfg, SinkConfig::Directory(PathBuf::from("/var/lib/miras")));
        assert_eq!(cfg.describe(), "dir:/var/lib/miras");
    }
}
