//! Persistence sinks for flushed batches.
//!
//! | Sink | Destination |
//! |---|---|
//! | [`FirestoreSink`] | Firestore REST API, one document per batch (full replace) |
//! | [`DirectorySink`] | `<root>/<collection>/<key>.json` on the local filesystem |
//! | [`MemorySink`] | in-process list of JSON documents; for tests and embedding |
//! | [`DiscardSink`] | nowhere; logs and drops |
//!
//! Writes are not idempotent and not retried. The caller supplies a document
//! key unique per batch.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;
use reqwest::Url;
use serde_json::{json, Value};

use crate::config::FirestoreConfig;
use crate::error::SinkError;
use crate::types::{Batch, Sample};

/// HTTP request timeout for remote sinks.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Destination for flushed batches.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Store `batch` as document `document_key` in `collection`.
    async fn write(
        &self,
        collection: &str,
        document_key: &str,
        batch: &Batch,
    ) -> Result<(), SinkError>;
}

// ── Firestore ─────────────────────────────────────────────────────────────────

/// Writes batches to Cloud Firestore through its REST API.
///
/// Each write is a `PATCH` on
/// `{base}/projects/{project}/databases/{db}/documents/{collection}/{key}`
/// without an update mask, which creates or fully replaces the document.
pub struct FirestoreSink {
    config: FirestoreConfig,
    client: reqwest::Client,
}

impl FirestoreSink {
    pub fn new(config: FirestoreConfig) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self { config, client })
    }

    /// Full document URL for `collection`/`document_key`, with path segments
    /// percent-encoded as needed.
    pub fn document_url(&self, collection: &str, document_key: &str) -> Result<Url, SinkError> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| SinkError::Rejected(format!("invalid base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| SinkError::Rejected("base url cannot carry a path".into()))?
            .pop_if_empty()
            .extend([
                "projects",
                self.config.project_id.as_str(),
                "databases",
                self.config.database.as_str(),
                "documents",
                collection,
                document_key,
            ]);
        if let Some(key) = &self.config.api_key {
            url.query_pairs_mut().append_pair("key", key);
        }
        Ok(url)
    }
}

#[async_trait]
impl PersistenceSink for FirestoreSink {
    async fn write(
        &self,
        collection: &str,
        document_key: &str,
        batch: &Batch,
    ) -> Result<(), SinkError> {
        let url = self.document_url(collection, document_key)?;
        let body = to_firestore_document(batch);

        let response = self
            .client
            .patch(url)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!("firestore: wrote {collection}/{document_key} ({} samples)", batch.len());
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(SinkError::Server {
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// Encode `batch` as a Firestore `Document` body:
///
/// ```text
/// { "fields": {
///     "batchTimestamp": { "integerValue": "…" },
///     "samples": { "arrayValue": { "values": [
///         { "mapValue": { "fields": {
///             "timestamp": { "integerValue": "…" },
///             "values":    { "arrayValue": { "values": [ … ] } } } } }, … ] } } } }
/// ```
pub fn to_firestore_document(batch: &Batch) -> Value {
    let samples: Vec<Value> = batch.samples.iter().map(firestore_sample).collect();
    json!({
        "fields": {
            "batchTimestamp": { "integerValue": batch.batch_timestamp.to_string() },
            "samples": { "arrayValue": { "values": samples } },
        }
    })
}

fn firestore_sample(sample: &Sample) -> Value {
    let values: Vec<Value> = sample.values.iter().copied().map(firestore_number).collect();
    json!({
        "mapValue": {
            "fields": {
                "timestamp": { "integerValue": sample.timestamp.to_string() },
                "values": { "arrayValue": { "values": values } },
            }
        }
    })
}

/// Integral readings become `integerValue` (int64 carried as a string);
/// anything else, NaN included, becomes `doubleValue`.
fn firestore_number(v: f64) -> Value {
    // 2^53: beyond this f64 no longer represents every integer.
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
    if v.is_nan() {
        json!({ "doubleValue": "NaN" })
    } else if v.fract() == 0.0 && v.abs() <= MAX_EXACT {
        json!({ "integerValue": (v as i64).to_string() })
    } else if v.is_infinite() {
        let repr = if v > 0.0 { "Infinity" } else { "-Infinity" };
        json!({ "doubleValue": repr })
    } else {
        json!({ "doubleValue": v })
    }
}

// ── Directory ─────────────────────────────────────────────────────────────────

/// Writes each batch as pretty-printed JSON to `<root>/<collection>/<key>.json`.
///
/// `:` in the key is replaced by `-` so that file names stay valid on every
/// platform.
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, collection: &str, document_key: &str) -> PathBuf {
        self.root
            .join(collection)
            .join(format!("{}.json", document_key.replace(':', "-")))
    }
}

#[async_trait]
impl PersistenceSink for DirectorySink {
    async fn write(
        &self,
        collection: &str,
        document_key: &str,
        batch: &Batch,
    ) -> Result<(), SinkError> {
        let path = self.path_for(collection, document_key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(batch)?;
        tokio::fs::write(&path, bytes).await?;
        debug!("dir sink: wrote {} ({} samples)", path.display(), batch.len());
        Ok(())
    }
}

// ── Memory ────────────────────────────────────────────────────────────────────

/// A document accepted by [`MemorySink`].
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub collection: String,
    pub key: String,
    /// The batch as it crossed the sink boundary.
    pub json: String,
}

impl StoredDocument {
    /// Decode the stored JSON back into a [`Batch`].
    pub fn batch(&self) -> Result<Batch, SinkError> {
        Ok(serde_json::from_str(&self.json)?)
    }
}

/// Keeps serialized batches in memory and counts every write attempt.
///
/// [`MemorySink::set_failing`] makes subsequent writes fail without storing
/// anything.
#[derive(Debug, Default)]
pub struct MemorySink {
    documents: Mutex<Vec<StoredDocument>>,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `write` calls, successful or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn documents(&self) -> Vec<StoredDocument> {
        self.documents.lock().clone()
    }

    /// Every stored batch, decoded, in write order.
    pub fn batches(&self) -> Vec<Batch> {
        self.documents
            .lock()
            .iter()
            .filter_map(|d| d.batch().ok())
            .collect()
    }
}

#[async_trait]
impl PersistenceSink for MemorySink {
    async fn write(
        &self,
        collection: &str,
        document_key: &str,
        batch: &Batch,
    ) -> Result<(), SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Rejected("memory sink set to fail".into()));
        }
        let json = serde_json::to_string(batch)?;
        self.documents.lock().push(StoredDocument {
            collection: collection.to_owned(),
            key: document_key.to_owned(),
            json,
        });
        Ok(())
    }
}

// ── Discard ───────────────────────────────────────────────────────────────────

/// Accepts and drops every batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

#[async_trait]
impl PersistenceSink for DiscardSink {
    async fn write(
        &self,
        collection: &str,
        document_key: &str,
        batch: &Batch,
    ) -> Result<(), SinkError> {
        debug!("discard sink: dropped {collection}/{document_key} ({} samples)", batch.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> Batch {
        Batch {
            batch_timestamp: 1_760_434_200_123,
            samples: vec![
                Sample::new(10, vec![1.0, -2.0, f64::NAN]),
                Sample::new(20, vec![3.5]),
            ],
        }
    }

    #[test]
    fn firestore_document_shape() {
        let doc = to_firestore_document(&batch());
        let fields = &doc["fields"];
        assert_eq!(fields["batchTimestamp"]["integerValue"], "1760434200123");

        let samples = fields["samples"]["arrayValue"]["values"].as_array().unwrap();
        assert_eq!(samples.len(), 2);

        let first = &samples[0]["mapValue"]["fields"];
        assert_eq!(first["timestamp"]["integerValue"], "10");
        let values = first["values"]["arrayValue"]["values"].as_array().unwrap();
        assert_eq!(values[0], json!({ "integerValue": "1" }));
        assert_eq!(values[1], json!({ "integerValue": "-2" }));
        assert_eq!(values[2], json!({ "doubleValue": "NaN" }));

        let second = &samples[1]["mapValue"]["fields"]["values"]["arrayValue"]["values"];
        assert_eq!(second[0], json!({ "doubleValue": 3.5 }));
    }

    #[test]
    fn firestore_url_encodes_key_and_appends_api_key() {
        let mut cfg = FirestoreConfig::new("miras-prod");
        cfg.api_key = Some("secret".into());
        let sink = FirestoreSink::new(cfg).unwrap();
        let url = sink
            .document_url("MIRASdata", "2026-10-14T09:30:00.123Z")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://firestore.googleapis.com/v1/projects/miras-prod/databases/(default)\
             /documents/MIRASdata/2026-10-14T09:30:00.123Z?key=secret"
        );
    }

    #[tokio::test]
    async fn firestore_unreachable_host_is_a_network_error() {
        let mut cfg = FirestoreConfig::new("miras-test");
        cfg.base_url = "http://127.0.0.1:1/v1".into();
        let sink = FirestoreSink::new(cfg).unwrap();

        let err = sink
            .write("MIRASdata", "2026-10-14T09:30:00.123Z", &batch())
            .await
            .unwrap_err();

        assert!(matches!(err, SinkError::Network(_)), "{err:?}");
    }

    #[tokio::test]
    async fn memory_sink_counts_calls_and_fails_on_demand() {
        let sink = MemorySink::new();
        sink.write("c", "k1", &batch()).await.unwrap();

        sink.set_failing(true);
        assert!(matches!(
            sink.write("c", "k2", &batch()).await,
            Err(SinkError::Rejected(_))
        ));

        assert_eq!(sink.calls(), 2);
        let docs = sink.documents();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].key, "k1");
        assert_eq!(docs[0].collection, "c");
    }

    #[tokio::test]
    async fn directory_sink_writes_one_file_per_batch() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path());
        sink.write("MIRASdata", "2026-10-14T09:30:00.123Z", &batch())
            .await
            .unwrap();

        let path = dir
            .path()
            .join("MIRASdata")
            .join("2026-10-14T09-30-00.123Z.json");
        assert_eq!(sink.path_for("MIRASdata", "2026-10-14T09:30:00.123Z"), path);

        let text = std::fs::read_to_string(&path).unwrap();
        let back: Batch = serde_json::from_str(&text).unwrap();
        assert_eq!(back.batch_timestamp, 1_760_434_200_123);
        assert_eq!(back.samples.len(), 2);
        assert!(back.samples[0].values[2].is_nan());
    }
}
