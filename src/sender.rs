//! Backend write transport
//!
//! [`WriteSender`] is the seam the engine delivers through; the
//! production implementation is [`HttpSender`], a thin wrapper over a
//! shared `reqwest` client that POSTs snappy-compressed batches and
//! classifies every outcome into the three closed [`WriteError`] kinds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header;

use crate::codec;
use crate::config::BackendConfig;
use crate::error::{Error, WriteError};

/// Transport used by an engine to deliver compressed batches.
///
/// Implementations must not re-compress: the payload handed in is final
/// wire bytes, both for live batches and for spilled records on replay.
#[async_trait]
pub trait WriteSender: Send + Sync + 'static {
    /// Deliver one compressed batch for (db, rp).
    async fn write_compressed(&self, db: &str, rp: &str, payload: Bytes) -> Result<(), WriteError>;

    /// Liveness as maintained by an external health-check probe.
    fn is_active(&self) -> bool;

    /// Flip the liveness flag. Called by the external health prober.
    fn set_active(&self, active: bool);
}

/// HTTP transport for one backend's write endpoint.
pub struct HttpSender {
    name: String,
    url: String,
    write_url: String,
    write_only: bool,
    client: reqwest::Client,
    active: AtomicBool,
}

impl HttpSender {
    /// Build a sender for one backend.
    pub fn new(cfg: &BackendConfig, write_timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(write_timeout)
            .build()?;

        let url = cfg.url.trim_end_matches('/').to_string();
        let write_url = format!("{url}/write");

        Ok(Self {
            name: cfg.name.clone(),
            url,
            write_url,
            write_only: cfg.write_only,
            client,
            active: AtomicBool::new(true),
        })
    }

    /// Backend name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backend base URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Config flag: this backend accepts writes but serves no queries.
    pub fn is_write_only(&self) -> bool {
        self.write_only
    }
}

#[async_trait]
impl WriteSender for HttpSender {
    async fn write_compressed(&self, db: &str, rp: &str, payload: Bytes) -> Result<(), WriteError> {
        let response = self
            .client
            .post(&self.write_url)
            .query(&[("db", db), ("rp", rp)])
            .header(header::CONTENT_ENCODING, codec::CONTENT_ENCODING)
            .body(payload)
            .send()
            .await
            .map_err(|e| WriteError::Transient(e.to_string()))?;

        classify_status(response.status().as_u16())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }
}

/// Map an HTTP status onto the engine's error policy.
///
/// 404 means the endpoint or database is unknown; other 4xx mean the
/// payload itself was rejected. Both are permanent: retrying the same
/// bytes cannot succeed. 429 is the exception: the backend is shedding
/// load, so the batch is worth keeping.
fn classify_status(status: u16) -> Result<(), WriteError> {
    match status {
        200..=299 => Ok(()),
        404 => Err(WriteError::NotFound),
        429 => Err(WriteError::Transient("backend throttling (429)".to_string())),
        400..=499 => Err(WriteError::BadRequest { status }),
        _ => Err(WriteError::Transient(format!(
            "backend returned status {status}"
        ))),
    }
}
