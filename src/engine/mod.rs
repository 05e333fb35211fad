//! Per-backend write engine
//!
//! One [`BackendEngine`] binds to exactly one downstream backend. A
//! single worker task owns the batch buffers and selects over three
//! sources: the ingress channel, a lazily-armed one-shot flush timer,
//! and the rewrite ticker. Full or idle batches are detached and handed
//! to a bounded task pool which compresses and delivers them; transient
//! failures land in the spill log and are replayed by at most one
//! concurrent rewrite task.
//!
//! ```text
//! submit → ingress(16) → worker ──┬─ size/time flush ─→ TaskPool ─→ HTTP
//!                                 │                        │ transient
//!                                 └─ rewrite ticker        ▼
//!                                       │              SpillLog
//!                                       └─ rewrite loop ←──┘
//! ```

pub mod buffer;
pub mod pool;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, warn};

use crate::codec;
use crate::config::{BackendConfig, ProxyConfig};
use crate::error::{Error, SubmitError, WriteError};
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::sender::{HttpSender, WriteSender};
use crate::spill::{record, SpillLog};
use crate::types::LinePoint;

use buffer::BatchBuffers;
use pool::TaskPool;

/// Ingress channel capacity. Small on purpose: the worker is the pacing
/// element, and a full channel is how backpressure reaches callers.
const INGRESS_CAPACITY: usize = 16;

/// Health snapshot of one engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    /// Backend name.
    pub name: String,
    /// Backend liveness per the external prober.
    pub active: bool,
    /// Whether undelivered records sit in the spill log.
    pub backlog: bool,
    /// Whether a rewrite task is currently draining the spill log.
    pub rewriting: bool,
    /// Config flag: writes only, no queries.
    pub write_only: bool,
}

/// State shared between the engine handle, its worker, flush tasks and
/// the rewrite loop.
struct Shared {
    name: String,
    sender: Arc<dyn WriteSender>,
    spill: Arc<SpillLog>,
    metrics: Arc<EngineMetrics>,
    running: AtomicBool,
    rewriting: AtomicBool,
    rewrite_interval: Duration,
}

/// Single-writer engine for one downstream backend.
pub struct BackendEngine {
    shared: Arc<Shared>,
    write_only: bool,
    ingress: Mutex<Option<mpsc::Sender<LinePoint>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BackendEngine {
    /// Create an engine for `cfg`, delivering over HTTP.
    ///
    /// Spawns the worker task, so this must run inside a Tokio runtime.
    pub fn new(cfg: &BackendConfig, pxcfg: &ProxyConfig) -> Result<Self, Error> {
        let sender = Arc::new(HttpSender::new(cfg, pxcfg.write_timeout())?);
        Self::with_sender(&cfg.name, cfg.write_only, sender, pxcfg)
    }

    /// Create an engine over a custom transport.
    ///
    /// This is the seam for tests and for embedders with their own
    /// delivery path; everything else behaves exactly as [`Self::new`].
    pub fn with_sender(
        name: &str,
        write_only: bool,
        sender: Arc<dyn WriteSender>,
        pxcfg: &ProxyConfig,
    ) -> Result<Self, Error> {
        let spill = Arc::new(SpillLog::open(&pxcfg.data_dir, name)?);
        let (tx, rx) = mpsc::channel(INGRESS_CAPACITY);

        let shared = Arc::new(Shared {
            name: name.to_string(),
            sender,
            spill,
            metrics: Arc::new(EngineMetrics::new()),
            running: AtomicBool::new(true),
            rewriting: AtomicBool::new(false),
            rewrite_interval: pxcfg.rewrite_interval(),
        });

        let worker = Worker {
            rx,
            buffers: BatchBuffers::new(),
            pool: TaskPool::new(pxcfg.conn_pool_size),
            flush_size: pxcfg.flush_size,
            flush_time: pxcfg.flush_time(),
            shared: Arc::clone(&shared),
        };
        let handle = tokio::spawn(worker.run());

        Ok(Self {
            shared,
            write_only,
            ingress: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Hand one point to the worker.
    ///
    /// Blocks only while the ingress channel is full; returns
    /// [`SubmitError::Closed`] once [`Self::close`] has run.
    pub async fn submit(&self, point: LinePoint) -> Result<(), SubmitError> {
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(SubmitError::Closed);
        }
        let tx = self.ingress.lock().clone();
        match tx {
            Some(tx) => tx.send(point).await.map_err(|_| SubmitError::Closed),
            None => Err(SubmitError::Closed),
        }
    }

    /// Shut the engine down. Idempotent.
    ///
    /// Marks the engine not-running and closes the ingress channel; the
    /// worker then drains pending points, flushes every buffer, waits
    /// for in-flight flush tasks and exits. An in-flight rewrite task
    /// notices the flag between records and stops promptly.
    pub async fn close(&self) {
        self.shared.running.store(false, Ordering::Release);
        drop(self.ingress.lock().take());

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(backend = %self.shared.name, error = %e, "worker task failed");
            }
        }
        debug!(backend = %self.shared.name, "engine closed");
    }

    /// Backend name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Backend liveness per the external prober.
    pub fn is_active(&self) -> bool {
        self.shared.sender.is_active()
    }

    /// Flip the backend's liveness flag.
    ///
    /// The probe itself lives outside the engine; this is the hook it
    /// drives. An inactive backend spills its batches without a live
    /// attempt, and the rewrite loop idles until liveness returns.
    pub fn set_active(&self, active: bool) {
        self.shared.sender.set_active(active);
    }

    /// Whether a rewrite task is currently draining the spill log.
    pub fn is_rewriting(&self) -> bool {
        self.shared.rewriting.load(Ordering::Acquire)
    }

    /// Config flag: writes only, no queries.
    pub fn is_write_only(&self) -> bool {
        self.write_only
    }

    /// Whether undelivered records sit in the spill log.
    pub fn has_backlog(&self) -> bool {
        self.shared.spill.is_data()
    }

    /// Health snapshot.
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            name: self.shared.name.clone(),
            active: self.is_active(),
            backlog: self.has_backlog(),
            rewriting: self.is_rewriting(),
            write_only: self.write_only,
        }
    }

    /// Current metric counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

impl std::fmt::Debug for BackendEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendEngine")
            .field("name", &self.shared.name)
            .field("running", &self.shared.running.load(Ordering::Relaxed))
            .finish()
    }
}

/// The single task that owns the batch buffers.
struct Worker {
    rx: mpsc::Receiver<LinePoint>,
    buffers: BatchBuffers,
    pool: TaskPool,
    flush_size: u32,
    flush_time: Duration,
    shared: Arc<Shared>,
}

impl Worker {
    async fn run(mut self) {
        debug!(backend = %self.shared.name, "worker started");

        // The flush timer is not a standing ticker: it is armed when a
        // point lands in an otherwise idle engine and consumed exactly
        // once per arming, so under steady load (where flush_size wins)
        // it costs nothing.
        let flush_timer = time::sleep(Duration::ZERO);
        tokio::pin!(flush_timer);
        let mut timer_armed = false;

        let mut rewrite_ticker = time::interval_at(
            time::Instant::now() + self.shared.rewrite_interval,
            self.shared.rewrite_interval,
        );
        rewrite_ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_point = self.rx.recv() => match maybe_point {
                    Some(point) => {
                        self.shared.metrics.record_received();
                        let count = self.buffers.append(&point);
                        if count >= self.flush_size {
                            self.flush_one(&point.db, &point.rp).await;
                        } else if !timer_armed {
                            flush_timer
                                .as_mut()
                                .reset(time::Instant::now() + self.flush_time);
                            timer_armed = true;
                        }
                    }
                    None => {
                        // Channel closed by the engine handle: drain is
                        // complete once recv returns None, so flush what
                        // remains and wait out the in-flight tasks.
                        self.flush_all().await;
                        self.pool.wait_all().await;
                        debug!(backend = %self.shared.name, "worker stopped");
                        return;
                    }
                },
                () = flush_timer.as_mut(), if timer_armed => {
                    timer_armed = false;
                    self.flush_all().await;
                }
                _ = rewrite_ticker.tick() => {
                    self.rewrite_idle();
                }
            }
        }
    }

    /// Detach one (db, rp) batch and hand it to the pool.
    async fn flush_one(&mut self, db: &str, rp: &str) {
        let Some(payload) = self.buffers.take(db, rp) else {
            return;
        };
        self.shared.metrics.record_flushed();
        let task = flush_task(
            Arc::clone(&self.shared),
            db.to_string(),
            rp.to_string(),
            payload,
        );
        // Blocks when the pool is saturated; that stall is what fills
        // the ingress channel and pushes back on callers.
        self.pool.submit(task).await;
    }

    /// Flush every non-empty buffer.
    async fn flush_all(&mut self) {
        for (db, rp) in self.buffers.non_empty() {
            self.flush_one(&db, &rp).await;
        }
    }

    /// Start a rewrite task unless one is already running or there is
    /// nothing to replay.
    fn rewrite_idle(&self) {
        if !self.shared.rewriting.load(Ordering::Acquire) && self.shared.spill.is_data() {
            self.shared.rewriting.store(true, Ordering::Release);
            tokio::spawn(rewrite_loop(Arc::clone(&self.shared)));
        }
    }
}

/// Compress and deliver one detached batch; spill on transient failure.
async fn flush_task(shared: Arc<Shared>, db: String, rp: String, payload: Bytes) {
    let compressed = match codec::compress(&payload) {
        Ok(compressed) => compressed,
        Err(e) => {
            error!(backend = %shared.name, error = %e, "compressing batch failed, dropping");
            return;
        }
    };

    if shared.sender.is_active() {
        match shared
            .sender
            .write_compressed(&db, &rp, compressed.clone())
            .await
        {
            Ok(()) => {
                shared.metrics.record_sent();
                return;
            }
            Err(WriteError::BadRequest { status }) => {
                warn!(backend = %shared.name, %db, %rp, status, "backend rejected batch, dropping");
                shared.metrics.record_dropped();
                return;
            }
            Err(WriteError::NotFound) => {
                warn!(backend = %shared.name, %db, %rp, "backend endpoint unknown, dropping batch");
                shared.metrics.record_dropped();
                return;
            }
            Err(WriteError::Transient(e)) => {
                warn!(
                    backend = %shared.name, %db, %rp, error = %e,
                    bytes = compressed.len(), "live delivery failed, spilling"
                );
            }
        }
    }

    let record = record::encode(&db, &rp, &compressed);
    match shared.spill.write(&record) {
        Ok(()) => shared.metrics.record_spilled(),
        Err(e) => {
            error!(backend = %shared.name, %db, %rp, error = %e, "spilling batch failed, batch lost");
            shared.metrics.record_spill_error();
        }
    }
}

/// Drain the spill log until empty, the engine stops, or only transient
/// failures remain. At most one instance runs per engine.
async fn rewrite_loop(shared: Arc<Shared>) {
    debug!(backend = %shared.name, "rewrite loop started");
    while shared.spill.is_data() {
        if !shared.running.load(Ordering::Acquire) {
            break;
        }
        if !shared.sender.is_active() {
            time::sleep(shared.rewrite_interval).await;
            continue;
        }
        if rewrite_one(&shared).await.is_err() {
            time::sleep(shared.rewrite_interval).await;
        }
    }
    shared.rewriting.store(false, Ordering::Release);
    debug!(backend = %shared.name, "rewrite loop finished");
}

/// Replay a single spilled record with at-most-once commit:
/// delivered or permanently rejected records advance the meta file,
/// transient failures roll the consumer back to the last commit.
async fn rewrite_one(shared: &Shared) -> Result<(), Error> {
    let record_bytes = match shared.spill.read() {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return Ok(()),
        Err(e) => {
            error!(backend = %shared.name, error = %e, "reading spill record failed");
            return Err(e.into());
        }
    };

    match record::decode(&record_bytes) {
        Ok((db, rp, batch)) => {
            match shared
                .sender
                .write_compressed(&db, &rp, Bytes::from(batch))
                .await
            {
                Ok(()) => shared.metrics.record_replayed(),
                Err(WriteError::BadRequest { status }) => {
                    warn!(backend = %shared.name, %db, %rp, status, "backend rejected spilled batch, dropping");
                    shared.metrics.record_dropped();
                }
                Err(WriteError::NotFound) => {
                    warn!(backend = %shared.name, %db, %rp, "backend endpoint unknown, dropping spilled batch");
                    shared.metrics.record_dropped();
                }
                Err(WriteError::Transient(e)) => {
                    warn!(backend = %shared.name, %db, %rp, error = %e, "replay failed, rolling back");
                    if let Err(e) = shared.spill.rollback_meta() {
                        error!(backend = %shared.name, error = %e, "rollback failed");
                    }
                    return Err(WriteError::Transient(e).into());
                }
            }
        }
        Err(e) => {
            // Committed past below, so one bad record cannot wedge the
            // replay forever.
            error!(backend = %shared.name, error = %e, "skipping malformed spill record");
        }
    }

    shared.spill.update_meta().map_err(|e| {
        error!(backend = %shared.name, error = %e, "committing spill progress failed");
        Error::from(e)
    })
}
