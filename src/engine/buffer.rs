//! Per-(db, rp) batch buffers
//!
//! A two-level lazy map from database to retention policy to an
//! accumulating byte buffer. The map is owned by the engine's worker
//! task and never shared; flush hands out a detached, frozen payload so
//! no other task ever touches the live buffers.

use bytes::{Bytes, BytesMut};

use crate::types::LinePoint;

/// One accumulating batch.
///
/// `count` equals the number of appends since the buffer was created or
/// last flushed; `count == 0` exactly when `bytes` is empty.
#[derive(Debug, Default)]
pub struct CacheBuffer {
    bytes: BytesMut,
    count: u32,
}

impl CacheBuffer {
    /// Appends since creation or last flush.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Buffered bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// All batch buffers of one engine, keyed db → rp.
///
/// Sub-maps are created lazily on first use and entries are never
/// removed; steady-state cardinality is bounded by the number of
/// (db, rp) pairs in use.
#[derive(Debug, Default)]
pub struct BatchBuffers {
    buffers: std::collections::HashMap<String, std::collections::HashMap<String, CacheBuffer>>,
}

impl BatchBuffers {
    /// Create an empty buffer map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one point's line bytes to its (db, rp) buffer, ensuring
    /// the buffer ends with a newline. Returns the buffer's new count.
    pub fn append(&mut self, point: &LinePoint) -> u32 {
        let cb = self
            .buffers
            .entry(point.db.clone())
            .or_default()
            .entry(point.rp.clone())
            .or_default();

        cb.count += 1;
        cb.bytes.extend_from_slice(&point.line);
        if point.line.last() != Some(&b'\n') {
            cb.bytes.extend_from_slice(b"\n");
        }
        cb.count
    }

    /// Detach the (db, rp) payload, leaving the buffer empty with
    /// count 0. Returns `None` when there is nothing to flush.
    pub fn take(&mut self, db: &str, rp: &str) -> Option<Bytes> {
        let cb = self.buffers.get_mut(db)?.get_mut(rp)?;
        if cb.bytes.is_empty() {
            return None;
        }
        cb.count = 0;
        Some(cb.bytes.split().freeze())
    }

    /// (db, rp) pairs with at least one buffered append.
    pub fn non_empty(&self) -> Vec<(String, String)> {
        let mut keys = Vec::new();
        for (db, rps) in &self.buffers {
            for (rp, cb) in rps {
                if cb.count > 0 {
                    keys.push((db.clone(), rp.clone()));
                }
            }
        }
        keys
    }

    /// Look up one buffer, if it exists.
    pub fn get(&self, db: &str, rp: &str) -> Option<&CacheBuffer> {
        self.buffers.get(db)?.get(rp)
    }
}
