//! Fluxgate - write-path proxy for InfluxDB-like time-series backends
//!
//! For each incoming line-protocol point the proxy selects a backend via
//! consistent hashing, batches writes per (database, retention-policy)
//! tuple, compresses each batch with snappy and ships it over HTTP. When
//! a backend is unreachable or fails transiently, batches land in a
//! durable on-disk spill log and are replayed by a background rewrite
//! loop with at-most-once commit semantics.
//!
//! Delivery is at-least-once; ordering is guaranteed only within one
//! (db, rp) buffer up to the network, and records carry their own
//! timestamps downstream.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod routing;
pub mod sender;
pub mod spill;
pub mod types;

// Re-export main types
pub use config::{BackendConfig, CircleConfig, HashKey, ProxyConfig};
pub use engine::{BackendEngine, EngineStatus};
pub use error::{Error, SubmitError, WriteError};
pub use routing::{build_circles, routing_key, Circle};
pub use sender::{HttpSender, WriteSender};
pub use spill::SpillLog;
pub use types::LinePoint;
