//! Spill-and-replay persistence
//!
//! When a backend is unreachable or fails transiently, compressed batches
//! are appended to a per-backend [`SpillLog`] together with their
//! percent-encoded destination, and redelivered later by the engine's
//! rewrite loop.

pub mod log;
pub mod record;

pub use log::SpillLog;
