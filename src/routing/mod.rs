//! Consistent-hash routing
//!
//! Maps each point's (db, measurement) key onto exactly one backend
//! engine of a circle.

pub mod circle;
pub mod ring;

pub use circle::{build_circles, routing_key, Circle};
pub use ring::HashRing;
