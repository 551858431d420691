//! Latest-value cache for everything the vehicle and camera tell us.
//!
//! Each field has exactly one producer (its inbound handler) and is guarded by
//! its own lock, so a pose update never waits on an image decode and no reader
//! ever sees a half-written value. [`TelemetryCache::snapshot`] takes every
//! read lock at once when a consistent cut across fields is needed.

mod cache;

pub use cache::{Frame, Snapshot, TelemetryCache};
