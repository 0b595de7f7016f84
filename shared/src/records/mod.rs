//! Persisted form of an offline hive.
//!
//! Messages are derived directly with `prost` so the wire layout is fixed by the
//! tags below. A hive file is `HIVE_MAGIC`, the little-endian format version,
//! then one encoded [`HiveRecord`]. Only paths are persisted, never identities.

mod hive;

pub use hive::{HiveRecord, KeyRecord, ValueRecord};
