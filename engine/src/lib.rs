//! Registry overlay engine.
//!
//! Presents one merged registry view built from three stores: a writable
//! Diff hive, an optional read-only Base hive and the live OS registry.
//! Reads take the first store that has the item (Diff, then Base, then live);
//! every write lands in Diff, and deletions of lower-store keys are recorded
//! as tombstones there.

pub mod alteration;
pub(crate) mod cache;
pub mod config;
pub mod factory;
pub mod flush;
pub mod guard;
pub(crate) mod handles;
pub mod hive;
pub mod identity;
pub mod interception;
pub mod key_impl;
pub mod live;
pub mod logger;
pub mod policy;
pub mod session;
pub mod tombstone;
pub mod value;
pub mod virtual_key;

#[cfg(test)]
pub(crate) mod testing;

pub use alteration::{AlterationPipeline, PrefixRebase, ValueAlteration};
pub use config::Config;
pub use factory::CreateDisposition;
pub use identity::{KeyAccess, KeyIdentity, PredefinedRoot};
pub use key_impl::{Disposition, KeyInfo};
pub use live::{LiveRegistry, MemoryRegistry, platform_registry};
pub use session::{OverlaySession, SessionOptions};
pub use shared::errors::{ConfigError, RegistryError};
pub use value::{RegValue, StringMode, ValueType};
