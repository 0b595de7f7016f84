mod codec;
mod key;
mod node;
mod offline;

pub use key::OfflineHiveKey;
pub use node::{KeyNode, filetime_now};
pub use offline::{HiveAccess, OfflineHive};
