//! Canonical key identity and the WOW64 rules that shape it.

mod access;
mod key_identity;
mod root;
pub mod wow64;

pub use access::KeyAccess;
pub use key_identity::{KeyIdentity, RegistryPath};
pub use root::PredefinedRoot;
pub use wow64::{RegistryView, Wow64Context, Wow64Option};
