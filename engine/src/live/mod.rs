//! Adapter presenting the real OS registry as one more (read-only) store.

mod memory;
#[cfg(windows)]
mod windows;

pub use memory::MemoryRegistry;
#[cfg(windows)]
pub use windows::WindowsRegistry;

use crate::identity::{KeyAccess, KeyIdentity, RegistryPath};
use crate::key_impl::KeyInfo;
use crate::value::RegValue;
use shared::errors::RegistryError;
use std::sync::Arc;

/// Opaque handle value of a key opened in the live registry.
pub type LiveHandle = u64;

/// Read-side operations of the OS registry the overlay needs.
///
/// Implementations must be usable from every host thread at once.
pub trait LiveRegistry: Send + Sync {
    fn open_key(&self, path: &RegistryPath) -> Result<LiveHandle, RegistryError>;
    fn close_key(&self, handle: LiveHandle);
    fn query_value(&self, handle: LiveHandle, name: &str) -> Result<RegValue, RegistryError>;
    fn enum_key(&self, handle: LiveHandle, index: u32) -> Result<String, RegistryError>;
    fn enum_value(&self, handle: LiveHandle, index: u32)
    -> Result<(String, RegValue), RegistryError>;
    fn query_info(&self, handle: LiveHandle) -> Result<KeyInfo, RegistryError>;
    fn key_security(&self, handle: LiveHandle) -> Result<Vec<u8>, RegistryError>;

    /// NT object name (`\REGISTRY\...`) of a handle the overlay did not hand
    /// out, if it is a registry key at all.
    fn native_key_path(&self, raw: u64) -> Option<String>;

    fn current_user_sid(&self) -> Option<String>;

    fn is_os_64bit(&self) -> bool;
}

/// The registry backend for the running platform.
#[cfg(windows)]
pub fn platform_registry() -> Arc<dyn LiveRegistry> {
    Arc::new(WindowsRegistry::new())
}

/// The registry backend for the running platform.
#[cfg(not(windows))]
pub fn platform_registry() -> Arc<dyn LiveRegistry> {
    Arc::new(MemoryRegistry::new())
}

/// A key opened in the live registry. Always read-only; the handle is closed
/// when this value is dropped.
pub struct LiveRegistryKey {
    live: Arc<dyn LiveRegistry>,
    handle: LiveHandle,
    access: KeyAccess,
}

impl LiveRegistryKey {
    pub fn open(
        live: &Arc<dyn LiveRegistry>,
        identity: &KeyIdentity,
        access: KeyAccess,
    ) -> Result<Self, RegistryError> {
        let handle = live.open_key(&identity.registry_path())?;
        Ok(Self {
            live: Arc::clone(live),
            handle,
            access,
        })
    }

    pub fn handle(&self) -> LiveHandle {
        self.handle
    }

    pub fn access(&self) -> KeyAccess {
        self.access
    }

    pub fn get_value(&self, name: &str) -> Result<RegValue, RegistryError> {
        self.live.query_value(self.handle, name)
    }

    pub fn enum_subkey(&self, index: u32) -> Result<String, RegistryError> {
        self.live.enum_key(self.handle, index)
    }

    pub fn enum_value(&self, index: u32) -> Result<(String, RegValue), RegistryError> {
        self.live.enum_value(self.handle, index)
    }

    pub fn query_info(&self) -> Result<KeyInfo, RegistryError> {
        self.live.query_info(self.handle)
    }

    pub fn security(&self) -> Result<Vec<u8>, RegistryError> {
        self.live.key_security(self.handle)
    }
}

impl Drop for LiveRegistryKey {
    fn drop(&mut self) {
        self.live.close_key(self.handle);
    }
}
