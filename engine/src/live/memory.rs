//! In-process stand-in for the OS registry.
//!
//! Keys live in the same native layout the offline hives use, so
//! `HKEY_CLASSES_ROOT` and `HKLM\Software\Classes` alias each other and a
//! 32-bit view lands under `Wow6432Node` exactly as it would on Windows.

use super::{LiveHandle, LiveRegistry};
use crate::hive::KeyNode;
use crate::identity::{KeyIdentity, RegistryPath, RegistryView, wow64};
use crate::key_impl::KeyInfo;
use crate::value::RegValue;
use log::trace;
use shared::constants::ERROR_KEY_DELETED;
use shared::errors::RegistryError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

const FIRST_HANDLE: LiveHandle = 0x4000_0000;

pub struct MemoryRegistry {
    tree: RwLock<KeyNode>,
    open: Mutex<HashMap<LiveHandle, Vec<String>>>,
    foreign: Mutex<HashMap<u64, String>>,
    next_handle: AtomicU64,
    user_sid: Option<String>,
    os_is_64bit: bool,
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(KeyNode::new("")),
            open: Mutex::new(HashMap::new()),
            foreign: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(FIRST_HANDLE),
            user_sid: None,
            os_is_64bit: true,
        }
    }

    pub fn with_user_sid(mut self, sid: &str) -> Self {
        self.user_sid = Some(sid.to_string());
        self
    }

    pub fn with_os_64bit(mut self, os_is_64bit: bool) -> Self {
        self.os_is_64bit = os_is_64bit;
        self
    }

    fn native_segments(path: &str) -> Vec<String> {
        KeyIdentity::parse(path)
            .map(|identity| identity.native_segments())
            .unwrap_or_default()
    }

    /// Creates `path` (e.g. `HKLM\Software\Vendor`) and its ancestors.
    pub fn seed_key(&self, path: &str) {
        let segments = Self::native_segments(path);
        let mut tree = self.tree.write().unwrap_or_else(PoisonError::into_inner);
        tree.create_path(&segments);
    }

    pub fn seed_value(&self, path: &str, name: &str, value: RegValue) {
        let segments = Self::native_segments(path);
        let mut tree = self.tree.write().unwrap_or_else(PoisonError::into_inner);
        tree.create_path(&segments).0.set_value(name, value);
    }

    pub fn remove_key(&self, path: &str) {
        let segments = Self::native_segments(path);
        let Some((leaf, parent)) = segments.split_last() else {
            return;
        };
        let mut tree = self.tree.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(node) = tree.descend_mut(parent) {
            node.remove_child(leaf);
        }
    }

    /// Makes `raw` look like a handle the process opened without the overlay.
    pub fn register_native_handle(&self, raw: u64, native_path: &str) {
        self.foreign
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(raw, native_path.to_string());
    }

    pub fn open_handles(&self) -> usize {
        self.open.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn resolve(path: &RegistryPath) -> Vec<String> {
        let mut segments: Vec<String> = path
            .path
            .split('\\')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if path.view == RegistryView::Redirected32 {
            wow64::insert_marker(path.root, &mut segments);
        }
        KeyIdentity::new(path.root, segments).native_segments()
    }

    fn with_key<R>(
        &self,
        handle: LiveHandle,
        f: impl FnOnce(&KeyNode) -> Result<R, RegistryError>,
    ) -> Result<R, RegistryError> {
        let segments = self
            .open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .cloned()
            .ok_or(RegistryError::InvalidHandle)?;
        let tree = self.tree.read().unwrap_or_else(PoisonError::into_inner);
        // Deleted underneath an open handle.
        let node = tree
            .descend(&segments)
            .ok_or(RegistryError::Os {
                code: ERROR_KEY_DELETED,
            })?;
        f(node)
    }
}

impl LiveRegistry for MemoryRegistry {
    fn open_key(&self, path: &RegistryPath) -> Result<LiveHandle, RegistryError> {
        let segments = Self::resolve(path);
        let exists = self
            .tree
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .descend(&segments)
            .is_some();
        if !exists {
            return Err(RegistryError::NotFound);
        }
        let handle = self.next_handle.fetch_add(4, Ordering::Relaxed);
        trace!("memory registry: open {} -> {handle:#x}", segments.join("\\"));
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, segments);
        Ok(handle)
    }

    fn close_key(&self, handle: LiveHandle) {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle);
    }

    fn query_value(&self, handle: LiveHandle, name: &str) -> Result<RegValue, RegistryError> {
        self.with_key(handle, |node| node.value(name).cloned().ok_or(RegistryError::NotFound))
    }

    fn enum_key(&self, handle: LiveHandle, index: u32) -> Result<String, RegistryError> {
        self.with_key(handle, |node| {
            node.subkeys
                .get(index as usize)
                .map(|sub| sub.name.clone())
                .ok_or(RegistryError::NoMoreItems)
        })
    }

    fn enum_value(
        &self,
        handle: LiveHandle,
        index: u32,
    ) -> Result<(String, RegValue), RegistryError> {
        self.with_key(handle, |node| {
            node.values
                .get(index as usize)
                .cloned()
                .ok_or(RegistryError::NoMoreItems)
        })
    }

    fn query_info(&self, handle: LiveHandle) -> Result<KeyInfo, RegistryError> {
        self.with_key(handle, |node| Ok(node.info(|_| true)))
    }

    fn key_security(&self, handle: LiveHandle) -> Result<Vec<u8>, RegistryError> {
        self.with_key(handle, |node| Ok(node.security.clone()))
    }

    fn native_key_path(&self, raw: u64) -> Option<String> {
        self.foreign
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&raw)
            .cloned()
    }

    fn current_user_sid(&self) -> Option<String> {
        self.user_sid.clone()
    }

    fn is_os_64bit(&self) -> bool {
        self.os_is_64bit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PredefinedRoot;

    fn path(root: PredefinedRoot, path: &str, view: RegistryView) -> RegistryPath {
        RegistryPath {
            root,
            path: path.to_string(),
            view,
        }
    }

    #[test]
    fn classes_root_aliases_machine_classes() {
        let registry = MemoryRegistry::new();
        registry.seed_value(r"HKLM\Software\Classes\.txt", "", RegValue::sz("txtfile"));
        let handle = registry
            .open_key(&path(PredefinedRoot::ClassesRoot, ".txt", RegistryView::Native))
            .unwrap();
        assert_eq!(registry.query_value(handle, "").unwrap(), RegValue::sz("txtfile"));
    }

    #[test]
    fn redirected_view_reads_the_marker_subtree() {
        let registry = MemoryRegistry::new();
        registry.seed_value(r"HKLM\Software\Wow6432Node\Vendor", "Bits", RegValue::dword(32));
        registry.seed_value(r"HKLM\Software\Vendor", "Bits", RegValue::dword(64));

        let h32 = registry
            .open_key(&path(PredefinedRoot::LocalMachine, r"Software\Vendor", RegistryView::Redirected32))
            .unwrap();
        let h64 = registry
            .open_key(&path(PredefinedRoot::LocalMachine, r"Software\Vendor", RegistryView::Native))
            .unwrap();
        assert_eq!(registry.query_value(h32, "Bits").unwrap().as_dword(), Some(32));
        assert_eq!(registry.query_value(h64, "Bits").unwrap().as_dword(), Some(64));
        assert_eq!(registry.open_handles(), 2);
    }

    #[test]
    fn missing_key_and_closed_handle() {
        let registry = MemoryRegistry::new();
        assert!(matches!(
            registry.open_key(&path(PredefinedRoot::CurrentUser, "Nope", RegistryView::Native)),
            Err(RegistryError::NotFound)
        ));
        registry.seed_key(r"HKCU\Software");
        let handle = registry
            .open_key(&path(PredefinedRoot::CurrentUser, "Software", RegistryView::Native))
            .unwrap();
        registry.close_key(handle);
        assert!(matches!(registry.enum_key(handle, 0), Err(RegistryError::InvalidHandle)));
    }
}
