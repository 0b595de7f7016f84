use crate::virtual_key::VirtualKey;
use log::trace;
use shared::constants::{HANDLE_BASE, HANDLE_STEP};
use shared::errors::RegistryError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// A virtual key shared between the table and the threads using it.
pub type SharedKey = Arc<Mutex<VirtualKey>>;

#[derive(Default)]
struct Slots {
    keys: HashMap<u64, SharedKey>,
    free: Vec<u64>,
    next: u64,
}

/// Opaque handle values to virtual keys.
///
/// Lookups take the read lock; open and close take the write lock. Values
/// start at [`HANDLE_BASE`], advance by [`HANDLE_STEP`] and are reused most
/// recently freed first. They never collide with the predefined root
/// pseudo-handles.
pub struct HandleTable {
    slots: RwLock<Slots>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Slots {
                next: HANDLE_BASE,
                ..Slots::default()
            }),
        }
    }

    pub fn insert(&self, key: VirtualKey) -> u64 {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let handle = match slots.free.pop() {
            Some(handle) => handle,
            None => {
                let handle = slots.next;
                slots.next += HANDLE_STEP;
                handle
            }
        };
        trace!("handle {handle:#x} -> {}", key.identity());
        slots.keys.insert(handle, Arc::new(Mutex::new(key)));
        handle
    }

    pub fn get(&self, handle: u64) -> Result<SharedKey, RegistryError> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys
            .get(&handle)
            .cloned()
            .ok_or(RegistryError::InvalidHandle)
    }

    /// Unmaps `handle`. The key itself is released once the last thread
    /// still using it lets go.
    pub fn remove(&self, handle: u64) -> Result<SharedKey, RegistryError> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let key = slots
            .keys
            .remove(&handle)
            .ok_or(RegistryError::InvalidHandle)?;
        slots.free.push(handle);
        Ok(key)
    }

    /// Empties the table, handing back everything still open.
    pub fn drain(&self) -> Vec<SharedKey> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.free.clear();
        slots.next = HANDLE_BASE;
        slots.keys.drain().map(|(_, key)| key).collect()
    }

    pub fn len(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Sandbox;
    use crate::identity::{KeyAccess, PredefinedRoot};

    fn key(sandbox: &Sandbox) -> VirtualKey {
        sandbox.virtual_key(r"HKCU\Software", KeyAccess::KEY_READ)
    }

    #[test]
    fn handles_are_spaced_and_reused_lifo() {
        let sandbox = Sandbox::new();
        let table = HandleTable::new();
        let a = table.insert(key(&sandbox));
        let b = table.insert(key(&sandbox));
        let c = table.insert(key(&sandbox));
        assert_eq!(a, HANDLE_BASE);
        assert_eq!(b, HANDLE_BASE + HANDLE_STEP);
        assert_eq!(c, HANDLE_BASE + 2 * HANDLE_STEP);

        table.remove(a).unwrap();
        table.remove(c).unwrap();
        assert_eq!(table.insert(key(&sandbox)), c);
        assert_eq!(table.insert(key(&sandbox)), a);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn unknown_handles_are_invalid() {
        let table = HandleTable::new();
        assert!(matches!(table.get(HANDLE_BASE), Err(RegistryError::InvalidHandle)));
        assert!(matches!(table.remove(HANDLE_BASE), Err(RegistryError::InvalidHandle)));
        assert!(PredefinedRoot::from_handle(HANDLE_BASE).is_none());
    }

    #[test]
    fn removed_key_stays_usable_by_holders() {
        let sandbox = Sandbox::new();
        let table = HandleTable::new();
        let handle = table.insert(key(&sandbox));
        let held = table.get(handle).unwrap();
        table.remove(handle).unwrap();
        assert!(table.get(handle).is_err());
        let key = held.lock().unwrap();
        assert_eq!(key.identity().to_string(), r"HKEY_CURRENT_USER\Software");
    }
}
