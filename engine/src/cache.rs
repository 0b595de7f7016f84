use crate::identity::KeyIdentity;
use crate::key_impl::{Disposition, KeyImplementation};
use shared::errors::RegistryError;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

/// Backing-store implementations a virtual key has opened, keyed by the
/// identity they were opened for and their store.
///
/// The cache owns every entry; callers only ever get borrows. Dropping the
/// cache drops (and therefore closes) each implementation exactly once.
#[derive(Default)]
pub struct KeyImplementationCache {
    entries: HashMap<(KeyIdentity, Disposition), KeyImplementation>,
}

impl KeyImplementationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identity: &KeyIdentity, disposition: Disposition) -> Option<&KeyImplementation> {
        self.entries.get(&(identity.clone(), disposition))
    }

    /// Stores `implementation` unless an entry already exists for the same
    /// key and store, in which case the new one is dropped and the existing
    /// entry returned.
    pub fn add(&mut self, identity: KeyIdentity, implementation: KeyImplementation) -> &KeyImplementation {
        let disposition = implementation.disposition();
        self.entries
            .entry((identity, disposition))
            .or_insert(implementation)
    }

    /// Returns the cached entry or opens and caches a new one.
    pub fn get_or_open(
        &mut self,
        identity: &KeyIdentity,
        disposition: Disposition,
        open: impl FnOnce() -> Result<KeyImplementation, RegistryError>,
    ) -> Result<&KeyImplementation, RegistryError> {
        match self.entries.entry((identity.clone(), disposition)) {
            Entry::Occupied(entry) => Ok(&*entry.into_mut()),
            Entry::Vacant(entry) => Ok(&*entry.insert(open()?)),
        }
    }

    /// Drops the entry for one key and store, closing it.
    pub fn evict(&mut self, identity: &KeyIdentity, disposition: Disposition) -> bool {
        self.entries.remove(&(identity.clone(), disposition)).is_some()
    }

    /// Drops every entry at or below `identity`. Returns how many went.
    pub fn remove(&mut self, identity: &KeyIdentity) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(cached, _), _| !cached.is_within(identity));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
