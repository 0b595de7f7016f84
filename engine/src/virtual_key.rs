//! The object a caller's handle maps to: one key identity seen through all
//! three stores at once.

use crate::alteration::AlterationPipeline;
use crate::cache::KeyImplementationCache;
use crate::factory::{Resolved, VirtualKeyFactory};
use crate::identity::{KeyAccess, KeyIdentity};
use crate::key_impl::{Disposition, KeyImplementation, KeyInfo};
use crate::value::RegValue;
use log::debug;
use shared::errors::RegistryError;
use std::sync::Arc;

/// Item counts per store, captured when an enumeration pass starts.
#[derive(Debug, Clone, Copy, Default)]
struct CountSnapshot {
    subkeys: [u32; 3],
    values: [u32; 3],
}

pub struct VirtualKey {
    identity: KeyIdentity,
    access: KeyAccess,
    origin: Disposition,
    cache: KeyImplementationCache,
    factory: Arc<VirtualKeyFactory>,
    pipeline: Arc<AlterationPipeline>,
    subkey_counts: Option<[u32; 3]>,
    value_counts: Option<[u32; 3]>,
}

/// Opens (or reuses) the implementation of `identity` in `disposition`.
fn resolve<'c>(
    cache: &'c mut KeyImplementationCache,
    factory: &VirtualKeyFactory,
    identity: &KeyIdentity,
    disposition: Disposition,
    access: KeyAccess,
) -> Result<&'c KeyImplementation, RegistryError> {
    cache.get_or_open(identity, disposition, || {
        factory.open(identity, disposition, access)
    })
}

/// Like [`resolve`] for Diff, making sure the cached entry can write.
fn resolve_writable<'c>(
    cache: &'c mut KeyImplementationCache,
    factory: &VirtualKeyFactory,
    identity: &KeyIdentity,
    access: KeyAccess,
) -> Result<&'c KeyImplementation, RegistryError> {
    if cache
        .get(identity, Disposition::Diff)
        .is_some_and(|cached| cached.access().is_read_only())
    {
        cache.evict(identity, Disposition::Diff);
    }
    resolve(cache, factory, identity, Disposition::Diff, access)
}

/// Runs `f` on the first store in priority order where both the key and the
/// looked-up item exist. `NotFound` at either level moves on.
fn first_in_priority<T>(
    cache: &mut KeyImplementationCache,
    factory: &VirtualKeyFactory,
    identity: &KeyIdentity,
    access: KeyAccess,
    mut f: impl FnMut(&KeyImplementation) -> Result<T, RegistryError>,
) -> Result<(T, Disposition), RegistryError> {
    for disposition in Disposition::PRIORITY {
        let implementation = match resolve(cache, factory, identity, disposition, access) {
            Ok(implementation) => implementation,
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e),
        };
        match f(implementation) {
            Ok(found) => return Ok((found, disposition)),
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e),
        }
    }
    Err(RegistryError::NotFound)
}

impl VirtualKey {
    pub fn new(
        identity: KeyIdentity,
        resolved: Resolved,
        factory: Arc<VirtualKeyFactory>,
        pipeline: Arc<AlterationPipeline>,
    ) -> Self {
        let Resolved {
            implementation,
            access,
        } = resolved;
        let origin = implementation.disposition();
        let mut cache = KeyImplementationCache::new();
        cache.add(identity.clone(), implementation);
        Self {
            identity,
            access,
            origin,
            cache,
            factory,
            pipeline,
            subkey_counts: None,
            value_counts: None,
        }
    }

    /// Widens what the handle may do without reopening anything. Stores are
    /// still resolved with the access they were opened with; the first write
    /// materializes the key in Diff.
    pub fn with_granted_access(mut self, access: KeyAccess) -> Self {
        self.access = access;
        self.subkey_counts = None;
        self.value_counts = None;
        self
    }

    pub fn identity(&self) -> &KeyIdentity {
        &self.identity
    }

    pub fn access(&self) -> KeyAccess {
        self.access
    }

    /// Store the key was found in when the handle was opened.
    pub fn origin(&self) -> Disposition {
        self.origin
    }

    pub fn cached_implementations(&self) -> usize {
        self.cache.len()
    }

    fn subkey_identity(&self, subkey: &str) -> KeyIdentity {
        KeyIdentity::build(
            &self.identity,
            self.access.wow64_option(),
            subkey,
            self.factory.wow64(),
        )
    }

    fn read_access(&self) -> KeyAccess {
        self.access.read_only()
    }

    fn lookup_value(
        &mut self,
        identity: &KeyIdentity,
        access: KeyAccess,
        name: &str,
    ) -> Result<RegValue, RegistryError> {
        let (value, disposition) = first_in_priority(
            &mut self.cache,
            &self.factory,
            identity,
            access,
            |implementation| implementation.get_value(name),
        )?;
        if disposition.is_virtualized() {
            Ok(self.pipeline.after_read(value))
        } else {
            Ok(value)
        }
    }

    pub fn get_value(&mut self, name: &str) -> Result<RegValue, RegistryError> {
        if !self.access.allows_query() {
            return Err(RegistryError::AccessDenied);
        }
        let identity = self.identity.clone();
        let access = self.read_access();
        self.lookup_value(&identity, access, name)
    }

    /// `RegGetValue` style read of a value in a subkey of this key.
    pub fn query_subkey_value(
        &mut self,
        subkey: &str,
        name: &str,
    ) -> Result<RegValue, RegistryError> {
        if subkey.is_empty() {
            return self.get_value(name);
        }
        let identity = self.subkey_identity(subkey);
        let access = self.read_access();
        self.lookup_value(&identity, access, name)
    }

    pub fn set_value(&mut self, name: &str, value: RegValue) -> Result<(), RegistryError> {
        if !self.access.allows_set_value() {
            return Err(RegistryError::AccessDenied);
        }
        let value = self.pipeline.before_write(value);
        let diff = resolve_writable(&mut self.cache, &self.factory, &self.identity, self.access)?;
        diff.set_value(name, &value)
    }

    /// Removes a value from Diff. Values only present in lower stores cannot
    /// be deleted and report `NotFound`.
    pub fn delete_value(&mut self, name: &str) -> Result<(), RegistryError> {
        if !self.access.allows_set_value() {
            return Err(RegistryError::AccessDenied);
        }
        let diff = resolve_writable(&mut self.cache, &self.factory, &self.identity, self.access)?;
        diff.delete_value(name)
    }

    pub fn delete_subkey(&mut self, subkey: &str) -> Result<(), RegistryError> {
        if subkey.is_empty() {
            return Err(RegistryError::InvalidParameter("empty subkey name".into()));
        }
        let identity = self.subkey_identity(subkey);
        self.delete_identity(&identity)
    }

    /// Deletes the key this handle refers to.
    pub fn delete(&mut self) -> Result<(), RegistryError> {
        if !self.access.allows_delete() {
            return Err(RegistryError::AccessDenied);
        }
        let identity = self.identity.clone();
        self.delete_identity(&identity)
    }

    fn delete_identity(&mut self, target: &KeyIdentity) -> Result<(), RegistryError> {
        let policy = self.factory.policy();
        if policy.is_system_key(target) {
            return Err(RegistryError::AccessDenied);
        }
        let diff = Arc::clone(self.factory.diff());
        if policy.is_non_removable(target) {
            if !diff.key_exists(target) && !self.factory.exists_below_diff(target) {
                return Err(RegistryError::NotFound);
            }
            debug!("{target} is a protected anchor; delete ignored");
            return Ok(());
        }
        let removed = diff.delete_key(target)?;
        self.cache.remove(target);

        let read = KeyAccess::KEY_READ;
        let still_below = [Disposition::Base, Disposition::WindowsLive]
            .into_iter()
            .any(|disposition| self.factory.open(target, disposition, read).is_ok());

        if still_below {
            diff.write_tombstone(target)?;
            debug!("Tombstoned {target}");
        } else if !removed {
            return Err(RegistryError::NotFound);
        }
        self.subkey_counts = None;
        Ok(())
    }

    fn snapshot(&mut self) -> CountSnapshot {
        let mut counts = CountSnapshot::default();
        for disposition in Disposition::TRAVERSAL {
            let info = resolve(
                &mut self.cache,
                &self.factory,
                &self.identity,
                disposition,
                self.access.read_only(),
            )
            .and_then(KeyImplementation::query_info);
            if let Ok(info) = info {
                counts.subkeys[disposition.slot()] = info.subkeys;
                counts.values[disposition.slot()] = info.values;
            }
        }
        counts
    }

    /// Maps a global enumeration index onto one store and its local index,
    /// concatenating stores in traversal order.
    fn enumerate<T>(
        &mut self,
        index: u32,
        counts: [u32; 3],
        mut item: impl FnMut(&KeyImplementation, u32) -> Result<T, RegistryError>,
    ) -> Result<(T, Disposition), RegistryError> {
        let mut consumed = 0u32;
        for disposition in Disposition::TRAVERSAL {
            let count = counts[disposition.slot()];
            if count == 0 || index >= consumed.saturating_add(count) {
                consumed = consumed.saturating_add(count);
                continue;
            }
            let local = index.saturating_sub(consumed);
            let outcome = resolve(
                &mut self.cache,
                &self.factory,
                &self.identity,
                disposition,
                self.access.read_only(),
            )
            .and_then(|implementation| item(implementation, local));
            match outcome {
                Ok(found) => return Ok((found, disposition)),
                // The store shrank (or vanished) since the snapshot.
                Err(RegistryError::NoMoreItems) | Err(RegistryError::NotFound) => {
                    consumed = consumed.saturating_add(count);
                }
                Err(e) => return Err(e),
            }
        }
        Err(RegistryError::NoMoreItems)
    }

    pub fn enum_key(&mut self, index: u32) -> Result<String, RegistryError> {
        if !self.access.allows_enumerate() {
            return Err(RegistryError::AccessDenied);
        }
        let counts = match self.subkey_counts {
            Some(counts) if index != 0 => counts,
            _ => {
                let counts = self.snapshot().subkeys;
                self.subkey_counts = Some(counts);
                counts
            }
        };
        self.enumerate(index, counts, |implementation, local| {
            implementation.enum_subkey(local)
        })
        .map(|(name, _)| name)
    }

    pub fn enum_value(&mut self, index: u32) -> Result<(String, RegValue), RegistryError> {
        if !self.access.allows_query() {
            return Err(RegistryError::AccessDenied);
        }
        let counts = match self.value_counts {
            Some(counts) if index != 0 => counts,
            _ => {
                let counts = self.snapshot().values;
                self.value_counts = Some(counts);
                counts
            }
        };
        let ((name, value), disposition) =
            self.enumerate(index, counts, |implementation, local| {
                implementation.enum_value(local)
            })?;
        if disposition.is_virtualized() {
            Ok((name, self.pipeline.after_read(value)))
        } else {
            Ok((name, value))
        }
    }

    /// Counts summed over every store holding the key; class and descriptor
    /// length from the highest-priority one.
    pub fn query_info(&mut self) -> Result<KeyInfo, RegistryError> {
        let mut merged: Option<KeyInfo> = None;
        for disposition in Disposition::PRIORITY {
            let info = match resolve(
                &mut self.cache,
                &self.factory,
                &self.identity,
                disposition,
                self.access.read_only(),
            )
            .and_then(KeyImplementation::query_info)
            {
                Ok(info) => info,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            match merged.as_mut() {
                Some(top) => top.absorb(&info),
                None => merged = Some(info),
            }
        }
        merged.ok_or(RegistryError::NotFound)
    }

    /// Descriptor of the highest-priority store that has one.
    pub fn key_security(&mut self) -> Result<Vec<u8>, RegistryError> {
        let mut found_key = false;
        for disposition in Disposition::PRIORITY {
            let descriptor = match resolve(
                &mut self.cache,
                &self.factory,
                &self.identity,
                disposition,
                self.access.read_only(),
            )
            .and_then(KeyImplementation::security)
            {
                Ok(descriptor) => descriptor,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            found_key = true;
            if !descriptor.is_empty() {
                return Ok(descriptor);
            }
        }
        if found_key {
            Ok(Vec::new())
        } else {
            Err(RegistryError::NotFound)
        }
    }

    pub fn set_key_security(&mut self, descriptor: &[u8]) -> Result<(), RegistryError> {
        if !self.access.allows_write_dac() {
            return Err(RegistryError::AccessDenied);
        }
        let diff = resolve_writable(&mut self.cache, &self.factory, &self.identity, self.access)?;
        diff.set_security(descriptor)
    }
}
