use super::node::{KeyNode, filetime_now};
use super::offline::OfflineHive;
use crate::identity::KeyAccess;
use crate::key_impl::{Disposition, KeyInfo};
use crate::tombstone;
use crate::value::RegValue;
use shared::errors::RegistryError;
use std::sync::Arc;

/// One key inside an offline hive.
///
/// Holds the hive and the native path rather than a node reference, so a key
/// whose node was deleted underneath it reports `NotFound` instead of dangling.
pub struct OfflineHiveKey {
    hive: Arc<OfflineHive>,
    path: Vec<String>,
    disposition: Disposition,
    access: KeyAccess,
}

impl OfflineHiveKey {
    pub(crate) fn new(
        hive: Arc<OfflineHive>,
        path: Vec<String>,
        disposition: Disposition,
        access: KeyAccess,
    ) -> Self {
        Self {
            hive,
            path,
            disposition,
            access,
        }
    }

    pub fn disposition(&self) -> Disposition {
        self.disposition
    }

    pub fn access(&self) -> KeyAccess {
        self.access
    }

    pub fn hive(&self) -> &Arc<OfflineHive> {
        &self.hive
    }

    fn with_node<R>(&self, f: impl FnOnce(&KeyNode) -> R) -> Result<R, RegistryError> {
        self.hive
            .read(|root| root.descend(&self.path).map(f))
            .ok_or(RegistryError::NotFound)
    }

    fn with_node_mut<R>(
        &self,
        f: impl FnOnce(&mut KeyNode) -> Result<R, RegistryError>,
    ) -> Result<R, RegistryError> {
        self.hive.write(|root| {
            let node = root.descend_mut(&self.path).ok_or(RegistryError::NotFound)?;
            f(node)
        })
    }

    pub fn get_value(&self, name: &str) -> Result<RegValue, RegistryError> {
        if !self.access.allows_query() {
            return Err(RegistryError::AccessDenied);
        }
        if tombstone::is_reserved(name) {
            return Err(RegistryError::NotFound);
        }
        self.with_node(|node| node.value(name).cloned())?
            .ok_or(RegistryError::NotFound)
    }

    pub fn set_value(&self, name: &str, value: &RegValue) -> Result<(), RegistryError> {
        if !self.access.allows_set_value() || tombstone::is_reserved(name) {
            return Err(RegistryError::AccessDenied);
        }
        self.with_node_mut(|node| {
            node.set_value(name, value.clone());
            Ok(())
        })
    }

    pub fn delete_value(&self, name: &str) -> Result<(), RegistryError> {
        if !self.access.allows_set_value() {
            return Err(RegistryError::AccessDenied);
        }
        if tombstone::is_reserved(name) {
            return Err(RegistryError::NotFound);
        }
        self.with_node_mut(|node| node.remove_value(name).map(drop).ok_or(RegistryError::NotFound))
    }

    pub fn enum_subkey(&self, index: u32) -> Result<String, RegistryError> {
        if !self.access.allows_enumerate() {
            return Err(RegistryError::AccessDenied);
        }
        self.with_node(|node| node.subkeys.get(index as usize).map(|sub| sub.name.clone()))?
            .ok_or(RegistryError::NoMoreItems)
    }

    /// Value enumeration skips tombstone entries without consuming an index.
    pub fn enum_value(&self, index: u32) -> Result<(String, RegValue), RegistryError> {
        if !self.access.allows_query() {
            return Err(RegistryError::AccessDenied);
        }
        self.with_node(|node| {
            node.values
                .iter()
                .filter(|(name, _)| !tombstone::is_reserved(name))
                .nth(index as usize)
                .cloned()
        })?
        .ok_or(RegistryError::NoMoreItems)
    }

    pub fn query_info(&self) -> Result<KeyInfo, RegistryError> {
        self.with_node(|node| node.info(|name| !tombstone::is_reserved(name)))
    }

    pub fn security(&self) -> Result<Vec<u8>, RegistryError> {
        self.with_node(|node| node.security.clone())
    }

    pub fn set_security(&self, descriptor: &[u8]) -> Result<(), RegistryError> {
        if !self.access.allows_write_dac() {
            return Err(RegistryError::AccessDenied);
        }
        self.with_node_mut(|node| {
            node.security = descriptor.to_vec();
            node.last_write_time = filetime_now();
            Ok(())
        })
    }
}
