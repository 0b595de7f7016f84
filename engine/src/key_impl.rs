//! The closed set of backing stores and the key implementation each one
//! hands out.

use crate::hive::OfflineHiveKey;
use crate::identity::KeyAccess;
use crate::live::LiveRegistryKey;
use crate::value::RegValue;
use shared::errors::RegistryError;
use std::fmt;

/// Which backing store a key implementation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    Diff,
    Base,
    WindowsLive,
}

impl Disposition {
    /// Order used when a single result is wanted.
    pub const PRIORITY: [Disposition; 3] =
        [Disposition::Diff, Disposition::Base, Disposition::WindowsLive];

    /// Order used to concatenate enumerations.
    pub const TRAVERSAL: [Disposition; 3] =
        [Disposition::WindowsLive, Disposition::Base, Disposition::Diff];

    /// Stable index for per-store arrays.
    pub const fn slot(self) -> usize {
        match self {
            Disposition::Diff => 0,
            Disposition::Base => 1,
            Disposition::WindowsLive => 2,
        }
    }

    /// Offline stores, the only ones value alteration applies to.
    pub const fn is_virtualized(self) -> bool {
        !matches!(self, Disposition::WindowsLive)
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Disposition::Diff => "diff",
            Disposition::Base => "base",
            Disposition::WindowsLive => "live",
        };
        f.write_str(name)
    }
}

/// `RegQueryInfoKey` data. Lengths are in UTF-16 units except
/// `max_value_len`, which is in bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyInfo {
    pub subkeys: u32,
    pub max_subkey_len: u32,
    pub max_class_len: u32,
    pub values: u32,
    pub max_value_name_len: u32,
    pub max_value_len: u32,
    pub security_descriptor_len: u32,
    pub last_write_time: u64,
    pub class: Option<String>,
}

impl KeyInfo {
    /// Folds in the info of a lower-priority store: counts add up, maxima and
    /// the write time take the larger value, class and descriptor length stay.
    pub fn absorb(&mut self, lower: &KeyInfo) {
        self.subkeys = self.subkeys.saturating_add(lower.subkeys);
        self.values = self.values.saturating_add(lower.values);
        self.max_subkey_len = self.max_subkey_len.max(lower.max_subkey_len);
        self.max_class_len = self.max_class_len.max(lower.max_class_len);
        self.max_value_name_len = self.max_value_name_len.max(lower.max_value_name_len);
        self.max_value_len = self.max_value_len.max(lower.max_value_len);
        self.last_write_time = self.last_write_time.max(lower.last_write_time);
    }
}

/// A key opened in one concrete store.
pub enum KeyImplementation {
    Offline(OfflineHiveKey),
    Live(LiveRegistryKey),
}

impl KeyImplementation {
    pub fn disposition(&self) -> Disposition {
        match self {
            KeyImplementation::Offline(key) => key.disposition(),
            KeyImplementation::Live(_) => Disposition::WindowsLive,
        }
    }

    pub fn access(&self) -> KeyAccess {
        match self {
            KeyImplementation::Offline(key) => key.access(),
            KeyImplementation::Live(key) => key.access(),
        }
    }

    pub fn get_value(&self, name: &str) -> Result<RegValue, RegistryError> {
        match self {
            KeyImplementation::Offline(key) => key.get_value(name),
            KeyImplementation::Live(key) => key.get_value(name),
        }
    }

    pub fn set_value(&self, name: &str, value: &RegValue) -> Result<(), RegistryError> {
        match self {
            KeyImplementation::Offline(key) => key.set_value(name, value),
            KeyImplementation::Live(_) => Err(RegistryError::AccessDenied),
        }
    }

    pub fn delete_value(&self, name: &str) -> Result<(), RegistryError> {
        match self {
            KeyImplementation::Offline(key) => key.delete_value(name),
            KeyImplementation::Live(_) => Err(RegistryError::AccessDenied),
        }
    }

    pub fn enum_subkey(&self, index: u32) -> Result<String, RegistryError> {
        match self {
            KeyImplementation::Offline(key) => key.enum_subkey(index),
            KeyImplementation::Live(key) => key.enum_subkey(index),
        }
    }

    pub fn enum_value(&self, index: u32) -> Result<(String, RegValue), RegistryError> {
        match self {
            KeyImplementation::Offline(key) => key.enum_value(index),
            KeyImplementation::Live(key) => key.enum_value(index),
        }
    }

    pub fn query_info(&self) -> Result<KeyInfo, RegistryError> {
        match self {
            KeyImplementation::Offline(key) => key.query_info(),
            KeyImplementation::Live(key) => key.query_info(),
        }
    }

    pub fn security(&self) -> Result<Vec<u8>, RegistryError> {
        match self {
            KeyImplementation::Offline(key) => key.security(),
            KeyImplementation::Live(key) => key.security(),
        }
    }

    pub fn set_security(&self, descriptor: &[u8]) -> Result<(), RegistryError> {
        match self {
            KeyImplementation::Offline(key) => key.set_security(descriptor),
            KeyImplementation::Live(_) => Err(RegistryError::AccessDenied),
        }
    }
}

impl fmt::Debug for KeyImplementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyImplementation::Offline(key) => f
                .debug_struct("Offline")
                .field("disposition", &key.disposition())
                .field("hive", &key.hive().path())
                .finish(),
            KeyImplementation::Live(key) => {
                f.debug_struct("Live").field("handle", &key.handle()).finish()
            }
        }
    }
}
