//! Maps `(identity, disposition, access)` to a concrete key implementation.
//!
//! Rules, in order:
//! 1. Outside Diff, a key tombstoned in the Diff hive does not exist.
//! 2. System keys resolve only through the live registry and refuse write
//!    access everywhere.
//! 3. Opening a key for write in Diff when it only exists in a lower store
//!    materializes an empty Diff container (copy-on-write of the key, never of
//!    its values).

use crate::hive::OfflineHive;
use crate::identity::{KeyAccess, KeyIdentity, Wow64Context};
use crate::key_impl::{Disposition, KeyImplementation};
use crate::live::{LiveRegistry, LiveRegistryKey};
use crate::policy::KeyPolicy;
use log::{debug, warn};
use shared::errors::RegistryError;
use std::sync::Arc;

/// Outcome reported by [`VirtualKeyFactory::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateDisposition {
    CreatedNew,
    OpenedExisting,
}

/// Result of a resolution across the stores: the implementation found first
/// and the access it was granted (possibly relaxed to read-only).
pub struct Resolved {
    pub implementation: KeyImplementation,
    pub access: KeyAccess,
}

pub struct VirtualKeyFactory {
    diff: Arc<OfflineHive>,
    base: Option<Arc<OfflineHive>>,
    live: Arc<dyn LiveRegistry>,
    policy: KeyPolicy,
    wow64: Wow64Context,
}

impl VirtualKeyFactory {
    pub fn new(
        diff: Arc<OfflineHive>,
        base: Option<Arc<OfflineHive>>,
        live: Arc<dyn LiveRegistry>,
        policy: KeyPolicy,
    ) -> Self {
        let wow64 = Wow64Context::current(live.is_os_64bit());
        Self {
            diff,
            base,
            live,
            policy,
            wow64,
        }
    }

    pub fn diff(&self) -> &Arc<OfflineHive> {
        &self.diff
    }

    pub fn base(&self) -> Option<&Arc<OfflineHive>> {
        self.base.as_ref()
    }

    pub fn live(&self) -> &Arc<dyn LiveRegistry> {
        &self.live
    }

    pub fn policy(&self) -> &KeyPolicy {
        &self.policy
    }

    pub fn wow64(&self) -> &Wow64Context {
        &self.wow64
    }

    /// Opens `identity` in exactly one store.
    pub fn open(
        &self,
        identity: &KeyIdentity,
        disposition: Disposition,
        access: KeyAccess,
    ) -> Result<KeyImplementation, RegistryError> {
        if disposition != Disposition::Diff && self.diff.is_tombstoned(identity) {
            return Err(RegistryError::NotFound);
        }
        if self.policy.is_system_key(identity) {
            if access.is_write() {
                return Err(RegistryError::AccessDenied);
            }
            if disposition != Disposition::WindowsLive {
                return Err(RegistryError::NotFound);
            }
        }

        match disposition {
            Disposition::Diff => {
                if let Some(key) = self.diff.try_open_key(identity, Disposition::Diff, access) {
                    return Ok(KeyImplementation::Offline(key));
                }
                if access.is_write() && self.exists_below_diff(identity) {
                    debug!("Copy-on-write: materializing {identity} in diff");
                    let (key, _) =
                        self.diff
                            .create_key(identity, None, Disposition::Diff, access)?;
                    return Ok(KeyImplementation::Offline(key));
                }
                Err(RegistryError::NotFound)
            }
            Disposition::Base => self
                .base
                .as_ref()
                .and_then(|base| base.try_open_key(identity, Disposition::Base, access))
                .map(KeyImplementation::Offline)
                .ok_or(RegistryError::NotFound),
            Disposition::WindowsLive => {
                LiveRegistryKey::open(&self.live, identity, access).map(KeyImplementation::Live)
            }
        }
    }

    /// Whether Base or the live registry holds `identity`, tombstones applied.
    pub fn exists_below_diff(&self, identity: &KeyIdentity) -> bool {
        if self.diff.is_tombstoned(identity) {
            return false;
        }
        if self.base.as_ref().is_some_and(|base| base.key_exists(identity)) {
            return true;
        }
        LiveRegistryKey::open(&self.live, identity, KeyAccess::KEY_READ).is_ok()
    }

    /// Finds the first store in priority order holding `identity`.
    ///
    /// A write request refused only because the key is a system key is
    /// retried read-only, so callers asking for more access than they use
    /// keep working.
    pub fn open_preliminarily(
        &self,
        identity: &KeyIdentity,
        access: KeyAccess,
    ) -> Result<Resolved, RegistryError> {
        let mut access = access;
        for disposition in Disposition::PRIORITY {
            let attempt = match self.open(identity, disposition, access) {
                Err(RegistryError::AccessDenied)
                    if access.is_write() && self.policy.is_system_key(identity) =>
                {
                    warn!("Write access to system key {identity} relaxed to read-only");
                    access = access.read_only();
                    self.open(identity, disposition, access)
                }
                other => other,
            };
            match attempt {
                Ok(implementation) => {
                    debug!("Resolved {identity} in {disposition}");
                    return Ok(Resolved {
                        implementation,
                        access,
                    });
                }
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(RegistryError::NotFound)
    }

    /// Opens `identity` if it exists anywhere, otherwise creates it in Diff.
    pub fn create(
        &self,
        identity: &KeyIdentity,
        access: KeyAccess,
        class: Option<&str>,
    ) -> Result<(Resolved, CreateDisposition), RegistryError> {
        match self.open_preliminarily(identity, access) {
            Ok(resolved) => return Ok((resolved, CreateDisposition::OpenedExisting)),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        if self.policy.is_system_key(identity) {
            return Err(RegistryError::AccessDenied);
        }
        let (key, created) = self
            .diff
            .create_key(identity, class, Disposition::Diff, access)?;
        debug!("Created {identity} in diff");
        let disposition = if created {
            CreateDisposition::CreatedNew
        } else {
            CreateDisposition::OpenedExisting
        };
        Ok((
            Resolved {
                implementation: KeyImplementation::Offline(key),
                access,
            },
            disposition,
        ))
    }
}
