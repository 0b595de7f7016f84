//! A persistent, lockable key tree backed by a single hive file.
//!
//! ## Locking
//! Opening a hive takes an exclusive OS lock on `<path>.lock` and holds it until
//! [`OfflineHive::close`]. A second open of the same path, from this process or
//! another, fails with `FileLockHeld`.
//!
//! ## Saving
//! Saves are whole-file: the tree is encoded to `<path>.tmp`, synced, then
//! renamed over the original. A crash before the rename leaves the original
//! intact. `save` is serialized by its own mutex and skips work when the dirty
//! flag is clear, so the periodic flusher and caller-triggered flushes can race
//! harmlessly.

use super::codec;
use super::key::OfflineHiveKey;
use super::node::KeyNode;
use crate::guard::ScopeGuard;
use crate::identity::{KeyAccess, KeyIdentity};
use crate::key_impl::Disposition;
use crate::tombstone;
use fs4::FileExt;
use log::{debug, info, warn};
use shared::constants::{HIVE_LOCK_SUFFIX, HIVE_TEMP_SUFFIX};
use shared::errors::RegistryError;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Whether a hive may be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HiveAccess {
    ReadOnly,
    ReadWrite,
}

pub struct OfflineHive {
    path: PathBuf,
    access: HiveAccess,
    tree: RwLock<KeyNode>,
    dirty: AtomicBool,
    save_lock: Mutex<()>,
    lock_file: Mutex<Option<File>>,
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> RegistryError + '_ {
    move |source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl OfflineHive {
    /// Locks and loads the hive at `path`.
    ///
    /// A missing file is created empty (and marked dirty so the first save
    /// materializes it) only when `create_if_missing` is set on a writable
    /// hive; otherwise it is `FileNotFound`.
    pub fn open(
        path: &Path,
        access: HiveAccess,
        create_if_missing: bool,
    ) -> Result<Self, RegistryError> {
        let lock_path = sidecar(path, HIVE_LOCK_SUFFIX);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(io_error(&lock_path))?;
        if let Err(e) = lock_file.try_lock_exclusive() {
            debug!("Lock on {} refused: {e}", lock_path.display());
            return Err(RegistryError::FileLockHeld {
                path: path.to_path_buf(),
            });
        }

        let (tree, dirty) = match fs::read(path) {
            Ok(bytes) => (codec::decode_file(&bytes, path)?, false),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if !(create_if_missing && access == HiveAccess::ReadWrite) {
                    return Err(RegistryError::FileNotFound {
                        path: path.to_path_buf(),
                    });
                }
                info!("Creating new hive at {}", path.display());
                (KeyNode::new(""), true)
            }
            Err(e) => return Err(io_error(path)(e)),
        };

        debug!("Opened hive {} ({:?})", path.display(), access);
        Ok(Self {
            path: path.to_path_buf(),
            access,
            tree: RwLock::new(tree),
            dirty: AtomicBool::new(dirty),
            save_lock: Mutex::new(()),
            lock_file: Mutex::new(Some(lock_file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.access == HiveAccess::ReadOnly
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&KeyNode) -> R) -> R {
        let tree = self.tree.read().unwrap_or_else(PoisonError::into_inner);
        f(&tree)
    }

    /// Runs a mutation and marks the hive dirty. Read-only hives refuse.
    pub(crate) fn write<R>(
        &self,
        f: impl FnOnce(&mut KeyNode) -> Result<R, RegistryError>,
    ) -> Result<R, RegistryError> {
        if self.is_read_only() {
            return Err(RegistryError::AccessDenied);
        }
        let mut tree = self.tree.write().unwrap_or_else(PoisonError::into_inner);
        let result = f(&mut tree)?;
        self.dirty.store(true, Ordering::Release);
        Ok(result)
    }

    pub fn key_exists(&self, identity: &KeyIdentity) -> bool {
        let path = identity.native_segments();
        self.read(|root| root.descend(&path).is_some())
    }

    /// Key implementation for `identity` if this hive physically holds it.
    pub fn try_open_key(
        self: &Arc<Self>,
        identity: &KeyIdentity,
        disposition: Disposition,
        access: KeyAccess,
    ) -> Option<OfflineHiveKey> {
        let path = identity.native_segments();
        let exists = self.read(|root| root.descend(&path).is_some());
        exists.then(|| OfflineHiveKey::new(Arc::clone(self), path, disposition, access))
    }

    /// Opens `identity`, creating it and every missing ancestor. Tombstones
    /// along the path are cleared so the recreated key is visible again.
    /// The flag reports whether the key itself was created.
    pub fn create_key(
        self: &Arc<Self>,
        identity: &KeyIdentity,
        class: Option<&str>,
        disposition: Disposition,
        access: KeyAccess,
    ) -> Result<(OfflineHiveKey, bool), RegistryError> {
        let path = identity.native_segments();
        let created = self.write(|root| {
            if tombstone::clear_along(root, &path) {
                debug!("Cleared tombstone on the way to {identity}");
            }
            let (node, created) = root.create_path(&path);
            if created {
                node.class = class.map(str::to_string);
            }
            Ok(created)
        })?;
        Ok((
            OfflineHiveKey::new(Arc::clone(self), path, disposition, access),
            created,
        ))
    }

    /// Removes the key and its subtree. Returns whether anything was removed.
    pub fn delete_key(&self, identity: &KeyIdentity) -> Result<bool, RegistryError> {
        let path = identity.native_segments();
        let Some((leaf, parent)) = path.split_last() else {
            return Err(RegistryError::AccessDenied);
        };
        if !self.read(|root| root.descend(&path).is_some()) {
            return Ok(false);
        }
        self.write(|root| {
            Ok(root
                .descend_mut(parent)
                .and_then(|node| node.remove_child(leaf))
                .is_some())
        })
    }

    pub fn is_tombstoned(&self, identity: &KeyIdentity) -> bool {
        let path = identity.native_segments();
        self.read(|root| tombstone::covers(root, &path))
    }

    /// Records that `identity` is deleted. The parent container is created in
    /// this hive when needed; no values are copied into it.
    pub fn write_tombstone(&self, identity: &KeyIdentity) -> Result<(), RegistryError> {
        let path = identity.native_segments();
        let Some((leaf, parent)) = path.split_last() else {
            return Err(RegistryError::AccessDenied);
        };
        self.write(|root| {
            let (node, _) = root.create_path(parent);
            tombstone::mark(node, leaf);
            Ok(())
        })
    }

    /// Writes the tree to disk if it changed since the last save.
    ///
    /// Returns `Ok(true)` when a file was written, `Ok(false)` for a no-op.
    pub fn save(&self) -> Result<bool, RegistryError> {
        if self.is_read_only() || !self.is_dirty() {
            return Ok(false);
        }
        let _serialized = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);
        // Re-check under the lock: a concurrent save may have just finished.
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        match self.write_snapshot() {
            Ok(()) => {
                debug!("Saved hive {}", self.path.display());
                Ok(true)
            }
            Err(e) => {
                self.dirty.store(true, Ordering::Release);
                Err(e)
            }
        }
    }

    fn write_snapshot(&self) -> Result<(), RegistryError> {
        let bytes = self.read(codec::encode_file);
        let temp = sidecar(&self.path, HIVE_TEMP_SUFFIX);

        match fs::remove_file(&temp) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(io_error(&temp)(e)),
            _ => {}
        }

        let cleanup = ScopeGuard::new(|| {
            let _ = fs::remove_file(&temp);
        });
        let mut file = File::create(&temp).map_err(io_error(&temp))?;
        file.write_all(&bytes).map_err(io_error(&temp))?;
        file.sync_all().map_err(io_error(&temp))?;
        drop(file);

        fs::rename(&temp, &self.path).map_err(io_error(&self.path))?;
        cleanup.dismiss();
        Ok(())
    }

    /// Final save (writable hives) followed by lock release. Failures are
    /// logged; the lock is always released. Later calls do nothing.
    pub fn close(&self) {
        let mut lock = self.lock_file.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(file) = lock.take() else {
            return;
        };
        if !self.is_read_only() {
            if let Err(e) = self.save() {
                warn!("Final save of {} failed: {e}", self.path.display());
            }
        }
        if let Err(e) = FileExt::unlock(&file) {
            warn!("Unlocking {} failed: {e}", self.path.display());
        }
        debug!("Closed hive {}", self.path.display());
    }
}

impl Drop for OfflineHive {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::RegValue;
    use std::time::Duration;
    use tempfile::TempDir;

    fn id(path: &str) -> KeyIdentity {
        KeyIdentity::parse(path).expect("valid path")
    }

    fn open_rw(path: &Path) -> Arc<OfflineHive> {
        Arc::new(OfflineHive::open(path, HiveAccess::ReadWrite, true).expect("open hive"))
    }

    #[test]
    fn missing_read_only_hive_is_file_not_found() {
        let dir = TempDir::new().unwrap();
        let err = OfflineHive::open(&dir.path().join("base.hive"), HiveAccess::ReadOnly, true)
            .err()
            .expect("must fail");
        assert!(matches!(err, RegistryError::FileNotFound { .. }));
    }

    #[test]
    fn second_open_hits_the_lock() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("diff.hive");
        let first = open_rw(&path);
        let err = OfflineHive::open(&path, HiveAccess::ReadWrite, true)
            .err()
            .expect("locked");
        assert!(matches!(err, RegistryError::FileLockHeld { .. }));

        first.close();
        drop(first);
        OfflineHive::open(&path, HiveAccess::ReadWrite, true).expect("lock released");
    }

    #[test]
    fn create_key_creates_ancestors() {
        let dir = TempDir::new().unwrap();
        let hive = open_rw(&dir.path().join("diff.hive"));
        let (_, created) = hive
            .create_key(&id(r"HKLM\Software\Vendor\App"), Some("cls"), Disposition::Diff, KeyAccess::KEY_ALL_ACCESS)
            .unwrap();
        assert!(created);
        assert!(hive.key_exists(&id(r"HKLM\Software\Vendor")));
        assert!(hive.try_open_key(&id(r"HKLM\software\vendor\app"), Disposition::Diff, KeyAccess::KEY_READ).is_some());
        assert!(hive.try_open_key(&id(r"HKLM\Software\Other"), Disposition::Diff, KeyAccess::KEY_READ).is_none());
    }

    #[test]
    fn save_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("diff.hive");
        let hive = open_rw(&path);
        let (key, _) = hive
            .create_key(&id(r"HKCU\Software\Vendor"), None, Disposition::Diff, KeyAccess::KEY_ALL_ACCESS)
            .unwrap();
        key.set_value("Version", &RegValue::dword(3)).unwrap();

        assert!(hive.save().unwrap());
        let written = fs::metadata(&path).unwrap().modified().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(!hive.save().unwrap());
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), written);
        assert!(!hive.is_dirty());
    }

    #[test]
    fn reopened_hive_keeps_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("diff.hive");
        {
            let hive = open_rw(&path);
            let (key, _) = hive
                .create_key(&id(r"HKLM\Software\Vendor"), None, Disposition::Diff, KeyAccess::KEY_ALL_ACCESS)
                .unwrap();
            key.set_value("Name", &RegValue::sz("overlay")).unwrap();
            hive.close();
        }
        let hive = Arc::new(OfflineHive::open(&path, HiveAccess::ReadOnly, false).unwrap());
        let key = hive
            .try_open_key(&id(r"HKLM\Software\Vendor"), Disposition::Base, KeyAccess::KEY_READ)
            .expect("persisted");
        assert_eq!(key.get_value("Name").unwrap(), RegValue::sz("overlay"));
    }

    #[test]
    fn interrupted_save_leaves_original_loadable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("diff.hive");
        {
            let hive = open_rw(&path);
            hive.create_key(&id(r"HKLM\Software\Kept"), None, Disposition::Diff, KeyAccess::KEY_ALL_ACCESS)
                .unwrap();
            hive.close();
        }
        // A crash between writing the temp file and the rename leaves this behind.
        let temp = sidecar(&path, HIVE_TEMP_SUFFIX);
        fs::write(&temp, b"half-written garbage").unwrap();

        let hive = open_rw(&path);
        assert!(hive.key_exists(&id(r"HKLM\Software\Kept")));

        hive.create_key(&id(r"HKLM\Software\Next"), None, Disposition::Diff, KeyAccess::KEY_ALL_ACCESS)
            .unwrap();
        assert!(hive.save().unwrap());
        assert!(!temp.exists());
    }

    #[test]
    fn read_only_hive_refuses_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("base.hive");
        open_rw(&path).close();
        let hive = Arc::new(OfflineHive::open(&path, HiveAccess::ReadOnly, false).unwrap());
        let err = hive
            .create_key(&id(r"HKLM\Software\X"), None, Disposition::Base, KeyAccess::KEY_ALL_ACCESS)
            .err()
            .expect("read-only");
        assert!(matches!(err, RegistryError::AccessDenied));
        assert!(!hive.save().unwrap());
    }

    #[test]
    fn tombstones_round_trip_through_create() {
        let dir = TempDir::new().unwrap();
        let hive = open_rw(&dir.path().join("diff.hive"));
        let target = id(r"HKLM\Software\Vendor\App");
        hive.write_tombstone(&target).unwrap();
        assert!(hive.is_tombstoned(&target));
        assert!(hive.is_tombstoned(&id(r"HKLM\Software\Vendor\App\Sub")));
        assert!(!hive.key_exists(&target));

        hive.create_key(&target, None, Disposition::Diff, KeyAccess::KEY_ALL_ACCESS)
            .unwrap();
        assert!(!hive.is_tombstoned(&target));
    }

    #[test]
    fn delete_removes_the_subtree() {
        let dir = TempDir::new().unwrap();
        let hive = open_rw(&dir.path().join("diff.hive"));
        hive.create_key(&id(r"HKLM\Software\Vendor\App"), None, Disposition::Diff, KeyAccess::KEY_ALL_ACCESS)
            .unwrap();
        assert!(hive.delete_key(&id(r"HKLM\Software\Vendor")).unwrap());
        assert!(!hive.key_exists(&id(r"HKLM\Software\Vendor\App")));
        assert!(!hive.delete_key(&id(r"HKLM\Software\Vendor")).unwrap());
    }
}
