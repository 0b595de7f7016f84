//! One overlay instance: hives, live adapter, handle table and flush worker.
//!
//! The interception layer owns a single `OverlaySession` and calls it once
//! per intercepted registry function. Handles it receives are either
//! predefined root pseudo-handles, values handed out by this session, or
//! native handles the process opened on its own.

use crate::alteration::AlterationPipeline;
use crate::config::Config;
use crate::factory::{CreateDisposition, VirtualKeyFactory};
use crate::flush::FlushWorker;
use crate::handles::{HandleTable, SharedKey};
use crate::hive::{HiveAccess, OfflineHive};
use crate::identity::{KeyAccess, KeyIdentity, PredefinedRoot};
use crate::key_impl::KeyInfo;
use crate::live::LiveRegistry;
use crate::policy::KeyPolicy;
use crate::value::{RegValue, StringMode, ValueType};
use crate::virtual_key::VirtualKey;
use log::{debug, error, info, warn};
use shared::constants::DEFAULT_FLUSH_SECONDS;
use shared::errors::{ConfigError, RegistryError};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Runtime options of a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub diff_path: PathBuf,
    pub base_path: Option<PathBuf>,
    /// `None` disables periodic saving; the Diff hive is still saved at
    /// shutdown and on `flush_key`.
    pub flush_interval: Option<Duration>,
    pub system_keys: Vec<KeyIdentity>,
}

impl SessionOptions {
    pub fn new(diff_path: impl Into<PathBuf>) -> Self {
        Self {
            diff_path: diff_path.into(),
            base_path: None,
            flush_interval: Some(Duration::from_secs(DEFAULT_FLUSH_SECONDS)),
            system_keys: Vec::new(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            diff_path: config.hives.diff.clone(),
            base_path: config.hives.base.clone(),
            flush_interval: Some(config.flush.interval()?),
            system_keys: config.policy.system_key_identities()?,
        })
    }
}

pub struct OverlaySession {
    factory: Arc<VirtualKeyFactory>,
    pipeline: Arc<AlterationPipeline>,
    handles: HandleTable,
    flusher: Mutex<Option<FlushWorker>>,
    shut_down: AtomicBool,
}

impl OverlaySession {
    /// Opens the hives (Diff created if missing, Base only if present),
    /// then starts the flush worker.
    pub fn start(
        options: SessionOptions,
        live: Arc<dyn LiveRegistry>,
        pipeline: AlterationPipeline,
    ) -> Result<Self, RegistryError> {
        let diff = Arc::new(OfflineHive::open(
            &options.diff_path,
            HiveAccess::ReadWrite,
            true,
        )?);
        let base = match &options.base_path {
            Some(path) => match OfflineHive::open(path, HiveAccess::ReadOnly, false) {
                Ok(hive) => Some(Arc::new(hive)),
                Err(RegistryError::FileNotFound { .. }) => {
                    info!("No base hive at {}; running without one", path.display());
                    None
                }
                Err(e) => return Err(e),
            },
            None => None,
        };

        let flusher = match options.flush_interval {
            Some(interval) if !interval.is_zero() => Some(
                FlushWorker::spawn(Arc::clone(&diff), interval).map_err(|source| {
                    RegistryError::Io {
                        path: options.diff_path.clone(),
                        source,
                    }
                })?,
            ),
            _ => None,
        };

        let policy = KeyPolicy::new(options.system_keys);
        let factory = Arc::new(VirtualKeyFactory::new(diff, base, live, policy));
        info!(
            "Overlay session started (diff: {}, base: {})",
            options.diff_path.display(),
            factory
                .base()
                .map_or_else(|| "none".to_string(), |b| b.path().display().to_string())
        );
        Ok(Self {
            factory,
            pipeline: Arc::new(pipeline),
            handles: HandleTable::new(),
            flusher: Mutex::new(flusher),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    pub fn diff(&self) -> &Arc<OfflineHive> {
        self.factory.diff()
    }

    fn ensure_running(&self) -> Result<(), RegistryError> {
        if self.shut_down.load(Ordering::Acquire) {
            Err(RegistryError::InvalidHandle)
        } else {
            Ok(())
        }
    }

    /// Identity behind a parent handle of any kind.
    fn resolve_parent(&self, parent: u64) -> Result<KeyIdentity, RegistryError> {
        if let Some(root) = PredefinedRoot::from_handle(parent) {
            return Ok(KeyIdentity::root(root));
        }
        if let Ok(key) = self.handles.get(parent) {
            let key = key.lock().unwrap_or_else(PoisonError::into_inner);
            return Ok(key.identity().clone());
        }
        let live = self.factory.live();
        let native = live
            .native_key_path(parent)
            .ok_or(RegistryError::InvalidHandle)?;
        debug!("Foreign handle {parent:#x} is {native}");
        KeyIdentity::from_native_path(&native, live.current_user_sid().as_deref())
    }

    fn new_key(&self, identity: KeyIdentity, access: KeyAccess) -> Result<VirtualKey, RegistryError> {
        let resolved = self.factory.open_preliminarily(&identity, access)?;
        Ok(VirtualKey::new(
            identity,
            resolved,
            Arc::clone(&self.factory),
            Arc::clone(&self.pipeline),
        ))
    }

    /// The virtual key an operation targets. Roots and foreign handles get
    /// a key that lives only for the call; it is resolved read-only, so only
    /// an actual write reaches Diff.
    fn key_for(&self, handle: u64) -> Result<SharedKey, RegistryError> {
        self.ensure_running()?;
        if let Ok(key) = self.handles.get(handle) {
            return Ok(key);
        }
        let identity = self.resolve_parent(handle)?;
        let key = self
            .new_key(identity, KeyAccess::KEY_READ)?
            .with_granted_access(KeyAccess::KEY_ALL_ACCESS);
        Ok(Arc::new(Mutex::new(key)))
    }

    fn with_key<R>(
        &self,
        handle: u64,
        f: impl FnOnce(&mut VirtualKey) -> Result<R, RegistryError>,
    ) -> Result<R, RegistryError> {
        let key = self.key_for(handle)?;
        let mut key = key.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut key)
    }

    fn build_identity(
        &self,
        parent: u64,
        subkey: &str,
        access: KeyAccess,
    ) -> Result<KeyIdentity, RegistryError> {
        let parent = self.resolve_parent(parent)?;
        Ok(KeyIdentity::build(
            &parent,
            access.wow64_option(),
            subkey,
            self.factory.wow64(),
        ))
    }

    pub fn open_key(&self, parent: u64, subkey: &str, access: KeyAccess) -> Result<u64, RegistryError> {
        self.ensure_running()?;
        let identity = self.build_identity(parent, subkey, access)?;
        let key = self.new_key(identity, access)?;
        Ok(self.handles.insert(key))
    }

    pub fn create_key(
        &self,
        parent: u64,
        subkey: &str,
        class: Option<&str>,
        access: KeyAccess,
    ) -> Result<(u64, CreateDisposition), RegistryError> {
        self.ensure_running()?;
        let identity = self.build_identity(parent, subkey, access)?;
        let (resolved, disposition) = self.factory.create(&identity, access, class)?;
        let key = VirtualKey::new(
            identity,
            resolved,
            Arc::clone(&self.factory),
            Arc::clone(&self.pipeline),
        );
        Ok((self.handles.insert(key), disposition))
    }

    /// Closing a predefined root is accepted and does nothing.
    pub fn close_key(&self, handle: u64) -> Result<(), RegistryError> {
        if PredefinedRoot::from_handle(handle).is_some() {
            return Ok(());
        }
        self.handles.remove(handle).map(drop)
    }

    pub fn query_value(
        &self,
        handle: u64,
        name: &str,
        mode: StringMode,
    ) -> Result<RegValue, RegistryError> {
        let value = self.with_key(handle, |key| key.get_value(name))?;
        Ok(RegValue::new(value.kind, value.to_wire(mode)))
    }

    pub fn query_subkey_value(
        &self,
        handle: u64,
        subkey: &str,
        name: &str,
        mode: StringMode,
    ) -> Result<RegValue, RegistryError> {
        let value = self.with_key(handle, |key| key.query_subkey_value(subkey, name))?;
        Ok(RegValue::new(value.kind, value.to_wire(mode)))
    }

    pub fn set_value(
        &self,
        handle: u64,
        name: &str,
        kind: ValueType,
        data: &[u8],
        mode: StringMode,
    ) -> Result<(), RegistryError> {
        let value = RegValue::from_wire(kind, data, mode);
        self.with_key(handle, |key| key.set_value(name, value))
    }

    /// Deletes `subkey` below `handle`, or the key itself when `subkey` is
    /// empty.
    pub fn delete_key(&self, handle: u64, subkey: &str) -> Result<(), RegistryError> {
        self.with_key(handle, |key| {
            if subkey.is_empty() {
                key.delete()
            } else {
                key.delete_subkey(subkey)
            }
        })
    }

    pub fn delete_value(&self, handle: u64, name: &str) -> Result<(), RegistryError> {
        self.with_key(handle, |key| key.delete_value(name))
    }

    pub fn enum_key(&self, handle: u64, index: u32) -> Result<String, RegistryError> {
        self.with_key(handle, |key| key.enum_key(index))
    }

    pub fn enum_value(
        &self,
        handle: u64,
        index: u32,
        mode: StringMode,
    ) -> Result<(String, RegValue), RegistryError> {
        let (name, value) = self.with_key(handle, |key| key.enum_value(index))?;
        let wire = value.to_wire(mode);
        Ok((name, RegValue::new(value.kind, wire)))
    }

    pub fn query_info_key(&self, handle: u64) -> Result<KeyInfo, RegistryError> {
        self.with_key(handle, VirtualKey::query_info)
    }

    pub fn key_security(&self, handle: u64) -> Result<Vec<u8>, RegistryError> {
        self.with_key(handle, VirtualKey::key_security)
    }

    pub fn set_key_security(&self, handle: u64, descriptor: &[u8]) -> Result<(), RegistryError> {
        self.with_key(handle, |key| key.set_key_security(descriptor))
    }

    /// Saves the Diff hive now (`RegFlushKey`).
    pub fn flush_key(&self, handle: u64) -> Result<(), RegistryError> {
        self.key_for(handle)?;
        self.factory.diff().save().map(drop)
    }

    /// Stops the flush worker, abandons every handle still open, saves the
    /// Diff hive and releases both hive locks. Later calls do nothing.
    ///
    /// Abandoned keys are leaked on purpose: late finalization order is not
    /// safe when the host process is exiting.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let worker = self
            .flusher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut worker) = worker {
            worker.stop();
        }

        let abandoned = self.handles.drain();
        if !abandoned.is_empty() {
            warn!("Abandoning {} open handle(s) at shutdown", abandoned.len());
        }
        for key in abandoned {
            std::mem::forget(key);
        }

        let diff = self.factory.diff();
        if let Err(e) = diff.save() {
            error!("Saving {} at shutdown failed: {e}", diff.path().display());
        }
        diff.close();
        if let Some(base) = self.factory.base() {
            base.close();
        }
        info!("Overlay session shut down");
    }
}

impl Drop for OverlaySession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alteration::PrefixRebase;
    use crate::key_impl::Disposition;
    use crate::live::MemoryRegistry;
    use crate::testing::seed_hive;
    use tempfile::TempDir;

    const HKLM: u64 = PredefinedRoot::LocalMachine.handle_value();
    const HKCU: u64 = PredefinedRoot::CurrentUser.handle_value();
    const HKCR: u64 = PredefinedRoot::ClassesRoot.handle_value();
    const SID: &str = "S-1-5-21-1000";

    struct Fixture {
        dir: TempDir,
        memory: Arc<MemoryRegistry>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            seed_hive(&dir.path().join("base.hive"), |hive| {
                hive.set(r"HKLM\Software\Vendor", "Edition", RegValue::sz("base"));
                hive.set(r"HKLM\Software\Vendor\Plugins\Alpha", "Enabled", RegValue::dword(1));
                hive.set(r"HKCR\CLSID\{00000000-0000-0000-0000-000000000001}", "", RegValue::sz("Thing"));
            });
            let memory = Arc::new(MemoryRegistry::new().with_user_sid(SID));
            memory.seed_value(r"HKLM\Software\Vendor", "Edition", RegValue::sz("live"));
            memory.seed_key(r"HKLM\Software\Vendor\Plugins\Live");
            memory.seed_value(r"HKLM\SYSTEM\CurrentControlSet\Control", "Mode", RegValue::dword(3));
            memory.seed_key(r"HKLM\Software\Wow6432Node\Vendor");
            memory.seed_key(r"HKCU\Software");
            Self { dir, memory }
        }

        fn options(&self) -> SessionOptions {
            let mut options = SessionOptions::new(self.dir.path().join("diff.hive"));
            options.base_path = Some(self.dir.path().join("base.hive"));
            options.flush_interval = None;
            options
        }

        fn start(&self) -> OverlaySession {
            OverlaySession::start(self.options(), self.memory.clone(), AlterationPipeline::new())
                .expect("session starts")
        }
    }

    fn text(value: RegValue) -> String {
        value.as_string().expect("string value")
    }

    #[test]
    fn open_query_close() {
        let fx = Fixture::new();
        let session = fx.start();
        let key = session.open_key(HKLM, r"Software\Vendor", KeyAccess::KEY_READ).unwrap();
        assert_eq!(text(session.query_value(key, "Edition", StringMode::Unicode).unwrap()), "base");
        session.close_key(key).unwrap();
        assert!(matches!(
            session.query_value(key, "Edition", StringMode::Unicode),
            Err(RegistryError::InvalidHandle)
        ));
        assert_eq!(fx.memory.open_handles(), 0);
    }

    #[test]
    fn writes_land_in_diff_and_survive_a_restart() {
        let fx = Fixture::new();
        {
            let session = fx.start();
            let (key, how) = session
                .create_key(HKCU, r"Software\Vendor\App", None, KeyAccess::KEY_ALL_ACCESS)
                .unwrap();
            assert_eq!(how, CreateDisposition::CreatedNew);
            let data = RegValue::sz("v2").data;
            session.set_value(key, "Version", ValueType::SZ, &data, StringMode::Unicode).unwrap();
            session.shutdown();
        }
        let session = fx.start();
        let key = session.open_key(HKCU, r"Software\Vendor\App", KeyAccess::KEY_READ).unwrap();
        assert_eq!(text(session.query_value(key, "Version", StringMode::Unicode).unwrap()), "v2");
    }

    #[test]
    fn ansi_callers_get_single_byte_strings() {
        let fx = Fixture::new();
        let session = fx.start();
        let (key, _) = session
            .create_key(HKCU, r"Software\Vendor", None, KeyAccess::KEY_ALL_ACCESS)
            .unwrap();
        session
            .set_value(key, "Name", ValueType::SZ, b"caf\xe9\0", StringMode::Ansi)
            .unwrap();
        let unicode = session.query_value(key, "Name", StringMode::Unicode).unwrap();
        assert_eq!(text(unicode), "café");
        let ansi = session.query_value(key, "Name", StringMode::Ansi).unwrap();
        assert_eq!(ansi.data, b"caf\xe9\0");
    }

    #[test]
    fn deleting_a_base_key_hides_it() {
        let fx = Fixture::new();
        let session = fx.start();
        let vendor = session.open_key(HKLM, r"Software\Vendor", KeyAccess::KEY_ALL_ACCESS).unwrap();
        session.delete_key(vendor, r"Plugins\Alpha").unwrap();
        assert!(session
            .open_key(HKLM, r"Software\Vendor\Plugins\Alpha", KeyAccess::KEY_READ)
            .unwrap_err()
            .is_not_found());
        assert!(session
            .query_subkey_value(vendor, r"Plugins\Alpha", "Enabled", StringMode::Unicode)
            .unwrap_err()
            .is_not_found());
        assert!(fx.dir.path().join("base.hive").exists());
    }

    #[test]
    fn protected_anchor_cannot_be_deleted() {
        let fx = Fixture::new();
        let session = fx.start();
        session.delete_key(HKCR, "CLSID").unwrap();
        let clsid = session.open_key(HKCR, "CLSID", KeyAccess::KEY_READ).unwrap();
        assert_eq!(
            session.enum_key(clsid, 0).unwrap(),
            "{00000000-0000-0000-0000-000000000001}"
        );
    }

    #[test]
    fn protected_anchor_delete_keeps_sandboxed_children() {
        let fx = Fixture::new();
        let session = fx.start();
        let (child, _) = session
            .create_key(HKCR, r"CLSID\{SANDBOXED}", None, KeyAccess::KEY_ALL_ACCESS)
            .unwrap();
        session
            .set_value(child, "", ValueType::DWORD, &[9, 0, 0, 0], StringMode::Unicode)
            .unwrap();
        session.close_key(child).unwrap();

        session.delete_key(HKCR, "CLSID").unwrap();
        let child = session
            .open_key(HKCR, r"CLSID\{SANDBOXED}", KeyAccess::KEY_READ)
            .expect("diff child kept");
        let value = session.query_value(child, "", StringMode::Unicode).unwrap();
        assert_eq!(value.as_dword(), Some(9));
    }

    #[test]
    fn reads_through_roots_and_foreign_handles_leave_diff_clean() {
        let fx = Fixture::new();
        fx.memory
            .register_native_handle(0x7710, r"\REGISTRY\MACHINE\Software\Vendor\Plugins\Live");
        let session = fx.start();
        session.diff().save().unwrap();

        assert!(session.query_value(HKLM, "x", StringMode::Unicode).unwrap_err().is_not_found());
        assert!(session.query_value(0x7710, "x", StringMode::Unicode).unwrap_err().is_not_found());
        session.enum_key(HKLM, 0).unwrap();
        session.query_info_key(0x7710).unwrap();
        session.key_security(HKLM).unwrap();
        session.flush_key(HKLM).unwrap();
        assert!(!session.diff().is_dirty());

        let plugins = session
            .open_key(HKLM, r"Software\Vendor\Plugins", KeyAccess::KEY_READ)
            .unwrap();
        let names: Vec<String> = (0..)
            .map_while(|i| session.enum_key(plugins, i).ok())
            .collect();
        assert_eq!(names, ["Live", "Alpha"]);

        // A write through a root handle still lands in Diff.
        session
            .set_value(HKCU, "Root", ValueType::DWORD, &[1, 0, 0, 0], StringMode::Unicode)
            .unwrap();
        assert!(session.diff().is_dirty());
        let root = session.query_value(HKCU, "Root", StringMode::Unicode).unwrap();
        assert_eq!(root.as_dword(), Some(1));
    }

    #[test]
    fn system_keys_are_live_and_read_only() {
        let fx = Fixture::new();
        let session = fx.start();
        let control = session
            .open_key(HKLM, r"SYSTEM\CurrentControlSet\Control", KeyAccess::KEY_ALL_ACCESS)
            .expect("relaxed to read-only");
        let mode = session.query_value(control, "Mode", StringMode::Unicode).unwrap();
        assert_eq!(mode.as_dword(), Some(3));
        assert!(matches!(
            session.set_value(control, "Mode", ValueType::DWORD, &[4, 0, 0, 0], StringMode::Unicode),
            Err(RegistryError::AccessDenied)
        ));
        assert!(matches!(
            session.create_key(HKLM, r"SYSTEM\Injected", None, KeyAccess::KEY_ALL_ACCESS),
            Err(RegistryError::AccessDenied)
        ));
    }

    #[test]
    fn thirty_two_bit_view_reads_the_redirected_subtree() {
        let fx = Fixture::new();
        fx.memory.seed_value(r"HKLM\Software\Wow6432Node\Vendor", "Bits", RegValue::dword(32));
        let session = fx.start();
        let access = KeyAccess::KEY_READ | KeyAccess::WOW64_32KEY;
        let key = session.open_key(HKLM, r"Software\Vendor", access).unwrap();
        let bits = session.query_value(key, "Bits", StringMode::Unicode).unwrap();
        assert_eq!(bits.as_dword(), Some(32));
    }

    #[test]
    fn thirty_two_bit_os_never_redirects() {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(MemoryRegistry::new().with_os_64bit(false));
        memory.seed_value(r"HKLM\Software\Vendor", "Bits", RegValue::dword(32));
        let mut options = SessionOptions::new(dir.path().join("diff.hive"));
        options.flush_interval = None;
        let session = OverlaySession::start(options, memory, AlterationPipeline::new()).unwrap();
        let access = KeyAccess::KEY_READ | KeyAccess::WOW64_32KEY;
        let key = session.open_key(HKLM, r"Software\Vendor", access).unwrap();
        let bits = session.query_value(key, "Bits", StringMode::Unicode).unwrap();
        assert_eq!(bits.as_dword(), Some(32));
    }

    #[test]
    fn foreign_native_handles_resolve_through_the_live_registry() {
        let fx = Fixture::new();
        fx.memory.register_native_handle(0x7700, &format!(r"\REGISTRY\USER\{SID}\Software"));
        fx.memory.register_native_handle(0x7704, r"\Device\HarddiskVolume1");
        let session = fx.start();
        let (key, _) = session
            .create_key(0x7700, "Vendor", None, KeyAccess::KEY_ALL_ACCESS)
            .unwrap();
        session
            .set_value(key, "x", ValueType::DWORD, &[1, 0, 0, 0], StringMode::Unicode)
            .unwrap();
        let again = session.open_key(HKCU, r"Software\Vendor", KeyAccess::KEY_READ).unwrap();
        assert!(session.query_value(again, "x", StringMode::Unicode).is_ok());
        assert!(matches!(
            session.open_key(0x7704, "x", KeyAccess::KEY_READ),
            Err(RegistryError::InvalidHandle)
        ));
        assert!(matches!(
            session.open_key(0x9990, "x", KeyAccess::KEY_READ),
            Err(RegistryError::InvalidHandle)
        ));
    }

    #[test]
    fn info_and_enumeration_merge_all_stores() {
        let fx = Fixture::new();
        let session = fx.start();
        let (added, _) = session
            .create_key(HKLM, r"Software\Vendor\Plugins\Diff", None, KeyAccess::KEY_ALL_ACCESS)
            .unwrap();
        session.close_key(added).unwrap();

        let plugins = session.open_key(HKLM, r"Software\Vendor\Plugins", KeyAccess::KEY_READ).unwrap();
        let info = session.query_info_key(plugins).unwrap();
        assert_eq!(info.subkeys, 3);
        let names: Vec<String> = (0..info.subkeys)
            .map(|i| session.enum_key(plugins, i).unwrap())
            .collect();
        assert_eq!(names, ["Live", "Alpha", "Diff"]);
    }

    #[test]
    fn values_from_offline_stores_are_rebased() {
        let fx = Fixture::new();
        let pipeline = AlterationPipeline::new().with(PrefixRebase::new(r"%SANDBOX%", r"C:\Sandboxed"));
        let session = OverlaySession::start(fx.options(), fx.memory.clone(), pipeline).unwrap();
        let (key, _) = session
            .create_key(HKCU, r"Software\Vendor", None, KeyAccess::KEY_ALL_ACCESS)
            .unwrap();
        let data = RegValue::sz(r"C:\Sandboxed\bin").data;
        session.set_value(key, "Bin", ValueType::SZ, &data, StringMode::Unicode).unwrap();
        assert_eq!(
            text(session.query_value(key, "Bin", StringMode::Unicode).unwrap()),
            r"C:\Sandboxed\bin"
        );

        let stored = session
            .diff()
            .try_open_key(
                &KeyIdentity::parse(r"HKCU\Software\Vendor").unwrap(),
                Disposition::Diff,
                KeyAccess::KEY_READ,
            )
            .expect("in diff")
            .get_value("Bin")
            .unwrap();
        assert_eq!(text(stored), r"%SANDBOX%\bin");
    }

    #[test]
    fn second_session_on_the_same_diff_is_refused() {
        let fx = Fixture::new();
        let _first = fx.start();
        let err = OverlaySession::start(fx.options(), fx.memory.clone(), AlterationPipeline::new())
            .err()
            .expect("locked");
        assert!(matches!(err, RegistryError::FileLockHeld { .. }));
    }

    #[test]
    fn missing_base_is_optional() {
        let dir = TempDir::new().unwrap();
        let mut options = SessionOptions::new(dir.path().join("diff.hive"));
        options.base_path = Some(dir.path().join("absent.hive"));
        let session =
            OverlaySession::start(options, Arc::new(MemoryRegistry::new()), AlterationPipeline::new())
                .expect("runs without base");
        session.shutdown();
        assert!(dir.path().join("diff.hive").exists());
    }

    #[test]
    fn shutdown_abandons_open_handles_and_releases_locks() {
        let fx = Fixture::new();
        let session = fx.start();
        let key = session.open_key(HKLM, r"Software\Vendor", KeyAccess::KEY_READ).unwrap();
        session.enum_key(key, 0).unwrap();
        session.shutdown();
        session.shutdown();
        assert_eq!(session.open_handles(), 0);
        assert!(matches!(session.enum_key(key, 0), Err(RegistryError::InvalidHandle)));

        // Locks are gone, so a new session can start on the same files.
        let next = fx.start();
        next.shutdown();
    }

    #[test]
    fn flush_key_writes_the_diff_hive() {
        let fx = Fixture::new();
        let session = fx.start();
        let (key, _) = session
            .create_key(HKCU, r"Software\Vendor", None, KeyAccess::KEY_ALL_ACCESS)
            .unwrap();
        assert!(session.diff().is_dirty());
        session.flush_key(key).unwrap();
        assert!(!session.diff().is_dirty());
        assert!(fx.dir.path().join("diff.hive").exists());
    }

    #[test]
    fn options_from_config() {
        let config = Config::parse(
            "[hives]\ndiff = \"d.hive\"\nbase = \"b.hive\"\n[flush]\ninterval = \"5s\"\n[policy]\nsystem_keys = [\"HKCU\\\\Software\\\\Policies\"]\n",
        )
        .unwrap();
        let options = SessionOptions::from_config(&config).unwrap();
        assert_eq!(options.diff_path, PathBuf::from("d.hive"));
        assert_eq!(options.base_path, Some(PathBuf::from("b.hive")));
        assert_eq!(options.flush_interval, Some(Duration::from_secs(5)));
        assert_eq!(options.system_keys.len(), 1);
    }
}
