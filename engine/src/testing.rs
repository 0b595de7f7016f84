//! Fixtures shared by the unit tests of several modules.

use crate::alteration::AlterationPipeline;
use crate::factory::VirtualKeyFactory;
use crate::hive::{HiveAccess, OfflineHive, OfflineHiveKey};
use crate::identity::{KeyAccess, KeyIdentity};
use crate::key_impl::Disposition;
use crate::live::MemoryRegistry;
use crate::policy::KeyPolicy;
use crate::value::RegValue;
use crate::virtual_key::VirtualKey;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Write access to a hive file being prepared for a test.
pub(crate) struct HiveSeed {
    hive: Arc<OfflineHive>,
}

impl HiveSeed {
    pub(crate) fn key(&self, path: &str) -> OfflineHiveKey {
        let identity = KeyIdentity::parse(path).expect("valid path");
        self.hive
            .create_key(&identity, None, Disposition::Base, KeyAccess::KEY_ALL_ACCESS)
            .expect("create seed key")
            .0
    }

    pub(crate) fn set(&self, path: &str, name: &str, value: RegValue) {
        self.key(path).set_value(name, &value).expect("set seed value");
    }
}

/// Creates the hive file at `path`, fills it and releases it.
pub(crate) fn seed_hive(path: &Path, fill: impl FnOnce(&HiveSeed)) {
    let hive = Arc::new(OfflineHive::open(path, HiveAccess::ReadWrite, true).expect("open seed hive"));
    fill(&HiveSeed {
        hive: Arc::clone(&hive),
    });
    hive.close();
}

/// A Diff hive in a temp dir over a live registry holding `HKCU\Software`.
pub(crate) struct Sandbox {
    _dir: TempDir,
    pub memory: Arc<MemoryRegistry>,
    pub factory: Arc<VirtualKeyFactory>,
}

impl Sandbox {
    pub(crate) fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let diff = Arc::new(
            OfflineHive::open(&dir.path().join("diff.hive"), HiveAccess::ReadWrite, true)
                .expect("open diff"),
        );
        let memory = Arc::new(MemoryRegistry::new());
        memory.seed_key(r"HKCU\Software");
        let factory = Arc::new(VirtualKeyFactory::new(
            diff,
            None,
            memory.clone(),
            KeyPolicy::default(),
        ));
        Self {
            _dir: dir,
            memory,
            factory,
        }
    }

    pub(crate) fn virtual_key(&self, path: &str, access: KeyAccess) -> VirtualKey {
        let identity = KeyIdentity::parse(path).expect("valid path");
        let resolved = self
            .factory
            .open_preliminarily(&identity, access)
            .expect("key exists");
        VirtualKey::new(
            identity,
            resolved,
            Arc::clone(&self.factory),
            Arc::new(AlterationPipeline::new()),
        )
    }
}
