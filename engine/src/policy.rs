//! Path policy: keys forced through the live registry, and anchors that can
//! never be tombstoned.

use crate::identity::{KeyIdentity, PredefinedRoot};

/// Prefixes under HKLM that always resolve live and refuse writes.
const MACHINE_SYSTEM_KEYS: [&str; 5] = ["SYSTEM", "HARDWARE", "SAM", "SECURITY", "BCD00000000"];

const COM_ANCHORS: [&str; 4] = ["CLSID", "Interface", "TypeLib", "AppID"];

struct Anchor {
    root: PredefinedRoot,
    prefix: Vec<&'static str>,
    max_depth: usize,
}

fn anchors() -> Vec<Anchor> {
    let mut anchors = Vec::new();
    for name in COM_ANCHORS {
        anchors.push(Anchor {
            root: PredefinedRoot::ClassesRoot,
            prefix: vec![name],
            max_depth: 1,
        });
    }
    for root in [PredefinedRoot::LocalMachine, PredefinedRoot::CurrentUser] {
        anchors.push(Anchor {
            root,
            prefix: vec!["Software"],
            max_depth: 1,
        });
        anchors.push(Anchor {
            root,
            prefix: vec!["Software", "Classes"],
            max_depth: 2,
        });
        for name in COM_ANCHORS {
            anchors.push(Anchor {
                root,
                prefix: vec!["Software", "Classes", name],
                max_depth: 3,
            });
        }
        anchors.push(Anchor {
            root,
            prefix: vec!["Software", "Microsoft"],
            max_depth: 4,
        });
    }
    anchors
}

fn starts_with(path: &[String], prefix: &[&str]) -> bool {
    path.len() >= prefix.len()
        && path
            .iter()
            .zip(prefix)
            .all(|(segment, want)| segment.eq_ignore_ascii_case(want))
}

pub struct KeyPolicy {
    system_keys: Vec<KeyIdentity>,
    anchors: Vec<Anchor>,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl KeyPolicy {
    /// Built-in rules plus `extra_system_keys` from configuration.
    pub fn new(extra_system_keys: Vec<KeyIdentity>) -> Self {
        let mut system_keys: Vec<KeyIdentity> = MACHINE_SYSTEM_KEYS
            .iter()
            .map(|name| KeyIdentity::new(PredefinedRoot::LocalMachine, vec![name.to_string()]))
            .collect();
        system_keys.push(KeyIdentity::root(PredefinedRoot::PerformanceData));
        system_keys.push(KeyIdentity::root(PredefinedRoot::CurrentConfig));
        system_keys.extend(extra_system_keys);
        Self {
            system_keys,
            anchors: anchors(),
        }
    }

    /// Keys that must be read from the live registry and never written.
    pub fn is_system_key(&self, identity: &KeyIdentity) -> bool {
        let plain = KeyIdentity::new(identity.root_key(), identity.unredirected_segments());
        self.system_keys.iter().any(|prefix| plain.is_within(prefix))
    }

    /// Keys a delete may not hide with a tombstone.
    pub fn is_non_removable(&self, identity: &KeyIdentity) -> bool {
        let path = identity.unredirected_segments();
        if path.is_empty() {
            return true;
        }
        self.anchors.iter().any(|anchor| {
            anchor.root == identity.root_key()
                && path.len() <= anchor.max_depth
                && starts_with(&path, &anchor.prefix)
        })
    }
}
