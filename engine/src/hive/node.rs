//! In-memory key tree shared by offline hives and the in-process live backend.

use crate::key_impl::KeyInfo;
use crate::value::RegValue;
use chrono::Utc;
use std::cmp::Ordering;

/// Seconds between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_OFFSET_SECS: i64 = 11_644_473_600;

/// Current time as a FILETIME (100ns ticks since 1601).
pub fn filetime_now() -> u64 {
    let now = Utc::now();
    let secs = now.timestamp() + FILETIME_UNIX_OFFSET_SECS;
    let ticks = secs as i128 * 10_000_000 + i128::from(now.timestamp_subsec_nanos() / 100);
    u64::try_from(ticks).unwrap_or(0)
}

fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_uppercase().cmp(&b.to_uppercase())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyNode {
    pub name: String,
    pub class: Option<String>,
    pub last_write_time: u64,
    /// Insertion order, which is the enumeration order.
    pub values: Vec<(String, RegValue)>,
    /// Kept sorted case-insensitively, the order subkeys enumerate in.
    pub subkeys: Vec<KeyNode>,
    pub security: Vec<u8>,
}

impl KeyNode {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            class: None,
            last_write_time: filetime_now(),
            values: Vec::new(),
            subkeys: Vec::new(),
            security: Vec::new(),
        }
    }

    fn child_index(&self, name: &str) -> Result<usize, usize> {
        self.subkeys
            .binary_search_by(|node| compare_names(&node.name, name))
    }

    pub fn child(&self, name: &str) -> Option<&KeyNode> {
        self.child_index(name).ok().map(|i| &self.subkeys[i])
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut KeyNode> {
        self.child_index(name).ok().map(|i| &mut self.subkeys[i])
    }

    pub fn descend(&self, path: &[String]) -> Option<&KeyNode> {
        path.iter().try_fold(self, |node, name| node.child(name))
    }

    pub fn descend_mut(&mut self, path: &[String]) -> Option<&mut KeyNode> {
        path.iter().try_fold(self, |node, name| node.child_mut(name))
    }

    /// Walks `path`, creating every missing node. Reports whether the final
    /// node was created by this call.
    pub fn create_path(&mut self, path: &[String]) -> (&mut KeyNode, bool) {
        let mut node = self;
        let mut created = false;
        for name in path {
            let index = match node.child_index(name) {
                Ok(i) => {
                    created = false;
                    i
                }
                Err(i) => {
                    node.subkeys.insert(i, KeyNode::new(name));
                    node.last_write_time = filetime_now();
                    created = true;
                    i
                }
            };
            node = &mut node.subkeys[index];
        }
        (node, created)
    }

    pub fn remove_child(&mut self, name: &str) -> Option<KeyNode> {
        let index = self.child_index(name).ok()?;
        self.last_write_time = filetime_now();
        Some(self.subkeys.remove(index))
    }

    fn value_index(&self, name: &str) -> Option<usize> {
        self.values
            .iter()
            .position(|(n, _)| compare_names(n, name).is_eq())
    }

    pub fn value(&self, name: &str) -> Option<&RegValue> {
        self.value_index(name).map(|i| &self.values[i].1)
    }

    /// Overwrites in place (keeping the enumeration slot) or appends.
    pub fn set_value(&mut self, name: &str, value: RegValue) {
        match self.value_index(name) {
            Some(i) => self.values[i].1 = value,
            None => self.values.push((name.to_string(), value)),
        }
        self.last_write_time = filetime_now();
    }

    pub fn remove_value(&mut self, name: &str) -> Option<RegValue> {
        let index = self.value_index(name)?;
        self.last_write_time = filetime_now();
        Some(self.values.remove(index).1)
    }

    /// Counts and maxima over the subkeys and the values `visible` accepts.
    pub fn info(&self, visible: impl Fn(&str) -> bool) -> KeyInfo {
        let name_len = |s: &str| s.encode_utf16().count() as u32;
        let values = self.values.iter().filter(|(name, _)| visible(name));
        let mut info = KeyInfo {
            subkeys: self.subkeys.len() as u32,
            class: self.class.clone(),
            max_class_len: self.class.as_deref().map_or(0, name_len),
            security_descriptor_len: self.security.len() as u32,
            last_write_time: self.last_write_time,
            ..KeyInfo::default()
        };
        for sub in &self.subkeys {
            info.max_subkey_len = info.max_subkey_len.max(name_len(&sub.name));
            info.max_class_len = info
                .max_class_len
                .max(sub.class.as_deref().map_or(0, name_len));
        }
        for (name, value) in values {
            info.values += 1;
            info.max_value_name_len = info.max_value_name_len.max(name_len(name));
            info.max_value_len = info.max_value_len.max(value.data.len() as u32);
        }
        info
    }
}
