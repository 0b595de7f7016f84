//! Tombstones: reserved values in the Diff copy of a parent key recording that
//! a subkey still present in a lower store must be treated as deleted.

use crate::hive::KeyNode;
use crate::value::RegValue;
use shared::constants::{TOMBSTONE_MARKER, TOMBSTONE_PREFIX};

pub fn value_name(leaf: &str) -> String {
    format!("{TOMBSTONE_PREFIX}{leaf}")
}

/// Reserved names are never shown to callers nor writable by them.
pub fn is_reserved(name: &str) -> bool {
    name.len() >= TOMBSTONE_PREFIX.len()
        && name.is_char_boundary(TOMBSTONE_PREFIX.len())
        && name[..TOMBSTONE_PREFIX.len()].eq_ignore_ascii_case(TOMBSTONE_PREFIX)
}

fn is_set(node: &KeyNode, leaf: &str) -> bool {
    node.value(&value_name(leaf))
        .and_then(RegValue::as_dword)
        .is_some_and(|marker| marker != 0)
}

/// True when any level of `path` below `root` is tombstoned.
///
/// A single walk: at each node the tombstone for the next segment is checked
/// before descending. A missing Diff node ends the walk since nothing deeper
/// can carry a tombstone.
pub fn covers(root: &KeyNode, path: &[String]) -> bool {
    let mut node = root;
    for segment in path {
        if is_set(node, segment) {
            return true;
        }
        match node.child(segment) {
            Some(next) => node = next,
            None => return false,
        }
    }
    false
}

pub fn mark(parent: &mut KeyNode, leaf: &str) {
    parent.set_value(&value_name(leaf), RegValue::dword(TOMBSTONE_MARKER));
}

pub fn clear(parent: &mut KeyNode, leaf: &str) -> bool {
    parent.remove_value(&value_name(leaf)).is_some()
}

/// Clears every tombstone along `path`, creating nothing.
pub fn clear_along(root: &mut KeyNode, path: &[String]) -> bool {
    let mut cleared = false;
    let mut node = root;
    for segment in path {
        cleared |= clear(node, segment);
        match node.child_mut(segment) {
            Some(next) => node = next,
            None => break,
        }
    }
    cleared
}
