//! Hive file framing: magic, format version, then the prost-encoded tree.

use super::node::KeyNode;
use crate::value::{RegValue, ValueType};
use prost::Message;
use shared::constants::{HIVE_FORMAT_VERSION, HIVE_MAGIC};
use shared::errors::RegistryError;
use shared::records::{HiveRecord, KeyRecord, ValueRecord};
use std::path::Path;

const HEADER_LEN: usize = HIVE_MAGIC.len() + 4;

fn to_record(node: &KeyNode) -> KeyRecord {
    KeyRecord {
        name: node.name.clone(),
        class: node.class.clone(),
        last_write_time: node.last_write_time,
        values: node
            .values
            .iter()
            .map(|(name, value)| ValueRecord {
                name: name.clone(),
                kind: value.kind.0,
                data: value.data.clone(),
            })
            .collect(),
        subkeys: node.subkeys.iter().map(to_record).collect(),
        security: node.security.clone(),
    }
}

fn from_record(record: KeyRecord) -> KeyNode {
    let mut subkeys: Vec<KeyNode> = record.subkeys.into_iter().map(from_record).collect();
    // Files written by older tools may not be sorted.
    subkeys.sort_by_key(|k| k.name.to_uppercase());
    KeyNode {
        name: record.name,
        class: record.class,
        last_write_time: record.last_write_time,
        values: record
            .values
            .into_iter()
            .map(|v| (v.name, RegValue::new(ValueType(v.kind), v.data)))
            .collect(),
        subkeys,
        security: record.security,
    }
}

pub fn encode_file(root: &KeyNode) -> Vec<u8> {
    let record = HiveRecord {
        version: HIVE_FORMAT_VERSION,
        root: Some(to_record(root)),
    };
    let mut out = Vec::with_capacity(HEADER_LEN + record.encoded_len());
    out.extend_from_slice(&HIVE_MAGIC);
    out.extend_from_slice(&HIVE_FORMAT_VERSION.to_le_bytes());
    record.encode(&mut out).ok();
    out
}

pub fn decode_file(bytes: &[u8], path: &Path) -> Result<KeyNode, RegistryError> {
    let corrupt = |reason: String| RegistryError::CorruptHive {
        path: path.to_path_buf(),
        reason,
    };
    if bytes.len() < HEADER_LEN || bytes[..HIVE_MAGIC.len()] != HIVE_MAGIC {
        return Err(corrupt("missing hive signature".into()));
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != HIVE_FORMAT_VERSION {
        return Err(corrupt(format!("unsupported format version {version}")));
    }
    let record = HiveRecord::decode(&bytes[HEADER_LEN..]).map_err(|e| corrupt(e.to_string()))?;
    if record.version != version {
        return Err(corrupt(format!(
            "header version {version} disagrees with record version {}",
            record.version
        )));
    }
    Ok(record.root.map(from_record).unwrap_or_else(|| KeyNode::new("")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_survives_encoding() {
        let mut root = KeyNode::new("");
        let (key, _) = root.create_path(&["MACHINE".into(), "Software".into()]);
        key.set_value("Path", RegValue::sz(r"C:\App"));
        key.class = Some("Vendor".into());
        key.security = vec![1, 0, 4, 0x80];

        let bytes = encode_file(&root);
        let decoded = decode_file(&bytes, Path::new("x.hive")).expect("decodes");
        assert_eq!(decoded, root);
    }

    #[test]
    fn rejects_foreign_files() {
        let err = decode_file(b"regf\x01\0\0\0", Path::new("SYSTEM")).unwrap_err();
        assert!(matches!(err, RegistryError::CorruptHive { .. }));

        let mut bytes = encode_file(&KeyNode::new(""));
        bytes.truncate(HEADER_LEN);
        bytes.extend_from_slice(&[0xFF, 0xFF, 0xFF]);
        let err = decode_file(&bytes, Path::new("x.hive")).unwrap_err();
        assert!(matches!(err, RegistryError::CorruptHive { .. }));
    }
}
