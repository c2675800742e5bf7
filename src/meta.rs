//! Durable uuid → oid map.
//!
//! The identifier map is persisted next to the engine's own files as a
//! bincode-encoded `HashMap<String, u32>`, written through a truncating
//! create and read back synchronously on startup. Writer and reader use
//! the same encoding, which is all the format promises.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::IndexError;
use crate::kvs::BidiMap;

/// File name of the identifier map inside the index directory.
pub const META_FILE_NAME: &str = "ngt-meta.kvsdb";

/// Snapshot the map and write it to `<dir>/ngt-meta.kvsdb`, creating
/// the directory on first save.
pub fn save(dir: &Path, kvs: &BidiMap) -> Result<(), IndexError> {
    let mut m = HashMap::with_capacity(kvs.len());
    kvs.range(|uuid, oid| {
        m.insert(uuid.to_string(), oid);
        true
    });

    std::fs::create_dir_all(dir)?;
    let file = File::create(dir.join(META_FILE_NAME))?;
    let writer = BufWriter::new(file);
    bincode::serialize_into(writer, &m)?;
    Ok(())
}

/// Read `<dir>/ngt-meta.kvsdb` and populate `kvs`. Oid-0 rows, which a
/// well-formed file never contains, are dropped by the map itself.
pub fn load(dir: &Path, kvs: &BidiMap) -> Result<(), IndexError> {
    let file = File::open(dir.join(META_FILE_NAME))?;
    let reader = BufReader::new(file);
    let m: HashMap<String, u32> = bincode::deserialize_from(reader)?;
    for (uuid, oid) in m {
        kvs.set(uuid, oid);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn roundtrip_preserves_membership() {
        let dir = tempdir().unwrap();
        let kvs = BidiMap::new();
        for i in 1..=100u32 {
            kvs.set(format!("uuid-{i}"), i);
        }
        save(dir.path(), &kvs).unwrap();

        let restored = BidiMap::new();
        load(dir.path(), &restored).unwrap();
        assert_eq!(restored.len(), 100);
        for i in 1..=100u32 {
            assert_eq!(restored.get(&format!("uuid-{i}")), Some(i));
            assert_eq!(restored.get_inverse(i), Some(format!("uuid-{i}")));
        }
    }

    #[test]
    fn save_truncates_previous_contents() {
        let dir = tempdir().unwrap();
        let kvs = BidiMap::new();
        for i in 1..=50u32 {
            kvs.set(format!("uuid-{i}"), i);
        }
        save(dir.path(), &kvs).unwrap();

        let small = BidiMap::new();
        small.set("only".to_string(), 1);
        save(dir.path(), &small).unwrap();

        let restored = BidiMap::new();
        load(dir.path(), &restored).unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.get("only"), Some(1));
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let kvs = BidiMap::new();
        assert!(matches!(
            load(dir.path(), &kvs),
            Err(IndexError::Io(_))
        ));
    }
}
