use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sidecar_types::{Chunk, ColumnType};
use uuid::Uuid;

use crate::error::{TreeError, TreeResult};

/// File magic, written at both ends of a tree file.
pub const MAGIC: &[u8; 4] = b"SDCT";
/// Current format version.
pub const VERSION: u32 = 1;
/// Header: magic + version + file uid.
pub const HEADER_SIZE: u64 = 4 + 4 + 16;
/// Trailer: footer length + blake3 checksum + magic.
pub const TRAILER_SIZE: u64 = 8 + 32 + 4;

/// Location of one basket (a compressed run of rows) inside the file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasketMeta {
    pub entry_start: u64,
    pub entry_stop: u64,
    pub offset: u64,
    pub length: u64,
    pub crc32: u32,
}

impl BasketMeta {
    pub fn overlaps(&self, start: u64, stop: u64) -> bool {
        self.entry_start < stop && start < self.entry_stop
    }
}

/// Per-tree index: schema, entry count, basket table.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeMeta {
    pub schema: BTreeMap<String, ColumnType>,
    pub num_entries: u64,
    pub baskets: Vec<BasketMeta>,
}

impl TreeMeta {
    pub fn branches(&self) -> BTreeSet<String> {
        self.schema.keys().cloned().collect()
    }
}

/// Index stored at the end of every tree file.
///
/// Layout of a tree file:
/// ```text
/// [magic "SDCT"][version u32 BE][uid 16 bytes]
/// [basket]...                      zstd(bincode(BTreeMap<String, Column>))
/// [footer]                         bincode(Footer)
/// [footer length u64 BE][blake3 of all preceding bytes][magic "SDCT"]
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Footer {
    pub uid: Uuid,
    pub trees: BTreeMap<String, TreeMeta>,
}

impl Footer {
    pub fn tree(&self, path: &Path, tree: &str) -> TreeResult<&TreeMeta> {
        self.trees.get(tree).ok_or_else(|| TreeError::TreeNotFound {
            path: path.to_path_buf(),
            tree: tree.to_string(),
        })
    }

    /// A chunk spanning the whole of `tree` with its metadata filled in.
    pub fn chunk(&self, path: &Path, tree: &str) -> TreeResult<Chunk> {
        let meta = self.tree(path, tree)?;
        let chunk = Chunk::new(path, self.uid, tree, 0, meta.num_entries)?
            .with_num_entries(meta.num_entries);
        Ok(chunk.with_branches(Some(meta.branches())))
    }

    pub fn to_bytes(&self) -> TreeResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| TreeError::Serialization(e.to_string()))
    }

    pub fn from_bytes(path: &Path, data: &[u8]) -> TreeResult<Self> {
        bincode::deserialize(data).map_err(|e| TreeError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("footer: {e}"),
        })
    }
}

pub(crate) fn check_magic(actual: &[u8]) -> TreeResult<()> {
    if actual != MAGIC {
        return Err(TreeError::InvalidMagic {
            expected: String::from_utf8_lossy(MAGIC).into(),
            actual: String::from_utf8_lossy(actual).into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn footer() -> Footer {
        let mut schema = BTreeMap::new();
        schema.insert("pt".to_string(), ColumnType::Float64);
        let mut trees = BTreeMap::new();
        trees.insert(
            "Events".to_string(),
            TreeMeta {
                schema,
                num_entries: 12,
                baskets: vec![BasketMeta {
                    entry_start: 0,
                    entry_stop: 12,
                    offset: HEADER_SIZE,
                    length: 40,
                    crc32: 7,
                }],
            },
        );
        Footer {
            uid: Uuid::from_u128(1),
            trees,
        }
    }

    #[test]
    fn footer_bytes_roundtrip() {
        let f = footer();
        let bytes = f.to_bytes().unwrap();
        assert_eq!(Footer::from_bytes(Path::new("x"), &bytes).unwrap(), f);
    }

    #[test]
    fn footer_chunk_has_metadata() {
        let chunk = footer().chunk(Path::new("a.sct"), "Events").unwrap();
        assert_eq!(chunk.num_entries, Some(12));
        assert_eq!(chunk.len(), 12);
        assert!(chunk.branches.unwrap().contains("pt"));
    }

    #[test]
    fn missing_tree() {
        let err = footer().chunk(Path::new("a.sct"), "Runs").unwrap_err();
        assert!(matches!(err, TreeError::TreeNotFound { .. }));
    }

    #[test]
    fn basket_overlap() {
        let b = BasketMeta {
            entry_start: 10,
            entry_stop: 20,
            offset: 0,
            length: 0,
            crc32: 0,
        };
        assert!(b.overlaps(0, 11));
        assert!(b.overlaps(19, 30));
        assert!(!b.overlaps(20, 30));
        assert!(!b.overlaps(0, 10));
    }

    #[test]
    fn bad_magic() {
        assert!(matches!(check_magic(b"WLLP"), Err(TreeError::InvalidMagic { .. })));
        assert!(check_magic(MAGIC).is_ok());
    }
}
