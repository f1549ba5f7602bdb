use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{TypeError, TypeResult};

/// Identity of one physical tree, independent of any entry range.
///
/// Two chunks that describe different ranges of the same tree share a
/// `TargetKey`. Equality, ordering and hashing are over
/// `(path, uid, tree)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "ChunkRepr", try_from = "ChunkRepr")]
pub struct TargetKey {
    pub path: PathBuf,
    pub uid: Uuid,
    pub tree: String,
}

impl TargetKey {
    pub fn new(path: impl Into<PathBuf>, uid: Uuid, tree: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            uid,
            tree: tree.into(),
        }
    }

    /// A chunk of this tree covering the absolute range `[start, stop)`.
    pub fn chunk(&self, start: u64, stop: u64) -> TypeResult<Chunk> {
        Chunk::new(self.path.clone(), self.uid, self.tree.clone(), start, stop)
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}):{}", self.path.display(), self.uid, self.tree)
    }
}

/// An immutable description of a contiguous entry range within one tree.
///
/// Equality and hashing cover `(path, uid, tree, entry_start, entry_stop)`;
/// branches and `num_entries` are metadata and do not take part.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(into = "ChunkRepr", try_from = "ChunkRepr")]
pub struct Chunk {
    /// Location of the file holding the tree.
    pub path: PathBuf,
    /// Unique id of the file.
    pub uid: Uuid,
    /// Name of the tree inside the file.
    pub tree: String,
    /// Branches available in this chunk, if known.
    pub branches: Option<BTreeSet<String>>,
    /// Total entries of the underlying tree, if known.
    pub num_entries: Option<u64>,
    pub entry_start: u64,
    pub entry_stop: u64,
}

impl Chunk {
    /// Create a chunk covering `[entry_start, entry_stop)`.
    pub fn new(
        path: impl Into<PathBuf>,
        uid: Uuid,
        tree: impl Into<String>,
        entry_start: u64,
        entry_stop: u64,
    ) -> TypeResult<Self> {
        if entry_start > entry_stop {
            return Err(TypeError::InvalidRange {
                start: entry_start,
                stop: entry_stop,
            });
        }
        Ok(Self {
            path: path.into(),
            uid,
            tree: tree.into(),
            branches: None,
            num_entries: None,
            entry_start,
            entry_stop,
        })
    }

    /// Projection copy with a different branch set.
    pub fn with_branches(&self, branches: Option<BTreeSet<String>>) -> Self {
        Self {
            branches,
            ..self.clone()
        }
    }

    /// Copy with the total entry count of the underlying tree recorded.
    pub fn with_num_entries(mut self, num_entries: u64) -> Self {
        self.num_entries = Some(num_entries);
        self
    }

    /// Copy pointing at another file location. Identity (uid) is kept.
    pub fn with_path(&self, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..self.clone()
        }
    }

    /// Copy covering the absolute range `[start, stop)`, which must lie
    /// within the current bounds.
    pub fn with_range(&self, start: u64, stop: u64) -> TypeResult<Self> {
        if start > stop || start < self.entry_start || stop > self.entry_stop {
            return Err(TypeError::OutOfBounds {
                start,
                stop,
                len: self.len(),
            });
        }
        Ok(Self {
            entry_start: start,
            entry_stop: stop,
            ..self.clone()
        })
    }

    /// Narrow to `[start, stop)` relative to `entry_start`.
    pub fn slice(&self, start: u64, stop: u64) -> TypeResult<Self> {
        if start > stop || stop > self.len() {
            return Err(TypeError::OutOfBounds {
                start,
                stop,
                len: self.len(),
            });
        }
        self.with_range(self.entry_start + start, self.entry_start + stop)
    }

    pub fn len(&self) -> u64 {
        self.entry_stop - self.entry_start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The target key of the tree this chunk belongs to.
    pub fn key(&self) -> TargetKey {
        TargetKey {
            path: self.path.clone(),
            uid: self.uid,
            tree: self.tree.clone(),
        }
    }

    /// Whether this chunk spans its whole tree. Unknown totals count as no.
    pub fn is_whole(&self) -> bool {
        self.entry_start == 0 && self.num_entries == Some(self.entry_stop)
    }

    /// Parent directory of the file, or `.` for bare file names.
    pub fn parent(&self) -> &Path {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }

    /// Copies of `chunks` restricted to the branches they all share.
    ///
    /// Chunks with unknown branches do not restrict the result.
    pub fn common(chunks: &[Chunk]) -> Vec<Chunk> {
        let mut common: Option<BTreeSet<String>> = None;
        for chunk in chunks {
            if let Some(branches) = &chunk.branches {
                common = Some(match common {
                    None => branches.clone(),
                    Some(acc) => acc.intersection(branches).cloned().collect(),
                });
            }
        }
        match common {
            None => chunks.to_vec(),
            Some(common) => chunks
                .iter()
                .map(|c| c.with_branches(Some(common.clone())))
                .collect(),
        }
    }

    /// Partition `chunks` into groups of exactly `size` entries, except the
    /// last. Chunk order is preserved and chunks are split across groups
    /// where needed.
    pub fn partition(size: u64, chunks: &[Chunk], common_branches: bool) -> TypeResult<Vec<Vec<Chunk>>> {
        if size == 0 {
            return Err(TypeError::InvalidChunk("partition size must be positive".into()));
        }
        let chunks = if common_branches {
            Self::common(chunks)
        } else {
            chunks.to_vec()
        };
        let mut groups = Vec::new();
        let mut group = Vec::new();
        let mut remain = size;
        for chunk in &chunks {
            let mut start = 0;
            while start < chunk.len() {
                let take = remain.min(chunk.len() - start);
                group.push(chunk.slice(start, start + take)?);
                remain -= take;
                start += take;
                if remain == 0 {
                    groups.push(std::mem::take(&mut group));
                    remain = size;
                }
            }
        }
        if !group.is_empty() {
            groups.push(group);
        }
        Ok(groups)
    }

    /// Split into pieces of about `size` entries, choosing the piece count
    /// that minimises the total deviation from `size`.
    pub fn balance(&self, size: u64) -> TypeResult<Vec<Chunk>> {
        if size == 0 {
            return Err(TypeError::InvalidChunk("balance size must be positive".into()));
        }
        let total = self.len();
        if total <= size {
            return Ok(vec![self.clone()]);
        }
        let base = total / size;
        let (mut best_diff, mut best_n) = (u64::MAX, base);
        for n in base..base + 2 {
            let entries = total / n;
            let remain = total % n;
            let diff = (entries + 1).abs_diff(size) * remain + entries.abs_diff(size) * (n - remain);
            if diff < best_diff {
                best_diff = diff;
                best_n = n;
            }
        }
        let entries = total / best_n;
        let remain = total % best_n;
        let mut pieces = Vec::with_capacity(best_n as usize);
        let mut start = 0;
        for i in 0..best_n {
            let mut stop = start + entries;
            if i < remain {
                stop += 1;
            }
            pieces.push(self.slice(start, stop)?);
            start = stop;
        }
        Ok(pieces)
    }
}

impl PartialEq for Chunk {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
            && self.uid == other.uid
            && self.tree == other.tree
            && self.entry_start == other.entry_start
            && self.entry_stop == other.entry_stop
    }
}

impl Eq for Chunk {}

impl Hash for Chunk {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
        self.uid.hash(state);
        self.tree.hash(state);
        self.entry_start.hash(state);
        self.entry_stop.hash(state);
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}):{}", self.path.display(), self.uid, self.tree)?;
        if let Some(n) = self.num_entries {
            write!(f, "[0,{n})")?;
        }
        write!(f, " -> [{},{})", self.entry_start, self.entry_stop)
    }
}

/// Shared JSON form of [`Chunk`] and [`TargetKey`]. A target key has no
/// range and no branches.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct ChunkRepr {
    path: PathBuf,
    uid: Uuid,
    name: String,
    #[serde(default)]
    branches: Option<BTreeSet<String>>,
    #[serde(default)]
    num_entries: Option<u64>,
    #[serde(default)]
    entry_start: Option<u64>,
    #[serde(default)]
    entry_stop: Option<u64>,
}

impl From<Chunk> for ChunkRepr {
    fn from(chunk: Chunk) -> Self {
        Self {
            path: chunk.path,
            uid: chunk.uid,
            name: chunk.tree,
            branches: chunk.branches,
            num_entries: chunk.num_entries,
            entry_start: Some(chunk.entry_start),
            entry_stop: Some(chunk.entry_stop),
        }
    }
}

impl TryFrom<ChunkRepr> for Chunk {
    type Error = TypeError;

    fn try_from(repr: ChunkRepr) -> TypeResult<Self> {
        let entry_start = repr.entry_start.unwrap_or(0);
        let entry_stop = repr.entry_stop.or(repr.num_entries).ok_or_else(|| {
            TypeError::InvalidChunk(format!(
                "{}: neither entry_stop nor num_entries given",
                repr.path.display()
            ))
        })?;
        let mut chunk = Chunk::new(repr.path, repr.uid, repr.name, entry_start, entry_stop)?;
        chunk.branches = repr.branches;
        chunk.num_entries = repr.num_entries;
        Ok(chunk)
    }
}

impl From<TargetKey> for ChunkRepr {
    fn from(key: TargetKey) -> Self {
        Self {
            path: key.path,
            uid: key.uid,
            name: key.tree,
            branches: None,
            num_entries: None,
            entry_start: None,
            entry_stop: None,
        }
    }
}

impl TryFrom<ChunkRepr> for TargetKey {
    type Error = TypeError;

    fn try_from(repr: ChunkRepr) -> TypeResult<Self> {
        Ok(Self {
            path: repr.path,
            uid: repr.uid,
            tree: repr.name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(start: u64, stop: u64) -> Chunk {
        Chunk::new("/data/a/events.sct", Uuid::from_u128(7), "Events", start, stop).unwrap()
    }

    fn branches(names: &[&str]) -> Option<BTreeSet<String>> {
        Some(names.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn new_rejects_inverted_range() {
        let err = Chunk::new("x", Uuid::nil(), "t", 5, 4).unwrap_err();
        assert_eq!(err, TypeError::InvalidRange { start: 5, stop: 4 });
    }

    #[test]
    fn slice_is_relative_to_start() {
        let c = chunk(100, 200);
        let s = c.slice(10, 20).unwrap();
        assert_eq!((s.entry_start, s.entry_stop), (110, 120));
        assert_eq!(s.len(), 10);
    }

    #[test]
    fn slice_out_of_bounds() {
        let c = chunk(100, 200);
        assert!(matches!(c.slice(50, 101), Err(TypeError::OutOfBounds { .. })));
        assert!(matches!(c.with_range(90, 120), Err(TypeError::OutOfBounds { .. })));
    }

    #[test]
    fn equality_ignores_metadata() {
        let a = chunk(0, 10).with_branches(branches(&["x"]));
        let b = chunk(0, 10).with_num_entries(10);
        assert_eq!(a, b);
        assert_ne!(a, chunk(0, 11));
        assert_eq!(a.key(), chunk(5, 9).key());
    }

    #[test]
    fn common_intersects_branches() {
        let chunks = vec![
            chunk(0, 10).with_branches(branches(&["a", "b", "c"])),
            chunk(10, 20).with_branches(branches(&["b", "c", "d"])),
            chunk(20, 30),
        ];
        let common = Chunk::common(&chunks);
        for c in &common {
            assert_eq!(c.branches, branches(&["b", "c"]));
        }
    }

    #[test]
    fn partition_crosses_chunk_boundaries() {
        let chunks = vec![chunk(0, 50), chunk(50, 120), chunk(120, 200)];
        let groups = Chunk::partition(80, &chunks, false).unwrap();
        let ranges: Vec<Vec<(u64, u64)>> = groups
            .iter()
            .map(|g| g.iter().map(|c| (c.entry_start, c.entry_stop)).collect())
            .collect();
        assert_eq!(
            ranges,
            vec![
                vec![(0, 50), (50, 80)],
                vec![(80, 120), (120, 160)],
                vec![(160, 200)],
            ]
        );
    }

    #[test]
    fn partition_rejects_zero() {
        assert!(Chunk::partition(0, &[chunk(0, 1)], false).is_err());
    }

    #[test]
    fn balance_minimises_deviation() {
        let pieces = chunk(0, 370).balance(100).unwrap();
        let lens: Vec<u64> = pieces.iter().map(|c| c.len()).collect();
        assert_eq!(lens, vec![93, 93, 92, 92]);
        assert_eq!(pieces[0].entry_start, 0);
        assert_eq!(pieces[3].entry_stop, 370);

        let small = chunk(0, 30).balance(100).unwrap();
        assert_eq!(small, vec![chunk(0, 30)]);
    }

    #[test]
    fn json_roundtrip_chunk_and_key() {
        let c = chunk(3, 9).with_branches(branches(&["pt"])).with_num_entries(20);
        let text = serde_json::to_string(&c).unwrap();
        let back: Chunk = serde_json::from_str(&text).unwrap();
        assert_eq!(back, c);
        assert_eq!(back.branches, c.branches);
        assert_eq!(back.num_entries, Some(20));

        let key_json = serde_json::to_value(c.key()).unwrap();
        assert!(key_json["entry_start"].is_null());
        assert!(key_json["branches"].is_null());
        let key: TargetKey = serde_json::from_value(key_json).unwrap();
        assert_eq!(key, c.key());
    }

    #[test]
    fn json_defaults_range_to_num_entries() {
        let json = serde_json::json!({
            "path": "f.sct",
            "uid": Uuid::nil(),
            "name": "Events",
            "num_entries": 42
        });
        let c: Chunk = serde_json::from_value(json).unwrap();
        assert_eq!((c.entry_start, c.entry_stop), (0, 42));
        assert!(c.is_whole());
    }
}
