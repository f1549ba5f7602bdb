use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use sidecar_types::Chunk;
use uuid::Uuid;

use crate::error::TreeResult;
use crate::reader::TreeFile;

/// Full-range chunk of `tree` in the file at `path`, with uid, entry count
/// and branches read from the file.
pub fn fetch_chunk(path: &Path, tree: &str) -> TreeResult<Chunk> {
    TreeFile::open(path)?.chunk(tree)
}

/// A discrepancy between a [`Chunk`] and the file it points at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkIssue {
    Missing {
        path: PathBuf,
    },
    Unreadable {
        path: PathBuf,
        reason: String,
    },
    UidMismatch {
        path: PathBuf,
        expected: Uuid,
        actual: Uuid,
    },
    EntriesMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
    MissingBranches {
        path: PathBuf,
        branches: BTreeSet<String>,
    },
    OutOfRange {
        path: PathBuf,
        start: u64,
        stop: u64,
        num_entries: u64,
    },
}

impl fmt::Display for ChunkIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { path } => write!(f, "file not found: {}", path.display()),
            Self::Unreadable { path, reason } => {
                write!(f, "cannot read {}: {reason}", path.display())
            }
            Self::UidMismatch {
                path,
                expected,
                actual,
            } => write!(f, "uid mismatch in {}: expected {expected}, got {actual}", path.display()),
            Self::EntriesMismatch {
                path,
                expected,
                actual,
            } => write!(
                f,
                "entry count mismatch in {}: expected {expected}, got {actual}",
                path.display()
            ),
            Self::MissingBranches { path, branches } => {
                write!(f, "branches {branches:?} missing from {}", path.display())
            }
            Self::OutOfRange {
                path,
                start,
                stop,
                num_entries,
            } => write!(
                f,
                "range [{start},{stop}) exceeds {num_entries} entries in {}",
                path.display()
            ),
        }
    }
}

/// Outcome of [`check_chunk`].
#[derive(Clone, Debug, Default)]
pub struct ChunkCheck {
    /// The chunk with metadata refreshed from disk, if the file could be read.
    pub reloaded: Option<Chunk>,
    pub issues: Vec<ChunkIssue>,
}

impl ChunkCheck {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Re-read the metadata of the file behind `chunk` and compare.
pub fn check_chunk(chunk: &Chunk) -> ChunkCheck {
    let path = chunk.path.clone();
    if !chunk.path.is_file() {
        return ChunkCheck {
            reloaded: None,
            issues: vec![ChunkIssue::Missing { path }],
        };
    }
    let on_disk = match fetch_chunk(&chunk.path, &chunk.tree) {
        Ok(c) => c,
        Err(e) => {
            return ChunkCheck {
                reloaded: None,
                issues: vec![ChunkIssue::Unreadable {
                    path,
                    reason: e.to_string(),
                }],
            }
        }
    };

    let mut issues = Vec::new();
    if on_disk.uid != chunk.uid {
        issues.push(ChunkIssue::UidMismatch {
            path: path.clone(),
            expected: chunk.uid,
            actual: on_disk.uid,
        });
    }
    let actual = on_disk.entry_stop;
    if let Some(expected) = chunk.num_entries.filter(|n| *n != actual) {
        issues.push(ChunkIssue::EntriesMismatch {
            path: path.clone(),
            expected,
            actual,
        });
    }
    if let (Some(wanted), Some(have)) = (&chunk.branches, &on_disk.branches) {
        let missing: BTreeSet<String> = wanted.difference(have).cloned().collect();
        if !missing.is_empty() {
            issues.push(ChunkIssue::MissingBranches {
                path: path.clone(),
                branches: missing,
            });
        }
    }
    if chunk.entry_stop > actual {
        issues.push(ChunkIssue::OutOfRange {
            path,
            start: chunk.entry_start,
            stop: chunk.entry_stop,
            num_entries: actual,
        });
    }

    let mut reloaded = on_disk;
    reloaded.entry_start = chunk.entry_start.min(actual);
    reloaded.entry_stop = chunk.entry_stop.min(actual);
    ChunkCheck {
        reloaded: Some(reloaded),
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{write_batch, WriterOptions};
    use sidecar_types::{Batch, Column};

    fn written(dir: &Path) -> Chunk {
        let batch = Batch::new([("a", Column::Bool(vec![true; 10]))]).unwrap();
        write_batch(&dir.join("f.sct"), &batch, WriterOptions::default()).unwrap()
    }

    #[test]
    fn clean_chunk_has_no_issues() {
        let dir = tempfile::tempdir().unwrap();
        let chunk = written(dir.path()).slice(2, 6).unwrap();
        let check = check_chunk(&chunk);
        assert!(check.is_ok(), "{:?}", check.issues);
        let reloaded = check.reloaded.unwrap();
        assert_eq!((reloaded.entry_start, reloaded.entry_stop), (2, 6));
        assert_eq!(reloaded.num_entries, Some(10));
    }

    #[test]
    fn detects_mismatches() {
        let dir = tempfile::tempdir().unwrap();
        let good = written(dir.path());
        let mut bad = Chunk::new(good.path.clone(), Uuid::nil(), "Events", 0, 12)
            .unwrap()
            .with_num_entries(12);
        bad.branches = Some(["a".to_string(), "b".to_string()].into());

        let issues = check_chunk(&bad).issues;
        assert_eq!(issues.len(), 4);
        assert!(matches!(issues[0], ChunkIssue::UidMismatch { .. }));
        assert!(matches!(issues[1], ChunkIssue::EntriesMismatch { expected: 12, actual: 10, .. }));
        assert!(matches!(&issues[2], ChunkIssue::MissingBranches { branches, .. } if branches.contains("b")));
        assert!(matches!(issues[3], ChunkIssue::OutOfRange { .. }));
    }

    #[test]
    fn missing_and_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let gone = Chunk::new(dir.path().join("gone.sct"), Uuid::nil(), "Events", 0, 1).unwrap();
        assert!(matches!(check_chunk(&gone).issues[..], [ChunkIssue::Missing { .. }]));

        let good = written(dir.path());
        let other_tree = Chunk::new(good.path, good.uid, "Runs", 0, 1).unwrap();
        assert!(matches!(
            check_chunk(&other_tree).issues[..],
            [ChunkIssue::Unreadable { .. }]
        ));
    }
}
