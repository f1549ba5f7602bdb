//! Read-only audit of a friend store.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;

use sidecar_exec::{map, Executor};
use sidecar_io::{check_chunk, ChunkIssue};
use sidecar_types::{Chunk, TargetKey};
use tracing::{error, info, warn};

use crate::error::FriendResult;
use crate::store::{or_inline, FriendStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FindingKind {
    /// Target entries with no friend data.
    Gap { start: u64, stop: u64 },
    /// Two items claim the same entries.
    Overlap {
        first: (u64, u64),
        second: (u64, u64),
    },
    /// An item's file holds a different number of entries than its range.
    LengthMismatch { start: u64, stop: u64, entries: u64 },
    /// An item's file lacks some of the store's branches.
    MissingBranches {
        start: u64,
        stop: u64,
        branches: BTreeSet<String>,
    },
    /// One file backs two items.
    Aliased {
        path: PathBuf,
        first: (TargetKey, u64, u64),
        start: u64,
        stop: u64,
    },
    /// An item is still held in memory.
    InMemory { start: u64, stop: u64 },
    /// A file on disk disagrees with its recorded metadata.
    Chunk(ChunkIssue),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Finding {
    pub severity: Severity,
    pub target: TargetKey,
    pub kind: FindingKind,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FindingKind::Gap { start, stop } => write!(f, "no friend data for [{start},{stop})"),
            FindingKind::Overlap { first, second } => write!(
                f,
                "items [{},{}) and [{},{}) overlap",
                first.0, first.1, second.0, second.1
            ),
            FindingKind::LengthMismatch { start, stop, entries } => {
                write!(f, "item [{start},{stop}) is backed by {entries} entries")
            }
            FindingKind::MissingBranches { start, stop, branches } => {
                write!(f, "item [{start},{stop}) lacks branches {branches:?}")
            }
            FindingKind::Aliased {
                path,
                first,
                start,
                stop,
            } => write!(
                f,
                "{} backs both [{},{}) of {} and [{start},{stop})",
                path.display(),
                first.1,
                first.2,
                first.0
            ),
            FindingKind::InMemory { start, stop } => write!(f, "item [{start},{stop}) is not dumped"),
            FindingKind::Chunk(issue) => write!(f, "{issue}"),
        }?;
        write!(f, " in {}", self.target)
    }
}

/// Everything [`FriendStore::integrity`] found.
#[derive(Clone, Debug, Default)]
pub struct IntegrityReport {
    pub findings: Vec<Finding>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity == Severity::Warning)
    }

    fn push(&mut self, severity: Severity, target: &TargetKey, kind: FindingKind) {
        self.findings.push(Finding {
            severity,
            target: target.clone(),
            kind,
        });
    }

    fn log(&self, name: &str) {
        for finding in &self.findings {
            match finding.severity {
                Severity::Warning => warn!(friend = %name, "{finding}"),
                Severity::Error => error!(friend = %name, "{finding}"),
            }
        }
        info!(
            friend = %name,
            errors = self.errors().count(),
            warnings = self.warnings().count(),
            "integrity check finished"
        );
    }
}

impl FriendStore {
    /// Audit the store: gaps and overlaps between items, in-memory items,
    /// files shared by several items, and every friend file against its
    /// recorded metadata. Never modifies the store.
    pub fn integrity(&self, executor: Option<&dyn Executor>) -> FriendResult<IntegrityReport> {
        self.audit(false, executor)
    }

    /// Like [`integrity`](Self::integrity), but also opens every target
    /// file, checking its uid and reporting entries past the last item as
    /// a gap.
    pub fn integrity_with_targets(&self, executor: Option<&dyn Executor>) -> FriendResult<IntegrityReport> {
        self.audit(true, executor)
    }

    fn audit(&self, targets: bool, executor: Option<&dyn Executor>) -> FriendResult<IntegrityReport> {
        let executor = or_inline(executor);
        let mut report = IntegrityReport::default();

        let mut loaded: HashMap<TargetKey, Chunk> = HashMap::new();
        if targets {
            let keys: Vec<TargetKey> = self.data.keys().cloned().collect();
            let checks = map(executor, keys, |key: TargetKey| {
                let check = key.chunk(0, 0).map(|probe| check_chunk(&probe));
                (key, check)
            })?;
            for (key, check) in checks {
                let check = check?;
                for issue in check.issues {
                    report.push(Severity::Error, &key, FindingKind::Chunk(issue));
                }
                if let Some(target) = check.reloaded {
                    loaded.insert(key, target);
                }
            }
        }

        let mut owners: HashMap<PathBuf, (TargetKey, u64, u64)> = HashMap::new();
        let mut on_disk = Vec::new();
        for (key, items) in &self.data {
            let mut cursor = 0;
            let mut prev: Option<(u64, u64)> = None;
            for item in items {
                if item.start > cursor {
                    report.push(Severity::Warning, key, FindingKind::Gap { start: cursor, stop: item.start });
                }
                if let Some(prev) = prev.filter(|p| p.1 > item.start) {
                    report.push(
                        Severity::Error,
                        key,
                        FindingKind::Overlap {
                            first: prev,
                            second: (item.start, item.stop),
                        },
                    );
                }
                cursor = cursor.max(item.stop);
                prev = Some((item.start, item.stop));

                let Some(chunk) = item.chunk() else {
                    report.push(Severity::Warning, key, FindingKind::InMemory { start: item.start, stop: item.stop });
                    continue;
                };
                if chunk.len() != item.len() {
                    report.push(
                        Severity::Error,
                        key,
                        FindingKind::LengthMismatch {
                            start: item.start,
                            stop: item.stop,
                            entries: chunk.len(),
                        },
                    );
                }
                if let (Some(wanted), Some(have)) = (&self.branches, &chunk.branches) {
                    let missing: BTreeSet<String> = wanted.difference(have).cloned().collect();
                    if !missing.is_empty() {
                        report.push(
                            Severity::Error,
                            key,
                            FindingKind::MissingBranches {
                                start: item.start,
                                stop: item.stop,
                                branches: missing,
                            },
                        );
                    }
                }
                match owners.get(&chunk.path) {
                    Some(first) => report.push(
                        Severity::Error,
                        key,
                        FindingKind::Aliased {
                            path: chunk.path.clone(),
                            first: first.clone(),
                            start: item.start,
                            stop: item.stop,
                        },
                    ),
                    None => {
                        owners.insert(chunk.path.clone(), (key.clone(), item.start, item.stop));
                    }
                }
                on_disk.push((key.clone(), chunk.clone()));
            }

            if let Some(target) = loaded.get(key) {
                let total = target.num_entries.unwrap_or(target.entry_stop);
                if total > cursor {
                    report.push(Severity::Warning, key, FindingKind::Gap { start: cursor, stop: total });
                }
            }
        }

        let checks = map(executor, on_disk, |(key, chunk): (TargetKey, Chunk)| (key, check_chunk(&chunk)))?;
        for (key, check) in checks {
            for issue in check.issues {
                report.push(Severity::Error, &key, FindingKind::Chunk(issue));
            }
        }

        report.log(&self.name);
        Ok(report)
    }
}
