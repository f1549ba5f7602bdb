use sidecar_exec::ExecError;
use sidecar_io::TreeError;
use sidecar_types::{TargetKey, TypeError};

/// Errors produced by friend store operations.
#[derive(Debug, thiserror::Error)]
pub enum FriendError {
    /// Branch set of new data does not fit the store.
    #[error("schema error in friend {name:?}: {reason}")]
    Schema { name: String, reason: String },

    /// A new item overlaps one already stored for the same target.
    #[error("new item [{start},{stop}) overlaps existing [{existing_start},{existing_stop}) in {target}")]
    Overlap {
        target: TargetKey,
        start: u64,
        stop: u64,
        existing_start: u64,
        existing_stop: u64,
    },

    /// A payload's entry count differs from its declared range.
    #[error("{entries} entries in {chunk} do not fit [{start},{stop})")]
    LengthMismatch {
        chunk: String,
        entries: u64,
        start: u64,
        stop: u64,
    },

    /// The operation needs every item on disk.
    #[error("cannot {op} friend {name:?} while it holds in-memory data; call dump() first")]
    InMemory { op: &'static str, name: String },

    /// No friend data covers part of a requested range.
    #[error("missing {name:?} friend entries [{start},{stop}) for {target}")]
    Missing {
        name: String,
        target: TargetKey,
        start: u64,
        stop: u64,
    },

    /// A lazy read would span several files.
    #[error("friend {name:?} covers one partition of {target} with {files} files; call merge() first")]
    NotMerged {
        name: String,
        target: TargetKey,
        files: usize,
    },

    /// Two stores cannot be combined.
    #[error("incompatible friend stores: {0}")]
    Incompatible(String),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FriendError {
    /// Whether this is a coverage error, which `allow_missing` turns into
    /// an empty result.
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing { .. })
    }
}

pub type FriendResult<T> = Result<T, FriendError>;
