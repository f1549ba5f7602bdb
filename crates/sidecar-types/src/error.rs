use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid entry range [{start},{stop})")]
    InvalidRange { start: u64, stop: u64 },

    #[error("slice [{start},{stop}) out of bounds for {len} entries")]
    OutOfBounds { start: u64, stop: u64, len: u64 },

    #[error("branch {branch:?} has {actual} rows, expected {expected}")]
    LengthMismatch {
        branch: String,
        expected: usize,
        actual: usize,
    },

    #[error("branch {branch:?} has type {actual}, expected {expected}")]
    TypeMismatch {
        branch: String,
        expected: String,
        actual: String,
    },

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("missing branch: {0}")]
    MissingBranch(String),

    #[error("duplicate branch: {0}")]
    DuplicateBranch(String),

    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("naming error: {0}")]
    Naming(String),
}

pub type TypeResult<T> = Result<T, TypeError>;
