use std::path::PathBuf;

use sidecar_types::TypeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("invalid tree file magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    #[error("unsupported tree file version: {0}")]
    UnsupportedVersion(u32),

    #[error("checksum mismatch in {}", path.display())]
    ChecksumMismatch { path: PathBuf },

    #[error("CRC32 mismatch for basket at offset {offset} of tree {tree:?}")]
    CrcMismatch { tree: String, offset: u64 },

    #[error("corrupt tree file {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("tree {tree:?} not found in {}", path.display())]
    TreeNotFound { path: PathBuf, tree: String },

    #[error("schema mismatch in tree {tree:?}: {reason}")]
    SchemaMismatch { tree: String, reason: String },

    #[error("compression failed: {0}")]
    CompressionFailed(String),

    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("transform failed: {0}")]
    Transform(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Type(#[from] TypeError),
}

pub type TreeResult<T> = Result<T, TreeError>;
