//! Foundation types for sidecar.
//!
//! Sidecar attaches auxiliary ("friend") columns to immutable, append-only
//! tree files without rewriting them. This crate holds the value types every
//! other sidecar crate shares.
//!
//! # Key Types
//!
//! - [`Chunk`]: an entry range `[start, stop)` of one tree in one file
//! - [`TargetKey`]: identity of a tree independent of any range
//! - [`Batch`] / [`Column`]: in-memory record batch of typed columns
//! - [`Naming`]: template or function naming output files

pub mod batch;
pub mod chunk;
pub mod error;
pub mod naming;

pub use batch::{Batch, Column, ColumnType, ConflictPolicy};
pub use chunk::{Chunk, TargetKey};
pub use error::{TypeError, TypeResult};
pub use naming::{format_template, path_parts, Naming, NamingFn, NamingKeys, DEFAULT_NAMING};
