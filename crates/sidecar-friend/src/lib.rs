//! Friend stores for sidecar.
//!
//! A [`FriendStore`] attaches extra columns to entry ranges of existing
//! trees. Data arrives as in-memory batches or as chunks of files already
//! written; batches are dumped to their own files later. Many small files
//! can be compacted with [`FriendStore::merge`], relocated with
//! [`FriendStore::clone_to`] and audited with [`FriendStore::integrity`].
//!
//! # Lifecycle of an item
//!
//! ```text
//! add(batch) ──► in memory (pending) ──dump──► in flight ──wait/poll──► on disk
//!                         ▲                         │
//!                         └──────── job failed ─────┘
//! ```
//!
//! Operations that read or move files (`arrays`, `merge`, `clone_to`,
//! `to_json`, ...) require every item on disk.

pub mod compaction;
pub mod config;
pub mod dump;
pub mod error;
pub mod integrity;
pub mod item;
pub mod json;
pub mod store;

pub use compaction::{resize, ClonePlan, MergedRun, ResizePlan};
pub use config::{DumpOptions, ExtraBranches, FriendConfig, MergeOptions};
pub use dump::{naming_keys, AutoDump};
pub use error::{FriendError, FriendResult};
pub use integrity::{Finding, FindingKind, IntegrityReport, Severity};
pub use item::{FriendItem, Payload};
pub use store::FriendStore;
