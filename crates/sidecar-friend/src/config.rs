use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sidecar_io::{TreeReader, WriterOptions};
use sidecar_types::Naming;

/// What `add` does with branches beyond the store's fixed set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtraBranches {
    /// Drop them and keep only the store's branches.
    #[default]
    Project,
    /// Treat them as a schema error.
    Reject,
}

/// Behaviour switches of a friend store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FriendConfig {
    /// Reads over uncovered ranges return `None` instead of failing.
    pub allow_missing: bool,
    pub extra_branches: ExtraBranches,
}

/// Where and how `dump` writes in-memory items.
#[derive(Clone, Debug, Default)]
pub struct DumpOptions {
    /// Output directory. Defaults to each target's own directory.
    pub base_path: Option<PathBuf>,
    pub naming: Naming,
    pub writer: WriterOptions,
}

impl DumpOptions {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: Some(base_path.into()),
            ..Default::default()
        }
    }

    pub fn with_naming(mut self, naming: impl Into<Naming>) -> Self {
        self.naming = naming.into();
        self
    }
}

/// Parameters of a merge.
#[derive(Clone, Debug)]
pub struct MergeOptions {
    /// Entries read and written per iteration.
    pub step: u64,
    /// Entries per output file. `None` merges each run into one file.
    pub chunk_size: Option<u64>,
    /// Output directory. Defaults to each target's own directory.
    pub base_path: Option<PathBuf>,
    pub naming: Naming,
    pub writer: WriterOptions,
    pub reader: TreeReader,
    /// Remove source files once merged.
    pub clean: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            step: 50_000,
            chunk_size: None,
            base_path: None,
            naming: Naming::default(),
            writer: WriterOptions::default(),
            reader: TreeReader::default(),
            clean: true,
        }
    }
}

impl MergeOptions {
    pub fn new(step: u64) -> Self {
        Self {
            step,
            ..Default::default()
        }
    }

    pub fn chunk_size(mut self, size: u64) -> Self {
        self.chunk_size = Some(size);
        self
    }

    pub fn base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    pub fn keep_sources(mut self) -> Self {
        self.clean = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn friend_config_from_json() {
        let config: FriendConfig = serde_json::from_str(r#"{"extra_branches": "reject"}"#).unwrap();
        assert!(!config.allow_missing);
        assert_eq!(config.extra_branches, ExtraBranches::Reject);
    }

    #[test]
    fn merge_builders() {
        let opts = MergeOptions::new(30).chunk_size(80).base_path("/out").keep_sources();
        assert_eq!(opts.step, 30);
        assert_eq!(opts.chunk_size, Some(80));
        assert!(!opts.clean);
        assert_eq!(opts.base_path, Some(PathBuf::from("/out")));
    }
}
