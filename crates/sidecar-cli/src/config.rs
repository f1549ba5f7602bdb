use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sidecar_exec::{ThreadPool, ThreadPoolConfig};
use sidecar_friend::FriendConfig;
use sidecar_io::WriterOptions;
use sidecar_types::Naming;
use tracing::debug;

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG: &str = "sidecar.toml";

/// Defaults for the CLI commands, read from `sidecar.toml`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    pub step: u64,
    pub chunk_size: Option<u64>,
    pub naming: Option<String>,
    pub base_path: Option<PathBuf>,
    /// Worker threads. `None` runs jobs on the calling thread.
    pub threads: Option<usize>,
    pub writer: WriterOptions,
    pub friend: FriendConfig,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            step: 50_000,
            chunk_size: None,
            naming: None,
            base_path: None,
            threads: None,
            writer: WriterOptions::default(),
            friend: FriendConfig::default(),
        }
    }
}

impl SidecarConfig {
    /// Read `path`, or `sidecar.toml` if it exists, or fall back to defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None if Path::new(DEFAULT_CONFIG).is_file() => PathBuf::from(DEFAULT_CONFIG),
            None => return Ok(Self::default()),
        };
        let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        debug!(path = %path.display(), "loading config");
        Self::parse(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// `naming` from the command line, else from the file.
    pub fn naming(&self, cli: Option<&str>) -> Option<Naming> {
        cli.or(self.naming.as_deref()).map(Naming::from)
    }

    /// A thread pool when threads are requested on the command line or in
    /// the file.
    pub fn pool(&self, cli: Option<usize>) -> anyhow::Result<Option<ThreadPool>> {
        match cli.or(self.threads) {
            Some(threads) if threads > 1 => Ok(Some(ThreadPool::new(ThreadPoolConfig {
                threads,
                ..Default::default()
            })?)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_empty() {
        let config = SidecarConfig::parse("").unwrap();
        assert_eq!(config.step, 50_000);
        assert!(config.chunk_size.is_none());
        assert_eq!(config.writer.tree, "Events");
    }

    #[test]
    fn parse_full_file() {
        let config = SidecarConfig::parse(
            r#"
step = 1000
chunk_size = 20000
naming = "{name}/{start}_{stop}.sct"
threads = 4

[writer]
basket_size = 500
compression_level = 9

[friend]
allow_missing = true
"#,
        )
        .unwrap();
        assert_eq!(config.step, 1000);
        assert_eq!(config.chunk_size, Some(20000));
        assert_eq!(config.writer.basket_size, Some(500));
        assert_eq!(config.writer.compression_level, 9);
        assert!(config.friend.allow_missing);
        assert!(matches!(config.naming(None), Some(Naming::Template(t)) if t == "{name}/{start}_{stop}.sct"));
        assert!(matches!(config.naming(Some("x.sct")), Some(Naming::Template(t)) if t == "x.sct"));
    }

    #[test]
    fn single_thread_runs_inline() {
        let config = SidecarConfig::default();
        assert!(config.pool(None).unwrap().is_none());
        assert!(config.pool(Some(1)).unwrap().is_none());
        assert_eq!(config.pool(Some(2)).unwrap().map(|p| p.size()), Some(2));
    }
}
