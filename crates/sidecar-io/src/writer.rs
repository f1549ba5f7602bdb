use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sidecar_types::{Batch, Chunk};
use tempfile::NamedTempFile;
use tracing::debug;
use uuid::Uuid;

use crate::error::{TreeError, TreeResult};
use crate::format::{BasketMeta, Footer, TreeMeta, HEADER_SIZE, MAGIC, VERSION};

/// Options for [`TreeWriter`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterOptions {
    /// Tree written by [`TreeWriter::extend`].
    pub tree: String,
    /// Create missing parent directories of the output.
    pub parents: bool,
    /// Rows per basket. `None` writes one basket per `extend` call.
    pub basket_size: Option<usize>,
    /// zstd compression level.
    pub compression_level: i32,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            tree: "Events".to_string(),
            parents: true,
            basket_size: None,
            compression_level: 3,
        }
    }
}

/// Result of writing a tree file.
#[derive(Clone, Debug)]
pub struct WrittenFile {
    pub path: PathBuf,
    pub uid: Uuid,
    pub footer: Footer,
    pub checksum: [u8; 32],
}

impl WrittenFile {
    /// Full-range chunk of `tree`, if it was written.
    pub fn chunk(&self, tree: &str) -> Option<Chunk> {
        self.footer.chunk(&self.path, tree).ok()
    }
}

#[derive(Default)]
struct TreeState {
    meta: TreeMeta,
    buffer: Vec<Batch>,
    buffered: usize,
}

/// Writes record batches into a new tree file.
///
/// Data goes to a temporary file next to the destination; [`finish`]
/// persists it under the final name. A writer dropped without `finish`
/// leaves nothing behind.
///
/// [`finish`]: TreeWriter::finish
pub struct TreeWriter {
    path: PathBuf,
    options: WriterOptions,
    uid: Uuid,
    temp: NamedTempFile,
    hasher: blake3::Hasher,
    offset: u64,
    trees: BTreeMap<String, TreeState>,
}

impl TreeWriter {
    /// Open a writer whose output will land at `path`.
    pub fn create(path: &Path, options: WriterOptions) -> TreeResult<Self> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if options.parents {
            std::fs::create_dir_all(&dir)?;
        }
        let temp = tempfile::Builder::new()
            .prefix(".sidecar-")
            .suffix(".tmp")
            .tempfile_in(&dir)?;

        let mut writer = Self {
            path: path.to_path_buf(),
            options,
            uid: Uuid::now_v7(),
            temp,
            hasher: blake3::Hasher::new(),
            offset: 0,
            trees: BTreeMap::new(),
        };

        let mut header = Vec::with_capacity(HEADER_SIZE as usize);
        header.extend_from_slice(MAGIC);
        header.extend_from_slice(&VERSION.to_be_bytes());
        header.extend_from_slice(writer.uid.as_bytes());
        writer.write_raw(&header)?;
        Ok(writer)
    }

    /// Unique id this file will carry.
    pub fn uid(&self) -> Uuid {
        self.uid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `batch` to the default tree.
    pub fn extend(&mut self, batch: &Batch) -> TreeResult<()> {
        let tree = self.options.tree.clone();
        self.extend_tree(&tree, batch)
    }

    /// Append `batch` to `tree`, creating it on first use. The first batch
    /// fixes the tree's schema.
    pub fn extend_tree(&mut self, tree: &str, batch: &Batch) -> TreeResult<()> {
        let state = self.trees.entry(tree.to_string()).or_default();
        if state.meta.schema.is_empty() && state.meta.num_entries == 0 && state.buffered == 0 {
            state.meta.schema = batch.schema();
        } else if state.meta.schema != batch.schema() {
            return Err(TreeError::SchemaMismatch {
                tree: tree.to_string(),
                reason: format!(
                    "expected branches {:?}, got {:?}",
                    state.meta.schema.keys().collect::<Vec<_>>(),
                    batch.schema().keys().collect::<Vec<_>>()
                ),
            });
        }
        if batch.is_empty() {
            return Ok(());
        }

        let Some(basket_size) = self.options.basket_size.filter(|n| *n > 0) else {
            return self.write_basket(tree, batch);
        };
        let mut start = 0;
        while start < batch.len() {
            let state = self.trees.entry(tree.to_string()).or_default();
            let take = (basket_size - state.buffered).min(batch.len() - start);
            state.buffer.push(batch.slice(start, start + take)?);
            state.buffered += take;
            start += take;
            if state.buffered >= basket_size {
                self.flush_tree(tree)?;
            }
        }
        Ok(())
    }

    fn flush_tree(&mut self, tree: &str) -> TreeResult<()> {
        let Some(state) = self.trees.get_mut(tree) else {
            return Ok(());
        };
        if state.buffered == 0 {
            return Ok(());
        }
        let pending = std::mem::take(&mut state.buffer);
        state.buffered = 0;
        let batch = Batch::concat(&pending)?;
        self.write_basket(tree, &batch)
    }

    fn write_basket(&mut self, tree: &str, batch: &Batch) -> TreeResult<()> {
        let columns: BTreeMap<_, _> = batch.columns().collect();
        let encoded =
            bincode::serialize(&columns).map_err(|e| TreeError::Serialization(e.to_string()))?;
        let compressed = zstd::encode_all(encoded.as_slice(), self.options.compression_level)
            .map_err(|e| TreeError::CompressionFailed(e.to_string()))?;
        let crc32 = crc32fast::hash(&compressed);
        let offset = self.offset;
        self.write_raw(&compressed)?;

        let state = self.trees.entry(tree.to_string()).or_default();
        let entry_start = state.meta.num_entries;
        state.meta.num_entries += batch.len() as u64;
        state.meta.baskets.push(BasketMeta {
            entry_start,
            entry_stop: state.meta.num_entries,
            offset,
            length: compressed.len() as u64,
            crc32,
        });
        debug!(tree, offset, rows = batch.len(), bytes = compressed.len(), "basket written");
        Ok(())
    }

    fn write_raw(&mut self, data: &[u8]) -> TreeResult<()> {
        self.temp.as_file_mut().write_all(data)?;
        self.hasher.update(data);
        self.offset += data.len() as u64;
        Ok(())
    }

    /// Flush buffered rows, write the footer and move the file into place.
    pub fn finish(mut self) -> TreeResult<WrittenFile> {
        let names: Vec<String> = self.trees.keys().cloned().collect();
        for tree in &names {
            self.flush_tree(tree)?;
        }

        let footer = Footer {
            uid: self.uid,
            trees: std::mem::take(&mut self.trees)
                .into_iter()
                .map(|(name, state)| (name, state.meta))
                .collect(),
        };
        let footer_bytes = footer.to_bytes()?;
        self.write_raw(&footer_bytes)?;
        self.write_raw(&(footer_bytes.len() as u64).to_be_bytes())?;

        let checksum = *self.hasher.finalize().as_bytes();
        let file = self.temp.as_file_mut();
        file.write_all(&checksum)?;
        file.write_all(MAGIC)?;
        file.sync_all()?;

        self.temp.persist(&self.path).map_err(|e| e.error)?;
        debug!(path = %self.path.display(), uid = %self.uid, "tree file written");

        Ok(WrittenFile {
            path: self.path,
            uid: self.uid,
            footer,
            checksum,
        })
    }
}

/// Write `batch` as the only content of a new file at `path`.
pub fn write_batch(path: &Path, batch: &Batch, options: WriterOptions) -> TreeResult<Chunk> {
    let tree = options.tree.clone();
    let mut writer = TreeWriter::create(path, options)?;
    writer.extend(batch)?;
    let written = writer.finish()?;
    written.footer.chunk(&written.path, &tree)
}
