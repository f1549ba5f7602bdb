use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sidecar_types::{Batch, Chunk, Column, ColumnType, TypeError};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{TreeError, TreeResult};
use crate::format::{check_magic, BasketMeta, Footer, HEADER_SIZE, TRAILER_SIZE, VERSION};

/// An opened tree file: header and footer are parsed, baskets are read on
/// demand.
#[derive(Clone, Debug)]
pub struct TreeFile {
    path: PathBuf,
    uid: Uuid,
    footer: Footer,
    checksum: [u8; 32],
}

impl TreeFile {
    /// Open `path`, validating magic, version and footer.
    pub fn open(path: &Path) -> TreeResult<Self> {
        let mut file = BufReader::new(File::open(path)?);
        let file_len = file.get_ref().metadata()?.len();
        if file_len < HEADER_SIZE + TRAILER_SIZE {
            return Err(TreeError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("file too short ({file_len} bytes)"),
            });
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;
        check_magic(&header[0..4])?;
        let version = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        if version != VERSION {
            return Err(TreeError::UnsupportedVersion(version));
        }
        let mut uid_bytes = [0u8; 16];
        uid_bytes.copy_from_slice(&header[8..24]);
        let uid = Uuid::from_bytes(uid_bytes);

        file.seek(SeekFrom::Start(file_len - TRAILER_SIZE))?;
        let mut trailer = [0u8; TRAILER_SIZE as usize];
        file.read_exact(&mut trailer)?;
        check_magic(&trailer[40..44])?;
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&trailer[0..8]);
        let footer_len = u64::from_be_bytes(len_bytes);
        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(&trailer[8..40]);

        if footer_len > file_len - HEADER_SIZE - TRAILER_SIZE {
            return Err(TreeError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("footer length {footer_len} exceeds file"),
            });
        }
        file.seek(SeekFrom::Start(file_len - TRAILER_SIZE - footer_len))?;
        let mut footer_bytes = vec![0u8; footer_len as usize];
        file.read_exact(&mut footer_bytes)?;
        let footer = Footer::from_bytes(path, &footer_bytes)?;
        if footer.uid != uid {
            return Err(TreeError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("header uid {uid} does not match footer uid {}", footer.uid),
            });
        }

        debug!(path = %path.display(), %uid, trees = footer.trees.len(), "tree file opened");
        Ok(Self {
            path: path.to_path_buf(),
            uid,
            footer,
            checksum,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn uid(&self) -> Uuid {
        self.uid
    }

    pub fn footer(&self) -> &Footer {
        &self.footer
    }

    /// Names of the trees in this file.
    pub fn trees(&self) -> impl Iterator<Item = &str> {
        self.footer.trees.keys().map(String::as_str)
    }

    pub fn num_entries(&self, tree: &str) -> TreeResult<u64> {
        Ok(self.footer.tree(&self.path, tree)?.num_entries)
    }

    pub fn schema(&self, tree: &str) -> TreeResult<&BTreeMap<String, ColumnType>> {
        Ok(&self.footer.tree(&self.path, tree)?.schema)
    }

    /// Full-range chunk of `tree`.
    pub fn chunk(&self, tree: &str) -> TreeResult<Chunk> {
        self.footer.chunk(&self.path, tree)
    }

    /// Read `branches` (all when `None`) of `tree` for entries
    /// `[start, stop)`.
    pub fn read(
        &self,
        tree: &str,
        branches: Option<&BTreeSet<String>>,
        start: u64,
        stop: u64,
    ) -> TreeResult<Batch> {
        let meta = self.footer.tree(&self.path, tree)?;
        if start > stop || stop > meta.num_entries {
            return Err(TypeError::OutOfBounds {
                start,
                stop,
                len: meta.num_entries,
            }
            .into());
        }
        let wanted = match branches {
            Some(b) => {
                if let Some(missing) = b.iter().find(|name| !meta.schema.contains_key(*name)) {
                    return Err(TypeError::MissingBranch(missing.clone()).into());
                }
                b.clone()
            }
            None => meta.branches(),
        };
        if wanted.is_empty() {
            return Ok(Batch::with_rows((stop - start) as usize));
        }

        let mut file = BufReader::new(File::open(&self.path)?);
        let mut pieces = Vec::new();
        for basket in meta.baskets.iter().filter(|b| b.overlaps(start, stop)) {
            let batch = self.read_basket(&mut file, tree, basket)?.project(&wanted)?;
            let lo = start.max(basket.entry_start) - basket.entry_start;
            let hi = stop.min(basket.entry_stop) - basket.entry_start;
            pieces.push(batch.slice(lo as usize, hi as usize)?);
        }
        if pieces.is_empty() {
            let schema: BTreeMap<String, ColumnType> = meta
                .schema
                .iter()
                .filter(|(name, _)| wanted.contains(*name))
                .map(|(name, ty)| (name.clone(), *ty))
                .collect();
            return Ok(Batch::empty(&schema));
        }
        trace!(tree, start, stop, baskets = pieces.len(), "read range");
        Ok(Batch::concat(&pieces)?)
    }

    fn read_basket(
        &self,
        file: &mut BufReader<File>,
        tree: &str,
        basket: &BasketMeta,
    ) -> TreeResult<Batch> {
        file.seek(SeekFrom::Start(basket.offset))?;
        let mut compressed = vec![0u8; basket.length as usize];
        file.read_exact(&mut compressed)?;
        if crc32fast::hash(&compressed) != basket.crc32 {
            return Err(TreeError::CrcMismatch {
                tree: tree.to_string(),
                offset: basket.offset,
            });
        }
        let raw = zstd::decode_all(compressed.as_slice())
            .map_err(|e| TreeError::DecompressionFailed(e.to_string()))?;
        let columns: BTreeMap<String, Column> =
            bincode::deserialize(&raw).map_err(|e| TreeError::Corrupt {
                path: self.path.clone(),
                reason: format!("basket at offset {}: {e}", basket.offset),
            })?;
        let rows = (basket.entry_stop - basket.entry_start) as usize;
        let batch = Batch::new(columns)?;
        if batch.len() != rows {
            return Err(TreeError::Corrupt {
                path: self.path.clone(),
                reason: format!(
                    "basket at offset {} holds {} rows, index says {rows}",
                    basket.offset,
                    batch.len()
                ),
            });
        }
        Ok(batch)
    }

    /// Recompute the whole-file blake3 checksum and compare it with the
    /// trailer.
    pub fn verify_checksum(&self) -> TreeResult<bool> {
        let data = std::fs::read(&self.path)?;
        if (data.len() as u64) < TRAILER_SIZE {
            return Ok(false);
        }
        let hashed = data.len() - 36;
        let actual = blake3::hash(&data[..hashed]);
        Ok(actual.as_bytes() == &self.checksum)
    }
}

/// Branch selection hook: receives the requested branches, returns the ones
/// to read.
pub type BranchFilter = Arc<dyn Fn(&BTreeSet<String>) -> BTreeSet<String> + Send + Sync>;

/// Post-read hook applied to every batch.
pub type Transform = Arc<dyn Fn(Batch) -> TreeResult<Batch> + Send + Sync>;

/// Hooks applied by [`TreeReader`].
#[derive(Clone, Default)]
pub struct ReaderOptions {
    pub branch_filter: Option<BranchFilter>,
    pub transform: Option<Transform>,
}

impl fmt::Debug for ReaderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderOptions")
            .field("branch_filter", &self.branch_filter.is_some())
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

/// Reads chunks into batches.
#[derive(Clone, Debug, Default)]
pub struct TreeReader {
    options: ReaderOptions,
}

impl TreeReader {
    pub fn new(options: ReaderOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    /// Read the entries of `chunk`.
    pub fn arrays(&self, chunk: &Chunk) -> TreeResult<Batch> {
        let file = TreeFile::open(&chunk.path)?;
        self.read_from(&file, chunk)
    }

    fn read_from(&self, file: &TreeFile, chunk: &Chunk) -> TreeResult<Batch> {
        let branches = match (&chunk.branches, &self.options.branch_filter) {
            (Some(b), Some(filter)) => Some(filter(b)),
            (None, Some(filter)) => Some(filter(&file.footer.tree(&file.path, &chunk.tree)?.branches())),
            (b, None) => b.clone(),
        };
        let batch = file.read(&chunk.tree, branches.as_ref(), chunk.entry_start, chunk.entry_stop)?;
        match &self.options.transform {
            Some(transform) => transform(batch),
            None => Ok(batch),
        }
    }

    /// Read and concatenate `chunks`, restricted to the branches they share.
    pub fn concat(&self, chunks: &[Chunk]) -> TreeResult<Batch> {
        let mut cache = FileCache::default();
        let batches = Chunk::common(chunks)
            .iter()
            .map(|chunk| self.read_from(cache.get(&chunk.path)?, chunk))
            .collect::<TreeResult<Vec<_>>>()?;
        Ok(Batch::concat(&batches)?)
    }

    /// Stream `chunks` as batches of exactly `step` entries, except the last.
    pub fn iterate(&self, chunks: &[Chunk], step: u64) -> TreeResult<Batches> {
        let groups = Chunk::partition(step, chunks, true)?;
        Ok(Batches {
            reader: self.clone(),
            groups: groups.into_iter(),
            cache: FileCache::default(),
        })
    }
}

/// Keeps the most recently opened file so consecutive reads of the same
/// file parse its footer once.
#[derive(Default)]
struct FileCache {
    file: Option<TreeFile>,
}

impl FileCache {
    fn get(&mut self, path: &Path) -> TreeResult<&TreeFile> {
        let file = match self.file.take() {
            Some(file) if file.path == path => file,
            _ => TreeFile::open(path)?,
        };
        Ok(self.file.insert(file))
    }
}

/// Iterator returned by [`TreeReader::iterate`].
pub struct Batches {
    reader: TreeReader,
    groups: std::vec::IntoIter<Vec<Chunk>>,
    cache: FileCache,
}

impl Iterator for Batches {
    type Item = TreeResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let group = self.groups.next()?;
        let result = group
            .iter()
            .map(|chunk| {
                let file = self.cache.get(&chunk.path)?;
                self.reader.read_from(file, chunk)
            })
            .collect::<TreeResult<Vec<_>>>()
            .and_then(|batches| Ok(Batch::concat(&batches)?));
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.groups.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{TreeWriter, WriterOptions};

    fn batch(offset: i64, rows: usize) -> Batch {
        Batch::new([
            ("n", Column::Int64((0..rows as i64).map(|i| i + offset).collect())),
            ("pt", Column::Float64((0..rows).map(|i| i as f64 * 0.5).collect())),
        ])
        .unwrap()
    }

    fn write(dir: &Path, name: &str, offset: i64, rows: usize, basket: Option<usize>) -> Chunk {
        let opts = WriterOptions {
            basket_size: basket,
            ..Default::default()
        };
        let mut w = TreeWriter::create(&dir.join(name), opts).unwrap();
        w.extend(&batch(offset, rows)).unwrap();
        w.finish().unwrap().chunk("Events").unwrap()
    }

    #[test]
    fn open_reads_footer() {
        let dir = tempfile::tempdir().unwrap();
        let chunk = write(dir.path(), "a.sct", 0, 25, Some(10));
        let file = TreeFile::open(&chunk.path).unwrap();
        assert_eq!(file.uid(), chunk.uid);
        assert_eq!(file.num_entries("Events").unwrap(), 25);
        assert_eq!(file.trees().collect::<Vec<_>>(), vec!["Events"]);
        assert_eq!(file.schema("Events").unwrap()["pt"], ColumnType::Float64);
        assert!(file.verify_checksum().unwrap());
    }

    #[test]
    fn read_spans_baskets() {
        let dir = tempfile::tempdir().unwrap();
        let chunk = write(dir.path(), "a.sct", 0, 25, Some(10));
        let file = TreeFile::open(&chunk.path).unwrap();
        let only_n: BTreeSet<String> = ["n".to_string()].into();
        let got = file.read("Events", Some(&only_n), 8, 22).unwrap();
        assert_eq!(got.len(), 14);
        assert_eq!(got.num_columns(), 1);
        assert_eq!(got.column("n"), Some(&Column::Int64((8..22).collect())));
    }

    #[test]
    fn read_rejects_bad_requests() {
        let dir = tempfile::tempdir().unwrap();
        let chunk = write(dir.path(), "a.sct", 0, 5, None);
        let file = TreeFile::open(&chunk.path).unwrap();
        assert!(matches!(
            file.read("Events", None, 0, 6),
            Err(TreeError::Type(TypeError::OutOfBounds { .. }))
        ));
        let eta: BTreeSet<String> = ["eta".to_string()].into();
        assert!(matches!(
            file.read("Events", Some(&eta), 0, 1),
            Err(TreeError::Type(TypeError::MissingBranch(_)))
        ));
        assert!(matches!(file.read("Runs", None, 0, 1), Err(TreeError::TreeNotFound { .. })));
        assert_eq!(file.read("Events", None, 3, 3).unwrap().len(), 0);
    }

    #[test]
    fn corrupted_basket_fails_crc() {
        let dir = tempfile::tempdir().unwrap();
        let chunk = write(dir.path(), "a.sct", 0, 20, None);
        let mut bytes = std::fs::read(&chunk.path).unwrap();
        bytes[HEADER_SIZE as usize + 2] ^= 0xff;
        std::fs::write(&chunk.path, &bytes).unwrap();

        let file = TreeFile::open(&chunk.path).unwrap();
        assert!(!file.verify_checksum().unwrap());
        assert!(matches!(
            file.read("Events", None, 0, 20),
            Err(TreeError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.sct");
        std::fs::write(&path, b"not a tree file").unwrap();
        assert!(matches!(TreeFile::open(&path), Err(TreeError::Corrupt { .. })));
        std::fs::write(&path, vec![0u8; 128]).unwrap();
        assert!(matches!(TreeFile::open(&path), Err(TreeError::InvalidMagic { .. })));
    }

    #[test]
    fn iterate_crosses_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.sct", 0, 50, None);
        let b = write(dir.path(), "b.sct", 50, 70, Some(16));
        let c = write(dir.path(), "c.sct", 120, 80, None);
        let reader = TreeReader::default();
        let lens: Vec<usize> = reader
            .iterate(&[a.clone(), b.clone(), c.clone()], 30)
            .unwrap()
            .map(|r| r.unwrap().len())
            .collect();
        assert_eq!(lens, vec![30, 30, 30, 30, 30, 30, 20]);

        let all = reader.concat(&[a, b, c]).unwrap();
        assert_eq!(all.column("n"), Some(&Column::Int64((0..200).collect())));
    }

    #[test]
    fn reader_hooks() {
        let dir = tempfile::tempdir().unwrap();
        let chunk = write(dir.path(), "a.sct", 0, 4, None);
        let reader = TreeReader::new(ReaderOptions {
            branch_filter: Some(Arc::new(|b: &BTreeSet<String>| {
                b.iter().filter(|n| *n != "pt").cloned().collect()
            })),
            transform: Some(Arc::new(|batch: Batch| {
                batch.rename(|n| format!("x_{n}")).map_err(TreeError::from)
            })),
        });
        let got = reader.arrays(&chunk).unwrap();
        assert_eq!(got.branches(), ["x_n".to_string()].into());
    }
}
