//! Compaction and relocation of on-disk friend data.
//!
//! `merge` rewrites each contiguous run of items into fewer, larger files
//! by streaming rows in fixed steps. `clone_to` plans (and optionally
//! performs) a copy of every file under a new base directory.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use sidecar_exec::{map, submit, Executor};
use sidecar_io::{fs, TreeReader, TreeWriter, WriterOptions};
use sidecar_types::{path_parts, Chunk, Naming, TargetKey, TypeError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::MergeOptions;
use crate::dump::{naming_keys, output_path};
use crate::error::{FriendError, FriendResult};
use crate::item::FriendItem;
use crate::store::{or_inline, FriendStore};

/// How [`resize`] rewrites one run of chunks.
#[derive(Clone, Debug)]
pub struct ResizePlan {
    pub step: u64,
    pub chunk_size: Option<u64>,
    pub writer: WriterOptions,
    pub reader: TreeReader,
    pub clean: bool,
}

impl From<&MergeOptions> for ResizePlan {
    fn from(options: &MergeOptions) -> Self {
        Self {
            step: options.step,
            chunk_size: options.chunk_size,
            writer: options.writer.clone(),
            reader: options.reader.clone(),
            clean: options.clean,
        }
    }
}

/// Output of compacting one contiguous run `[start, stop)` of a target.
#[derive(Clone, Debug)]
pub struct MergedRun {
    pub key: TargetKey,
    pub start: u64,
    pub stop: u64,
    pub chunks: Vec<Chunk>,
}

/// `<stem>.chunk<index>.<ext>` next to `path`.
fn indexed_path(path: &Path, index: usize) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    path.with_file_name(format!("{stem}.chunk{index}{ext}"))
}

fn relocate(dst: &Path, source: &Chunk, clean: bool) -> FriendResult<Chunk> {
    if clean {
        fs::move_file(&source.path, dst)?;
    } else {
        fs::copy_file(&source.path, dst)?;
    }
    Ok(source.with_path(dst))
}

fn merge_into(path: &Path, sources: &[Chunk], plan: &ResizePlan) -> FriendResult<Chunk> {
    let mut writer = TreeWriter::create(path, plan.writer.clone())?;
    let mut rows = 0usize;
    for batch in plan.reader.iterate(sources, plan.step)? {
        let batch = batch?;
        rows += batch.len();
        writer.extend(&batch)?;
    }
    if rows == 0 {
        // Record the schema even when every source is empty.
        if let Some(first) = sources.first() {
            writer.extend(&plan.reader.arrays(&first.slice(0, 0)?)?)?;
        }
    }
    let written = writer.finish()?;
    debug!(path = %path.display(), sources = sources.len(), rows, "merged");
    Ok(written.footer.chunk(&written.path, &plan.writer.tree)?)
}

/// Rewrite `sources`, a contiguous run, into new files at `path`.
///
/// Without `chunk_size` everything goes to one file, and a single source
/// is only moved. With it, outputs hold `chunk_size` entries each and are
/// named `<stem>.chunk<index>.<ext>` when there is more than one; an
/// output made of one whole source file is moved instead of rewritten.
/// When `clean` is set the remaining sources are deleted afterwards.
pub fn resize(path: &Path, sources: &[Chunk], plan: &ResizePlan) -> FriendResult<Vec<Chunk>> {
    if plan.step == 0 {
        return Err(TypeError::InvalidChunk("merge step must be positive".into()).into());
    }
    let mut to_clean: BTreeMap<(PathBuf, Uuid), PathBuf> = sources
        .iter()
        .map(|c| ((c.path.clone(), c.uid), c.path.clone()))
        .collect();
    let mut results = Vec::new();

    match (plan.chunk_size, sources) {
        (None, [single]) => {
            results.push(relocate(path, single, plan.clean)?);
            to_clean.clear();
        }
        (None, _) => results.push(merge_into(path, sources, plan)?),
        (Some(size), _) => {
            let groups = Chunk::partition(size, sources, true)?;
            for (index, group) in groups.iter().enumerate() {
                let output = if groups.len() > 1 {
                    indexed_path(path, index)
                } else {
                    path.to_path_buf()
                };
                match group.as_slice() {
                    [whole] if whole.is_whole() => {
                        results.push(relocate(&output, whole, plan.clean)?);
                        to_clean.remove(&(whole.path.clone(), whole.uid));
                    }
                    _ => results.push(merge_into(&output, group, plan)?),
                }
            }
        }
    }

    if plan.clean {
        for source in to_clean.values() {
            if results.iter().any(|c| &c.path == source) {
                continue;
            }
            if let Err(e) = fs::remove_file(source) {
                warn!(path = %source.display(), error = %e, "failed to remove merged source");
            }
        }
    }
    Ok(results)
}

impl FriendStore {
    /// Compact every contiguous run. The store itself is not modified.
    pub fn merge_runs(
        &self,
        options: &MergeOptions,
        executor: Option<&dyn Executor>,
    ) -> FriendResult<Vec<MergedRun>> {
        self.ensure_on_disk("merge")?;
        let executor = or_inline(executor);
        let plan = ResizePlan::from(options);

        let mut jobs = Vec::new();
        for (key, run) in self.contiguous_runs() {
            let (start, stop) = (run[0].start, run[run.len() - 1].stop);
            let sources: Vec<Chunk> = run.iter().filter_map(|it| it.chunk().cloned()).collect();
            let path = output_path(
                options.base_path.as_deref(),
                &options.naming,
                &self.name,
                key,
                start,
                stop,
            )?;
            let plan = plan.clone();
            let handle = submit(executor, move || resize(&path, &sources, &plan))?;
            jobs.push((key.clone(), start, stop, handle));
        }

        jobs.into_iter()
            .map(|(key, start, stop, handle)| {
                Ok(MergedRun {
                    key,
                    start,
                    stop,
                    chunks: handle.wait()??,
                })
            })
            .collect()
    }

    /// Compact every contiguous run and return a store over the new files.
    pub fn merge(&self, options: &MergeOptions, executor: Option<&dyn Executor>) -> FriendResult<FriendStore> {
        let runs = self.merge_runs(options, executor)?;
        let mut store = self.empty_like();
        for run in runs {
            let mut start = run.start;
            for chunk in run.chunks {
                let stop = start + chunk.len();
                let chunk = chunk.with_branches(self.branches.clone());
                store.add(&run.key.chunk(start, stop)?, chunk)?;
                start = stop;
            }
            if start != run.stop {
                return Err(FriendError::Incompatible(format!(
                    "merged files of {} cover [{},{start}) instead of [{},{})",
                    run.key, run.start, run.start, run.stop
                )));
            }
        }
        info!(
            friend = %self.name,
            before = self.n_fragments(),
            after = store.n_fragments(),
            "merge finished"
        );
        Ok(store)
    }

    /// Plan a copy of every file under `base_path`.
    ///
    /// Without `naming`, each file keeps its path relative to the common
    /// directory of all files. With it, the name comes from the dump keys
    /// plus `source0`, `source1`, ... (reversed components of the file's
    /// current path). Nothing is copied unless `execute` is set.
    pub fn clone_to(
        &self,
        base_path: &Path,
        naming: Option<&Naming>,
        execute: bool,
        executor: Option<&dyn Executor>,
    ) -> FriendResult<ClonePlan> {
        self.ensure_on_disk("clone")?;
        let common = fs::common_base(
            self.data
                .values()
                .flatten()
                .filter_map(|item| item.chunk().map(|c| c.path.as_path())),
        );

        let mut store = self.empty_like();
        let mut copies = Vec::new();
        for (key, items) in &self.data {
            let mut cloned = Vec::with_capacity(items.len());
            for item in items {
                let Some(chunk) = item.chunk() else { continue };
                let name = match naming {
                    None => relative_to(&chunk.path, &common),
                    Some(naming) => {
                        let mut keys = naming_keys(&self.name, key, item.start, item.stop);
                        keys.extend(path_parts(&chunk.path, "source"));
                        PathBuf::from(naming.apply(&keys)?)
                    }
                };
                let dst = base_path.join(name);
                let pair = (chunk.path.clone(), dst.clone());
                if !copies.contains(&pair) {
                    copies.push(pair);
                }
                cloned.push(FriendItem::new(item.start, item.stop, chunk.with_path(dst)));
            }
            store.data.insert(key.clone(), cloned);
        }

        let plan = ClonePlan { store, copies };
        if execute {
            plan.execute(executor)?;
        }
        Ok(plan)
    }
}

/// `path` below `base`, with root and prefix components dropped.
fn relative_to(path: &Path, base: &Path) -> PathBuf {
    path.strip_prefix(base)
        .unwrap_or(path)
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}

/// A cloned store together with the copies that make it valid.
#[derive(Debug)]
pub struct ClonePlan {
    pub store: FriendStore,
    /// `(source, destination)` pairs.
    pub copies: Vec<(PathBuf, PathBuf)>,
}

impl ClonePlan {
    /// Perform the copies. Returns the number of bytes copied.
    pub fn execute(&self, executor: Option<&dyn Executor>) -> FriendResult<u64> {
        let results = map(or_inline(executor), self.copies.clone(), |(src, dst): (PathBuf, PathBuf)| {
            fs::copy_file(&src, &dst)
        })?;
        let mut bytes = 0;
        for result in results {
            bytes += result?;
        }
        info!(friend = %self.store.name(), files = self.copies.len(), bytes, "clone copied");
        Ok(bytes)
    }

    pub fn into_store(self) -> FriendStore {
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::output_dir;

    #[test]
    fn indexed_output_names() {
        assert_eq!(
            indexed_path(Path::new("/out/f_0_200.sct"), 2),
            PathBuf::from("/out/f_0_200.chunk2.sct")
        );
        assert_eq!(indexed_path(Path::new("bare"), 0), PathBuf::from("bare.chunk0"));
    }

    #[test]
    fn relative_paths_drop_roots() {
        assert_eq!(
            relative_to(Path::new("/data/a/b/x.sct"), Path::new("/data")),
            PathBuf::from("a/b/x.sct")
        );
        assert_eq!(
            relative_to(Path::new("/data/x.sct"), Path::new("")),
            PathBuf::from("data/x.sct")
        );
    }

    #[test]
    fn zero_step_is_rejected() {
        let plan = ResizePlan {
            step: 0,
            chunk_size: None,
            writer: WriterOptions::default(),
            reader: TreeReader::default(),
            clean: false,
        };
        assert!(matches!(
            resize(Path::new("x.sct"), &[], &plan),
            Err(FriendError::Type(TypeError::InvalidChunk(_)))
        ));
    }

    #[test]
    fn output_dir_defaults_to_target_directory() {
        let key = TargetKey::new("/data/run/main.sct", Uuid::nil(), "Events");
        assert_eq!(output_dir(None, &key), PathBuf::from("/data/run"));
        assert_eq!(output_dir(Some(Path::new("/out")), &key), PathBuf::from("/out"));
        let bare = TargetKey::new("main.sct", Uuid::nil(), "Events");
        assert_eq!(output_dir(None, &bare), PathBuf::from("."));
    }
}
