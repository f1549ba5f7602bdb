//! Turning in-memory items into files.
//!
//! Without an executor, [`FriendStore::dump`] writes every pending item on
//! the calling thread and applies the results at once. With one, jobs are
//! submitted and their items move from pending to in flight; the item
//! transitions happen later in [`FriendStore::wait_dumps`] or
//! [`FriendStore::poll_dumps`]. A failed job puts its item back to pending.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sidecar_exec::{submit, Executor, JobHandle};
use sidecar_io::{write_batch, TreeResult};
use sidecar_types::{path_parts, Batch, Chunk, Naming, NamingKeys, TargetKey};
use tracing::{debug, info, warn};

use crate::config::DumpOptions;
use crate::error::{FriendError, FriendResult};
use crate::item::Payload;
use crate::store::{FriendStore, ItemRef};

pub(crate) struct InFlight {
    item: ItemRef,
    path: PathBuf,
    handle: JobHandle<TreeResult<Chunk>>,
}

#[derive(Clone)]
pub(crate) struct AutoDumpState {
    pub options: DumpOptions,
    pub executor: Option<Arc<dyn Executor>>,
}

/// Naming keys for the range `[start, stop)` of `key`: `name`, `uid`,
/// `tree`, `start`, `stop` and `path0`, `path1`, ... (reversed components
/// of the target path).
pub fn naming_keys(name: &str, key: &TargetKey, start: u64, stop: u64) -> NamingKeys {
    let mut keys = path_parts(&key.path, "path");
    keys.insert("name".into(), name.to_string());
    keys.insert("uid".into(), key.uid.to_string());
    keys.insert("tree".into(), key.tree.clone());
    keys.insert("start".into(), start.to_string());
    keys.insert("stop".into(), stop.to_string());
    keys
}

/// `base` if given, otherwise the directory holding the target.
pub(crate) fn output_dir(base: Option<&Path>, key: &TargetKey) -> PathBuf {
    match (base, key.path.parent()) {
        (Some(base), _) => base.to_path_buf(),
        (None, Some(parent)) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

pub(crate) fn output_path(
    base: Option<&Path>,
    naming: &Naming,
    name: &str,
    key: &TargetKey,
    start: u64,
    stop: u64,
) -> FriendResult<PathBuf> {
    let file = naming.apply(&naming_keys(name, key, start, stop))?;
    Ok(output_dir(base, key).join(file))
}

impl FriendStore {
    /// Number of items waiting to be dumped.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Number of submitted dump jobs not yet applied.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn memory_batch(&self, item: &ItemRef) -> Option<Arc<Batch>> {
        self.items(&item.key)
            .iter()
            .find(|it| it.start == item.start && it.stop == item.stop)
            .and_then(|it| match &it.payload {
                Payload::Memory(batch) => Some(Arc::clone(batch)),
                Payload::Disk(_) => None,
            })
    }

    /// Write every pending item to its own file. Returns the number of
    /// items written (or submitted, when `executor` is given).
    pub fn dump(&mut self, options: &DumpOptions, executor: Option<&dyn Executor>) -> FriendResult<usize> {
        let mut queue = std::mem::take(&mut self.pending).into_iter();
        let mut count = 0;
        while let Some(item) = queue.next() {
            match self.dump_one(item, options, executor) {
                Ok(true) => count += 1,
                Ok(false) => {}
                Err(e) => {
                    self.pending.extend(queue);
                    return Err(e);
                }
            }
        }
        if count > 0 && executor.is_none() {
            info!(friend = %self.name, items = count, "dumped");
        }
        Ok(count)
    }

    /// Write or submit one pending item. `false` when the item has no
    /// in-memory data left to write. On error the item is pending again.
    pub(crate) fn dump_one(
        &mut self,
        item: ItemRef,
        options: &DumpOptions,
        executor: Option<&dyn Executor>,
    ) -> FriendResult<bool> {
        let Some(batch) = self.memory_batch(&item) else {
            debug!(target = %item.key, start = item.start, "pending item no longer in memory");
            return Ok(false);
        };
        let path = match output_path(
            options.base_path.as_deref(),
            &options.naming,
            &self.name,
            &item.key,
            item.start,
            item.stop,
        ) {
            Ok(path) => path,
            Err(e) => {
                self.pending.push(item);
                return Err(e);
            }
        };

        match executor {
            None => {
                let result = write_batch(&path, &batch, options.writer.clone()).map_err(FriendError::from);
                self.complete_dump(item, result).map(|()| true)
            }
            Some(executor) => {
                let writer = options.writer.clone();
                let job_path = path.clone();
                match submit(executor, move || write_batch(&job_path, &batch, writer)) {
                    Ok(handle) => {
                        debug!(path = %path.display(), executor = executor.name(), "dump submitted");
                        self.in_flight.push(InFlight { item, path, handle });
                        Ok(true)
                    }
                    Err(e) => {
                        self.pending.push(item);
                        Err(e.into())
                    }
                }
            }
        }
    }

    /// Apply the outcome of one dump job: the item becomes durable, or
    /// goes back to pending.
    fn complete_dump(&mut self, item: ItemRef, result: FriendResult<Chunk>) -> FriendResult<()> {
        let fitted = result.and_then(|chunk| self.fit_chunk(item.start, item.stop, chunk));
        match fitted {
            Ok((chunk, branches)) => {
                self.branches = Some(branches);
                match self.item_mut(&item) {
                    Some(slot) => {
                        debug!(path = %chunk.path.display(), start = item.start, stop = item.stop, "item durable");
                        slot.payload = Payload::Disk(chunk);
                    }
                    None => warn!(path = %chunk.path.display(), "dumped item no longer in store"),
                }
                Ok(())
            }
            Err(e) => {
                warn!(friend = %self.name, start = item.start, stop = item.stop, error = %e, "dump failed, item stays pending");
                self.pending.push(item);
                Err(e)
            }
        }
    }

    /// Block on every submitted dump job and apply the results. Returns
    /// the number of items made durable; the first failure is returned
    /// after all jobs are applied.
    pub fn wait_dumps(&mut self) -> FriendResult<usize> {
        let jobs = std::mem::take(&mut self.in_flight);
        let mut done = 0;
        let mut first_err = None;
        for job in jobs {
            let result = job
                .handle
                .wait()
                .map_err(FriendError::from)
                .and_then(|r| r.map_err(FriendError::from));
            match self.complete_dump(job.item, result) {
                Ok(()) => done += 1,
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        if done > 0 {
            info!(friend = %self.name, items = done, "dumped");
        }
        first_err.map_or(Ok(done), Err)
    }

    /// Apply the dump jobs that have already finished.
    pub fn poll_dumps(&mut self) -> FriendResult<usize> {
        let jobs = std::mem::take(&mut self.in_flight);
        let mut done = 0;
        let mut first_err = None;
        for mut job in jobs {
            let Some(result) = job.handle.try_wait() else {
                self.in_flight.push(job);
                continue;
            };
            let result = result
                .map_err(FriendError::from)
                .and_then(|r| r.map_err(FriendError::from));
            match self.complete_dump(job.item, result) {
                Ok(()) => done += 1,
                Err(e) => {
                    warn!(path = %job.path.display(), "dump job failed");
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(done), Err)
    }

    /// Dump every in-memory item as soon as it is added, for as long as the
    /// returned guard lives.
    pub fn auto_dump(
        &mut self,
        options: DumpOptions,
        executor: Option<Arc<dyn Executor>>,
    ) -> AutoDump<'_> {
        self.auto = Some(AutoDumpState { options, executor });
        AutoDump { store: self }
    }
}

/// Guard returned by [`FriendStore::auto_dump`]. Dereferences to the store.
pub struct AutoDump<'a> {
    store: &'a mut FriendStore,
}

impl Deref for AutoDump<'_> {
    type Target = FriendStore;

    fn deref(&self) -> &FriendStore {
        self.store
    }
}

impl DerefMut for AutoDump<'_> {
    fn deref_mut(&mut self) -> &mut FriendStore {
        self.store
    }
}

impl Drop for AutoDump<'_> {
    fn drop(&mut self) {
        self.store.auto = None;
    }
}
