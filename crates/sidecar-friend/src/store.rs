use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use sidecar_exec::{map, Deferred, Executor, Inline};
use sidecar_io::{check_chunk, fs, TreeReader, TreeResult};
use sidecar_types::{Batch, Chunk, TargetKey};
use tracing::{debug, info, warn};

use crate::config::{ExtraBranches, FriendConfig};
use crate::dump::{AutoDumpState, InFlight};
use crate::error::{FriendError, FriendResult};
use crate::item::{FriendItem, Payload};

pub(crate) fn or_inline(executor: Option<&dyn Executor>) -> &dyn Executor {
    executor.unwrap_or(&Inline)
}

/// Locates one item of a store: target key plus its exact range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ItemRef {
    pub key: TargetKey,
    pub start: u64,
    pub stop: u64,
}

/// Friend data attached to target trees.
///
/// For every [`TargetKey`] the store keeps a sorted list of
/// non-overlapping [`FriendItem`]s. The branch set is fixed by the first
/// item; later items must provide at least those branches.
///
/// Bookkeeping is not thread-safe: concurrent use of one store needs
/// external locking. File I/O is delegated to an [`Executor`].
pub struct FriendStore {
    pub(crate) name: String,
    pub(crate) branches: Option<BTreeSet<String>>,
    pub(crate) data: BTreeMap<TargetKey, Vec<FriendItem>>,
    pub(crate) pending: Vec<ItemRef>,
    pub(crate) in_flight: Vec<InFlight>,
    pub(crate) auto: Option<AutoDumpState>,
    pub(crate) config: FriendConfig,
}

impl FriendStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, FriendConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: FriendConfig) -> Self {
        Self {
            name: name.into(),
            branches: None,
            data: BTreeMap::new(),
            pending: Vec::new(),
            in_flight: Vec::new(),
            auto: None,
            config,
        }
    }

    /// An empty store with the same name, branches and config.
    pub(crate) fn empty_like(&self) -> Self {
        let mut store = Self::with_config(self.name.clone(), self.config.clone());
        store.branches = self.branches.clone();
        store
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The fixed branch set, once the first item has been added.
    pub fn branches(&self) -> Option<&BTreeSet<String>> {
        self.branches.as_ref()
    }

    pub fn config(&self) -> &FriendConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: FriendConfig) {
        self.config = config;
    }

    pub fn keys(&self) -> impl Iterator<Item = &TargetKey> {
        self.data.keys()
    }

    /// Items stored for `key`, sorted by range.
    pub fn items(&self, key: &TargetKey) -> &[FriendItem] {
        self.data.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// One chunk per contiguous run of items.
    pub fn targets(&self) -> Vec<Chunk> {
        self.contiguous_runs()
            .into_iter()
            .filter_map(|(key, run)| {
                let (first, last) = (run.first()?, run.last()?);
                key.chunk(first.start, last.stop).ok()
            })
            .collect()
    }

    /// Number of items (friend files once dumped).
    pub fn n_fragments(&self) -> usize {
        self.data.values().map(Vec::len).sum()
    }

    /// Number of target entries covered.
    pub fn n_entries(&self) -> u64 {
        self.data.values().flatten().map(FriendItem::len).sum()
    }

    /// Whether any item is not yet durable.
    pub fn has_in_memory(&self) -> bool {
        !self.pending.is_empty() || !self.in_flight.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.data.values().all(Vec::is_empty)
    }

    /// Maximal runs of items where each one starts where the previous
    /// one stops.
    pub(crate) fn contiguous_runs(&self) -> Vec<(&TargetKey, &[FriendItem])> {
        let mut runs = Vec::new();
        for (key, items) in &self.data {
            let mut first = 0;
            for i in 1..=items.len() {
                if i == items.len() || items[i - 1].stop != items[i].start {
                    if first < i {
                        runs.push((key, &items[first..i]));
                    }
                    first = i;
                }
            }
        }
        runs
    }

    pub(crate) fn ensure_on_disk(&self, op: &'static str) -> FriendResult<()> {
        if self.has_in_memory() {
            return Err(FriendError::InMemory {
                op,
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    fn schema_error(&self, reason: String) -> FriendError {
        FriendError::Schema {
            name: self.name.clone(),
            reason,
        }
    }

    /// The branch set an item offering `available` will carry.
    pub(crate) fn fit_branches(&self, available: &BTreeSet<String>) -> FriendResult<BTreeSet<String>> {
        let Some(fixed) = &self.branches else {
            return Ok(available.clone());
        };
        let missing: BTreeSet<&String> = fixed.difference(available).collect();
        if !missing.is_empty() {
            return Err(self.schema_error(format!("missing branches {missing:?}")));
        }
        if self.config.extra_branches == ExtraBranches::Reject {
            let extra: BTreeSet<&String> = available.difference(fixed).collect();
            if !extra.is_empty() {
                return Err(self.schema_error(format!("unexpected branches {extra:?}")));
            }
        }
        Ok(fixed.clone())
    }

    /// Validate an on-disk payload for `[start, stop)` and project it onto
    /// the store's branches.
    pub(crate) fn fit_chunk(
        &self,
        start: u64,
        stop: u64,
        chunk: Chunk,
    ) -> FriendResult<(Chunk, BTreeSet<String>)> {
        let available = chunk
            .branches
            .clone()
            .ok_or_else(|| self.schema_error(format!("{chunk} has no branch information")))?;
        let branches = self.fit_branches(&available)?;
        if chunk.len() != stop - start {
            return Err(FriendError::LengthMismatch {
                chunk: chunk.to_string(),
                entries: chunk.len(),
                start,
                stop,
            });
        }
        Ok((chunk.with_branches(Some(branches.clone())), branches))
    }

    /// Attach `data` to the entries of `target`.
    ///
    /// A chunk is checked and stored as is. A batch is buffered until the
    /// next [`dump`](Self::dump), or dumped at once while an
    /// [`auto_dump`](Self::auto_dump) guard is alive. On error the store is
    /// left unchanged.
    pub fn add(&mut self, target: &Chunk, data: impl Into<Payload>) -> FriendResult<()> {
        let (start, stop) = (target.entry_start, target.entry_stop);
        let (payload, branches) = match data.into() {
            Payload::Memory(batch) => {
                let branches = self.fit_branches(&batch.branches())?;
                let batch = if batch.branches() == branches {
                    batch
                } else {
                    Arc::new(batch.project(&branches)?)
                };
                (Payload::Memory(batch), branches)
            }
            Payload::Disk(chunk) => {
                let (chunk, branches) = self.fit_chunk(start, stop, chunk)?;
                (Payload::Disk(chunk), branches)
            }
        };

        let key = target.key();
        let item = FriendItem {
            start,
            stop,
            payload,
        };
        let pos = insert_position(&key, self.items(&key), &item)?;

        let on_disk = item.is_on_disk();
        let auto = match &self.auto {
            Some(auto) if !on_disk => Some((auto.options.clone(), auto.executor.clone())),
            _ => None,
        };
        // Earlier pending items go first so that a failure there inserts nothing.
        if let Some((options, executor)) = &auto {
            self.dump(options, executor.as_deref())?;
        }

        let previous = self.branches.replace(branches);
        self.data.entry(key.clone()).or_default().insert(pos, item);
        debug!(friend = %self.name, target = %key, start, stop, on_disk, "item added");

        if !on_disk {
            let item = ItemRef { key, start, stop };
            match auto {
                Some((options, executor)) => {
                    if let Err(e) = self.dump_one(item.clone(), &options, executor.as_deref()) {
                        self.discard(&item, previous);
                        return Err(e);
                    }
                }
                None => self.pending.push(item),
            }
        }
        Ok(())
    }

    /// Take back an item inserted by an `add` that failed afterwards.
    fn discard(&mut self, item: &ItemRef, branches: Option<BTreeSet<String>>) {
        self.pending.retain(|pending| pending != item);
        if let Some(items) = self.data.get_mut(&item.key) {
            items.retain(|it| (it.start, it.stop) != (item.start, item.stop));
            if items.is_empty() {
                self.data.remove(&item.key);
            }
        }
        self.branches = branches;
        debug!(friend = %self.name, target = %item.key, start = item.start, stop = item.stop, "item discarded");
    }

    pub(crate) fn item_mut(&mut self, item: &ItemRef) -> Option<&mut FriendItem> {
        let items = self.data.get_mut(&item.key)?;
        let idx = items.partition_point(|it| it.start < item.start);
        items[idx..]
            .iter_mut()
            .take_while(|it| it.start == item.start)
            .find(|it| it.stop == item.stop)
    }

    /// The on-disk chunk slices covering `target`, in entry order.
    pub fn resolve(&self, target: &Chunk) -> FriendResult<Vec<Chunk>> {
        let key = target.key();
        let missing = |start, stop| FriendError::Missing {
            name: self.name.clone(),
            target: key.clone(),
            start,
            stop,
        };
        let Some(items) = self.data.get(&key) else {
            return Err(missing(target.entry_start, target.entry_stop));
        };

        let (mut start, stop) = (target.entry_start, target.entry_stop);
        let first = items.partition_point(|it| it.stop <= start);
        let mut chunks = Vec::new();
        for item in &items[first..] {
            if start >= stop {
                break;
            }
            if item.start > start {
                return Err(missing(start, item.start.min(stop)));
            }
            let chunk = item.chunk().ok_or_else(|| FriendError::InMemory {
                op: "read",
                name: self.name.clone(),
            })?;
            let end = stop.min(item.stop);
            chunks.push(chunk.slice(start - item.start, end - item.start)?);
            start = end;
        }
        if start < stop {
            return Err(missing(start, stop));
        }
        Ok(chunks)
    }

    fn tolerate<T>(&self, result: FriendResult<T>) -> FriendResult<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_missing() && self.config.allow_missing => {
                debug!(friend = %self.name, error = %e, "missing entries tolerated");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Read the friend data of `target`.
    pub fn arrays(&self, target: &Chunk, reader: &TreeReader) -> FriendResult<Option<Batch>> {
        self.ensure_on_disk("read")?;
        let result = self
            .resolve(target)
            .and_then(|chunks| Ok(reader.concat(&chunks)?));
        self.tolerate(result)
    }

    /// Read the friend data of all `targets` into one batch.
    pub fn concat(&self, targets: &[Chunk], reader: &TreeReader) -> FriendResult<Option<Batch>> {
        self.ensure_on_disk("read")?;
        let result = targets
            .iter()
            .map(|t| self.resolve(t))
            .collect::<FriendResult<Vec<_>>>()
            .and_then(|chunks| Ok(reader.concat(&chunks.concat())?));
        self.tolerate(result)
    }

    /// One deferred read per target. Each target must be backed by a
    /// single file.
    pub fn lazy(
        &self,
        targets: &[Chunk],
        reader: &TreeReader,
    ) -> FriendResult<Option<Vec<Deferred<TreeResult<Batch>>>>> {
        self.ensure_on_disk("read")?;
        let result = targets
            .iter()
            .map(|target| {
                let mut chunks = self.resolve(target)?;
                let label = format!("{}:{target}", self.name);
                match chunks.len() {
                    0 => Ok(Deferred::ready(label, Ok(Batch::default()))),
                    1 => {
                        let chunk = chunks.remove(0);
                        let reader = reader.clone();
                        Ok(Deferred::new(label, move || reader.arrays(&chunk)))
                    }
                    files => Err(FriendError::NotMerged {
                        name: self.name.clone(),
                        target: target.key(),
                        files,
                    }),
                }
            })
            .collect::<FriendResult<Vec<_>>>();
        self.tolerate(result)
    }

    /// Insert every item of `other`. Both stores must be on disk and share
    /// name and branches. Either all items are inserted or none.
    pub fn extend(&mut self, other: &FriendStore) -> FriendResult<()> {
        self.ensure_on_disk("extend")?;
        other.ensure_on_disk("extend")?;
        if self.name != other.name {
            return Err(FriendError::Incompatible(format!(
                "names {:?} and {:?} differ",
                self.name, other.name
            )));
        }
        let branches = match (&self.branches, &other.branches) {
            (Some(a), Some(b)) if a != b => {
                return Err(FriendError::Incompatible(format!(
                    "branches {a:?} and {b:?} differ"
                )))
            }
            (a, b) => a.clone().or_else(|| b.clone()),
        };

        let mut data = self.data.clone();
        for (key, items) in &other.data {
            for item in items {
                let list = data.entry(key.clone()).or_default();
                let pos = insert_position(key, list, item)?;
                list.insert(pos, item.clone());
            }
        }
        self.data = data;
        self.branches = branches;
        Ok(())
    }

    /// A copy of this store. Requires every item on disk.
    pub fn try_clone(&self) -> FriendResult<FriendStore> {
        self.ensure_on_disk("clone")?;
        let mut store = self.empty_like();
        store.data = self.data.clone();
        Ok(store)
    }

    /// A copy with file locations taken from `chunks` wherever their uid
    /// matches an item's file.
    pub fn update<'a, I>(&self, chunks: I) -> FriendResult<FriendStore>
    where
        I: IntoIterator<Item = &'a Chunk>,
    {
        self.ensure_on_disk("update")?;
        let paths: HashMap<_, _> = chunks.into_iter().map(|c| (c.uid, c.path.clone())).collect();
        let mut store = self.empty_like();
        for (key, items) in &self.data {
            let updated = items
                .iter()
                .map(|item| match item.chunk().and_then(|c| paths.get(&c.uid).map(|p| c.with_path(p))) {
                    Some(chunk) => FriendItem::new(item.start, item.stop, chunk),
                    None => item.clone(),
                })
                .collect();
            store.data.insert(key.clone(), updated);
        }
        Ok(store)
    }

    /// A copy without items whose files are missing or disagree with the
    /// recorded metadata.
    pub fn cleanup(&self, executor: Option<&dyn Executor>) -> FriendResult<FriendStore> {
        self.ensure_on_disk("cleanup")?;
        let jobs: Vec<(TargetKey, u64, u64, Chunk)> = self
            .data
            .iter()
            .flat_map(|(key, items)| {
                items.iter().filter_map(move |item| {
                    item.chunk().map(|c| (key.clone(), item.start, item.stop, c.clone()))
                })
            })
            .collect();
        let checked = map(or_inline(executor), jobs, |(key, start, stop, chunk)| {
            let ok = check_chunk(&chunk).is_ok();
            (key, start, stop, chunk, ok)
        })?;

        let mut store = self.empty_like();
        let mut removed = 0usize;
        for (key, start, stop, chunk, ok) in checked {
            if ok {
                store.add(&key.chunk(start, stop)?, chunk)?;
            } else {
                warn!(friend = %self.name, path = %chunk.path.display(), start, stop, "dropping invalid item");
                removed += 1;
            }
        }
        info!(friend = %self.name, removed, kept = store.n_fragments(), "cleanup finished");
        Ok(store)
    }

    /// Delete every file backing an on-disk item and empty the store.
    /// Returns the deleted paths.
    pub fn reset(&mut self, executor: Option<&dyn Executor>) -> FriendResult<Vec<PathBuf>> {
        let files: BTreeSet<PathBuf> = self
            .data
            .values()
            .flatten()
            .filter_map(|item| item.chunk().map(|c| c.path.clone()))
            .collect();
        let files: Vec<PathBuf> = files.into_iter().collect();
        let results = map(or_inline(executor), files.clone(), |path: PathBuf| fs::remove_file(&path))?;

        self.branches = None;
        self.data.clear();
        self.pending.clear();
        self.in_flight.clear();
        self.auto = None;
        info!(friend = %self.name, files = files.len(), "friend store reset");

        for result in results {
            result?;
        }
        Ok(files)
    }
}

/// Where `item` goes in `items`, or the overlap that prevents it.
pub(crate) fn insert_position(
    key: &TargetKey,
    items: &[FriendItem],
    item: &FriendItem,
) -> FriendResult<usize> {
    let idx = items.partition_point(|it| it.range_cmp(item) == Some(Ordering::Less));
    match items.get(idx) {
        Some(existing) if item.range_cmp(existing) != Some(Ordering::Less) => {
            Err(FriendError::Overlap {
                target: key.clone(),
                start: item.start,
                stop: item.stop,
                existing_start: existing.start,
                existing_stop: existing.stop,
            })
        }
        _ => Ok(idx),
    }
}

impl fmt::Debug for FriendStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FriendStore")
            .field("name", &self.name)
            .field("branches", &self.branches)
            .field("targets", &self.data.len())
            .field("fragments", &self.n_fragments())
            .field("pending", &self.pending.len())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl fmt::Display for FriendStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let branches: Vec<&String> = self.branches.iter().flatten().collect();
        write!(f, "{}:{branches:?}", self.name)?;
        for (key, items) in &self.data {
            write!(f, "\n{key}\n   ")?;
            for item in items {
                write!(f, " {item}")?;
            }
        }
        Ok(())
    }
}
