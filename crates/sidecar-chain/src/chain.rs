use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sidecar_exec::{Deferred, Executor};
use sidecar_friend::FriendStore;
use sidecar_io::TreeReader;
use sidecar_types::{Batch, Chunk, ConflictPolicy, Naming, NamingKeys, TypeResult};
use tracing::debug;

use crate::error::ChainResult;

/// How a [`Chain`] reads and joins its sources.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// What happens when a friend branch collides with an existing one.
    /// With `LastWins`, the friend added last overwrites.
    pub conflict: ConflictPolicy,
    #[serde(skip)]
    pub reader: TreeReader,
}

struct FriendSlot {
    store: FriendStore,
    rename: Option<Naming>,
}

/// Rename the branches of `batch` read from friend `friend`. Naming keys
/// are `friend` and `branch`.
fn rename_branches(friend: &str, rename: Option<&Naming>, batch: Batch) -> TypeResult<Batch> {
    let Some(naming) = rename else {
        return Ok(batch);
    };
    let names = batch
        .branches()
        .into_iter()
        .map(|branch| {
            let keys = NamingKeys::from([
                ("friend".to_string(), friend.to_string()),
                ("branch".to_string(), branch.clone()),
            ]);
            naming.apply(&keys).map(|name| (branch, name))
        })
        .collect::<TypeResult<BTreeMap<String, String>>>()?;
    batch.rename(|branch| names.get(branch).cloned().unwrap_or_else(|| branch.to_string()))
}

/// Main tree chunks plus the friends that extend them.
pub struct Chain {
    config: ChainConfig,
    main: Vec<Chunk>,
    friends: Vec<FriendSlot>,
}

impl Chain {
    pub fn new(config: ChainConfig) -> Self {
        Self {
            config,
            main: Vec::new(),
            friends: Vec::new(),
        }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    // ---- Sources ----

    pub fn append(&mut self, chunk: Chunk) -> &mut Self {
        self.main.push(chunk);
        self
    }

    pub fn extend<I: IntoIterator<Item = Chunk>>(&mut self, chunks: I) -> &mut Self {
        self.main.extend(chunks);
        self
    }

    /// Register a friend. A friend with the same name as one already
    /// registered is merged into it, and its `rename` (if any) replaces
    /// the previous one.
    pub fn add_friend(&mut self, store: FriendStore, rename: Option<Naming>) -> ChainResult<&mut Self> {
        match self.friends.iter_mut().find(|slot| slot.store.name() == store.name()) {
            Some(slot) => {
                slot.store.extend(&store)?;
                if rename.is_some() {
                    slot.rename = rename;
                }
                debug!(friend = %store.name(), "friend merged into chain");
            }
            None => {
                debug!(friend = %store.name(), "friend added to chain");
                self.friends.push(FriendSlot { store, rename });
            }
        }
        Ok(self)
    }

    pub fn main(&self) -> &[Chunk] {
        &self.main
    }

    /// Friends in registration order.
    pub fn friends(&self) -> impl Iterator<Item = &FriendStore> {
        self.friends.iter().map(|slot| &slot.store)
    }

    pub fn friend(&self, name: &str) -> Option<&FriendStore> {
        self.friends().find(|store| store.name() == name)
    }

    pub fn n_entries(&self) -> u64 {
        self.main.iter().map(Chunk::len).sum()
    }

    // ---- Reads ----

    /// Join the friend data of `targets` onto `batch`.
    fn attach(&self, mut batch: Batch, targets: &[Chunk]) -> ChainResult<Batch> {
        for slot in &self.friends {
            let Some(data) = slot.store.concat(targets, &self.config.reader)? else {
                continue;
            };
            let data = rename_branches(slot.store.name(), slot.rename.as_ref(), data)?;
            batch = batch.zip(data, self.config.conflict)?;
        }
        Ok(batch)
    }

    /// Main and friend data of one chunk.
    pub fn arrays(&self, chunk: &Chunk) -> ChainResult<Batch> {
        let main = self.config.reader.arrays(chunk)?;
        self.attach(main, std::slice::from_ref(chunk))
    }

    /// Main and friend data of every chunk in one batch.
    pub fn concat(&self) -> ChainResult<Batch> {
        let main = self.config.reader.concat(&self.main)?;
        self.attach(main, &self.main)
    }

    /// Stream batches of exactly `step` entries, except the last.
    pub fn iterate(&self, step: u64) -> ChainResult<ChainBatches<'_>> {
        let groups = Chunk::partition(step, &self.main, true)?;
        Ok(ChainBatches {
            chain: self,
            groups: groups.into_iter(),
        })
    }

    /// One deferred read per main chunk, or per piece of about `partition`
    /// entries when given. Each friend must cover every piece with a
    /// single file.
    pub fn lazy(&self, partition: Option<u64>) -> ChainResult<Vec<Deferred<ChainResult<Batch>>>> {
        let mut nodes = Vec::new();
        for chunk in &self.main {
            let pieces = match partition {
                Some(size) => chunk.balance(size)?,
                None => vec![chunk.clone()],
            };
            for piece in pieces {
                let mut friends = Vec::new();
                for slot in &self.friends {
                    let lazy = slot.store.lazy(std::slice::from_ref(&piece), &self.config.reader)?;
                    if let Some(node) = lazy.and_then(|mut nodes| nodes.pop()) {
                        friends.push((slot.store.name().to_string(), slot.rename.clone(), node));
                    }
                }
                let reader = self.config.reader.clone();
                let conflict = self.config.conflict;
                let label = piece.to_string();
                nodes.push(Deferred::new(label, move || {
                    let mut batch = reader.arrays(&piece)?;
                    for (name, rename, node) in friends {
                        let data = rename_branches(&name, rename.as_ref(), node.compute()?)?;
                        batch = batch.zip(data, conflict)?;
                    }
                    Ok(batch)
                }));
            }
        }
        Ok(nodes)
    }

    /// Evaluate [`lazy`](Self::lazy) on `executor`. Results keep chunk order.
    pub fn compute(&self, partition: Option<u64>, executor: &dyn Executor) -> ChainResult<Vec<Batch>> {
        let nodes = self.lazy(partition)?;
        Deferred::compute_all(nodes, executor)?.into_iter().collect()
    }
}

/// Iterator returned by [`Chain::iterate`].
pub struct ChainBatches<'a> {
    chain: &'a Chain,
    groups: std::vec::IntoIter<Vec<Chunk>>,
}

impl Iterator for ChainBatches<'_> {
    type Item = ChainResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let group = self.groups.next()?;
        let result = self
            .chain
            .config
            .reader
            .concat(&group)
            .map_err(Into::into)
            .and_then(|main| self.chain.attach(main, &group));
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.groups.size_hint()
    }
}
