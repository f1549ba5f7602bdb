//! JSON form of a friend store:
//! `{name, branches, data: [[target, [{start, stop, chunk}, ...]], ...]}`.
//!
//! Item chunks are written without branches; on load they take the
//! store's branch set.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sidecar_io::fs;
use sidecar_types::{Chunk, TargetKey, TypeError};
use tracing::debug;

use crate::config::FriendConfig;
use crate::error::FriendResult;
use crate::item::FriendItem;
use crate::store::FriendStore;

#[derive(Serialize, Deserialize)]
struct StoreRepr {
    name: String,
    branches: Option<BTreeSet<String>>,
    data: Vec<(TargetKey, Vec<ItemRepr>)>,
}

#[derive(Serialize, Deserialize)]
struct ItemRepr {
    start: u64,
    stop: u64,
    chunk: Chunk,
}

impl FriendStore {
    /// The JSON value of this store. Every item must be on disk.
    pub fn to_json(&self) -> FriendResult<serde_json::Value> {
        self.ensure_on_disk("serialize")?;
        let data = self
            .data
            .iter()
            .map(|(key, items)| {
                let items = items
                    .iter()
                    .filter_map(|item| {
                        item.chunk().map(|chunk| ItemRepr {
                            start: item.start,
                            stop: item.stop,
                            chunk: chunk.with_branches(None),
                        })
                    })
                    .collect();
                (key.clone(), items)
            })
            .collect();
        let repr = StoreRepr {
            name: self.name.clone(),
            branches: self.branches.clone(),
            data,
        };
        Ok(serde_json::to_value(repr)?)
    }

    pub fn to_json_string(&self) -> FriendResult<String> {
        Ok(serde_json::to_string_pretty(&self.to_json()?)?)
    }

    /// Rebuild a store from its JSON value.
    ///
    /// Items are taken as recorded, sorted by start, so that damage done
    /// outside this library shows up in [`integrity`](Self::integrity)
    /// rather than failing the load. An item whose range is inverted
    /// cannot be represented and is rejected.
    pub fn from_json(value: serde_json::Value, config: FriendConfig) -> FriendResult<FriendStore> {
        let repr: StoreRepr = serde_json::from_value(value)?;
        let mut store = FriendStore::with_config(repr.name, config);
        for (key, items) in repr.data {
            let mut items = items
                .into_iter()
                .map(|it| {
                    if it.start > it.stop {
                        return Err(TypeError::InvalidRange {
                            start: it.start,
                            stop: it.stop,
                        });
                    }
                    Ok(FriendItem::new(it.start, it.stop, it.chunk.with_branches(repr.branches.clone())))
                })
                .collect::<Result<Vec<_>, _>>()?;
            items.sort_by_key(|it| (it.start, it.stop));
            store.data.entry(key).or_default().extend(items);
        }
        store.branches = repr.branches;
        Ok(store)
    }

    pub fn from_json_str(text: &str, config: FriendConfig) -> FriendResult<FriendStore> {
        Self::from_json(serde_json::from_str(text)?, config)
    }

    /// Write the JSON form to `path`.
    pub fn save(&self, path: &Path) -> FriendResult<()> {
        let value = self.to_json()?;
        fs::ensure_parent(path)?;
        let mut out = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut out, &value)?;
        out.flush()?;
        debug!(friend = %self.name, path = %path.display(), "friend saved");
        Ok(())
    }

    /// Read a store saved with [`save`](Self::save).
    pub fn load(path: &Path, config: FriendConfig) -> FriendResult<FriendStore> {
        let value: serde_json::Value = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        let store = Self::from_json(value, config)?;
        debug!(friend = %store.name, path = %path.display(), fragments = store.n_fragments(), "friend loaded");
        Ok(store)
    }
}
