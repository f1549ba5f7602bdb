//! Chains for sidecar.
//!
//! A [`Chain`] is a list of main tree chunks together with named
//! [`FriendStore`](sidecar_friend::FriendStore)s. Every read resolves the
//! friend data covering the requested main entries and joins it onto the
//! main columns, renaming friend branches on the way when a naming rule
//! is set.

pub mod chain;
pub mod error;

pub use chain::{Chain, ChainBatches, ChainConfig};
pub use error::{ChainError, ChainResult};

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use sidecar_exec::ThreadPool;
    use sidecar_friend::{DumpOptions, FriendError, FriendStore};
    use sidecar_io::{write_batch, WriterOptions};
    use sidecar_types::{Batch, Chunk, Column, ConflictPolicy, Naming, TypeError};

    fn main_file(dir: &Path) -> Chunk {
        let pt = Batch::new([("pt", Column::Float64((0..100).map(f64::from).collect()))]).unwrap();
        write_batch(&dir.join("main.sct"), &pt, WriterOptions::default()).unwrap()
    }

    fn friend(dir: &Path, name: &str, branch: &str, main: &Chunk, ranges: &[(u64, u64)]) -> FriendStore {
        let key = main.key();
        let mut store = FriendStore::new(name);
        for &(start, stop) in ranges {
            let data = Batch::new([(branch, Column::Int64((start as i64..stop as i64).collect()))]).unwrap();
            store.add(&key.chunk(start, stop).unwrap(), data).unwrap();
        }
        store.dump(&DumpOptions::new(dir.join(name)), None).unwrap();
        store
    }

    fn chain(main: &Chunk) -> Chain {
        let mut chain = Chain::new(ChainConfig::default());
        chain
            .append(main.slice(0, 60).unwrap())
            .append(main.slice(60, 100).unwrap());
        chain
    }

    fn column_len(batch: &Batch, branch: &str) -> usize {
        batch.column(branch).map(Column::len).unwrap_or(0)
    }

    #[test]
    fn friend_columns_join_main() {
        let dir = tempfile::tempdir().unwrap();
        let main = main_file(dir.path());
        let mut chain = chain(&main);
        chain
            .add_friend(friend(dir.path(), "jets", "x", &main, &[(0, 50), (50, 100)]), None)
            .unwrap();
        assert_eq!(chain.n_entries(), 100);

        let batch = chain.arrays(&chain.main()[1]).unwrap();
        assert_eq!(batch.len(), 40);
        assert_eq!(batch.column("x"), Some(&Column::Int64((60..100).collect())));
        assert_eq!(batch.column("pt"), Some(&Column::Float64((60..100).map(f64::from).collect())));

        let all = chain.concat().unwrap();
        assert_eq!(all.len(), 100);
        assert_eq!(column_len(&all, "x"), 100);
    }

    #[test]
    fn rename_and_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let main = main_file(dir.path());
        let mut chain = chain(&main);
        chain
            .add_friend(
                friend(dir.path(), "jets", "pt", &main, &[(0, 100)]),
                Some(Naming::template("{friend}_{branch}")),
            )
            .unwrap();
        let batch = chain.arrays(&chain.main()[0]).unwrap();
        assert_eq!(batch.branches().into_iter().collect::<Vec<_>>(), vec!["jets_pt", "pt"]);

        // Without renaming the friend's `pt` overwrites the main one.
        let mut last_wins = self::chain(&main);
        last_wins
            .add_friend(friend(dir.path(), "muons", "pt", &main, &[(0, 100)]), None)
            .unwrap();
        let batch = last_wins.arrays(&last_wins.main()[0]).unwrap();
        assert_eq!(batch.column("pt"), Some(&Column::Int64((0..60).collect())));

        let mut strict = Chain::new(ChainConfig {
            conflict: ConflictPolicy::Error,
            ..Default::default()
        });
        strict.append(main.clone());
        strict
            .add_friend(friend(dir.path(), "taus", "pt", &main, &[(0, 100)]), None)
            .unwrap();
        assert!(matches!(
            strict.concat(),
            Err(ChainError::Type(TypeError::DuplicateBranch(_)))
        ));
    }

    #[test]
    fn same_name_friends_merge() {
        let dir = tempfile::tempdir().unwrap();
        let main = main_file(dir.path());
        let mut chain = chain(&main);
        chain
            .add_friend(friend(dir.path(), "jets", "x", &main, &[(0, 50)]), None)
            .unwrap();
        assert!(matches!(
            chain.arrays(&chain.main()[1]),
            Err(ChainError::Friend(FriendError::Missing { start: 60, stop: 100, .. }))
        ));

        chain
            .add_friend(friend(&dir.path().join("more"), "jets", "x", &main, &[(50, 100)]), None)
            .unwrap();
        assert_eq!(chain.friends().count(), 1);
        assert_eq!(chain.friend("jets").unwrap().n_fragments(), 2);
        assert_eq!(chain.concat().unwrap().len(), 100);

        let other = friend(&dir.path().join("other"), "jets", "y", &main, &[(100, 100)]);
        assert!(matches!(
            chain.add_friend(other, None),
            Err(ChainError::Friend(FriendError::Incompatible(_)))
        ));
    }

    #[test]
    fn iterate_in_steps() {
        let dir = tempfile::tempdir().unwrap();
        let main = main_file(dir.path());
        let mut chain = chain(&main);
        chain
            .add_friend(friend(dir.path(), "jets", "x", &main, &[(0, 45), (45, 100)]), None)
            .unwrap();

        let lens: Vec<usize> = chain.iterate(30).unwrap().map(|b| b.unwrap().len()).collect();
        assert_eq!(lens, vec![30, 30, 30, 10]);
        let batches: Vec<Batch> = chain.iterate(30).unwrap().collect::<ChainResult<_>>().unwrap();
        assert_eq!(Batch::concat(&batches).unwrap(), chain.concat().unwrap());
    }

    #[test]
    fn lazy_pieces_match_eager_read() {
        let dir = tempfile::tempdir().unwrap();
        let main = main_file(dir.path());
        let mut chain = chain(&main);
        chain
            .add_friend(friend(dir.path(), "jets", "x", &main, &[(0, 60), (60, 100)]), None)
            .unwrap();

        let nodes = chain.lazy(Some(25)).unwrap();
        assert_eq!(nodes.len(), 4);

        let pool = ThreadPool::with_threads(2).unwrap();
        let batches = chain.compute(Some(25), &pool).unwrap();
        let lens: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(lens, vec![30, 30, 20, 20]);
        assert_eq!(Batch::concat(&batches).unwrap(), chain.concat().unwrap());
    }

    #[test]
    fn lazy_needs_merged_friends() {
        let dir = tempfile::tempdir().unwrap();
        let main = main_file(dir.path());
        let mut chain = chain(&main);
        chain
            .add_friend(friend(dir.path(), "jets", "x", &main, &[(0, 30), (30, 100)]), None)
            .unwrap();
        assert!(matches!(
            chain.lazy(None),
            Err(ChainError::Friend(FriendError::NotMerged { .. }))
        ));
    }

    #[test]
    fn config_from_json() {
        let config: ChainConfig = serde_json::from_str(r#"{"conflict": "Error"}"#).unwrap();
        assert_eq!(config.conflict, ConflictPolicy::Error);
    }
}
