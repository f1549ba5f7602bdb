//! Tree files for sidecar.
//!
//! A tree file holds one or more named trees of typed columns. Rows are
//! stored in zstd-compressed, CRC-checked baskets; a bincode footer indexes
//! every basket and a BLAKE3 trailer covers the whole file.
//!
//! # Architecture
//!
//! - **TreeWriter**: appends batches, buffers baskets, persists atomically
//! - **TreeFile**: opens a file and reads entry ranges of one tree
//! - **TreeReader**: reads chunks, concatenates them, streams fixed-size steps
//! - **check**: compares a chunk with the file it points at
//! - **fs**: move/copy/remove helpers shared by dump, merge and clone

pub mod check;
pub mod error;
pub mod format;
pub mod fs;
pub mod reader;
pub mod writer;

pub use check::{check_chunk, fetch_chunk, ChunkCheck, ChunkIssue};
pub use error::{TreeError, TreeResult};
pub use format::{BasketMeta, Footer, TreeMeta};
pub use reader::{Batches, BranchFilter, ReaderOptions, Transform, TreeFile, TreeReader};
pub use writer::{write_batch, TreeWriter, WriterOptions, WrittenFile};

#[cfg(test)]
mod tests {
    use super::*;
    use sidecar_types::{Batch, Column};

    #[test]
    fn several_trees_in_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("multi.sct");
        let events = Batch::new([("pt", Column::Float64(vec![1.0, 2.0, 3.0]))]).unwrap();
        let runs = Batch::new([("run", Column::UInt64(vec![7]))]).unwrap();

        let mut writer = TreeWriter::create(&path, WriterOptions::default()).unwrap();
        writer.extend(&events).unwrap();
        writer.extend_tree("Runs", &runs).unwrap();
        writer.extend_tree("Empty", &Batch::empty(&runs.schema())).unwrap();
        let written = writer.finish().unwrap();

        let file = TreeFile::open(&path).unwrap();
        assert_eq!(file.trees().collect::<Vec<_>>(), vec!["Empty", "Events", "Runs"]);
        assert_eq!(file.num_entries("Empty").unwrap(), 0);
        assert_eq!(written.chunk("Runs").unwrap().len(), 1);

        let reader = TreeReader::default();
        let got = reader.arrays(&fetch_chunk(&path, "Events").unwrap()).unwrap();
        assert_eq!(got, events);
        let empty = reader.arrays(&written.chunk("Empty").unwrap()).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.branches(), runs.branches());
    }

    #[test]
    fn strings_and_bools_survive() {
        let dir = tempfile::tempdir().unwrap();
        let batch = Batch::new([
            ("label", Column::Utf8(vec!["a".into(), "".into(), "ccc".into()])),
            ("pass", Column::Bool(vec![true, false, true])),
        ])
        .unwrap();
        let chunk = write_batch(&dir.path().join("s.sct"), &batch, WriterOptions::default()).unwrap();
        let back = TreeReader::default().arrays(&chunk.slice(1, 3).unwrap()).unwrap();
        assert_eq!(back, batch.slice(1, 3).unwrap());
    }
}
