use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use sidecar_types::{Batch, Chunk};

/// Friend data for one entry range: still in memory, or written to disk.
#[derive(Clone, Debug)]
pub enum Payload {
    Memory(Arc<Batch>),
    Disk(Chunk),
}

impl Payload {
    pub fn is_on_disk(&self) -> bool {
        matches!(self, Self::Disk(_))
    }

    /// Number of entries carried by the payload.
    pub fn len(&self) -> u64 {
        match self {
            Self::Memory(batch) => batch.len() as u64,
            Self::Disk(chunk) => chunk.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Batch> for Payload {
    fn from(batch: Batch) -> Self {
        Self::Memory(Arc::new(batch))
    }
}

impl From<Arc<Batch>> for Payload {
    fn from(batch: Arc<Batch>) -> Self {
        Self::Memory(batch)
    }
}

impl From<Chunk> for Payload {
    fn from(chunk: Chunk) -> Self {
        Self::Disk(chunk)
    }
}

/// An entry range `[start, stop)` of a target paired with its friend data.
#[derive(Clone, Debug)]
pub struct FriendItem {
    pub start: u64,
    pub stop: u64,
    pub payload: Payload,
}

impl FriendItem {
    pub fn new(start: u64, stop: u64, payload: impl Into<Payload>) -> Self {
        Self {
            start,
            stop,
            payload: payload.into(),
        }
    }

    pub fn len(&self) -> u64 {
        self.stop.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_on_disk(&self) -> bool {
        self.payload.is_on_disk()
    }

    /// The on-disk chunk, if the item has been written.
    pub fn chunk(&self) -> Option<&Chunk> {
        match &self.payload {
            Payload::Disk(chunk) => Some(chunk),
            Payload::Memory(_) => None,
        }
    }

    /// Order by range. `Less` when this item ends before `other` starts,
    /// `Greater` in the mirrored case, `None` for equal or overlapping
    /// ranges.
    pub fn range_cmp(&self, other: &FriendItem) -> Option<Ordering> {
        if self.start == other.start && self.stop == other.stop {
            None
        } else if self.stop <= other.start {
            Some(Ordering::Less)
        } else if other.stop <= self.start {
            Some(Ordering::Greater)
        } else {
            None
        }
    }
}

impl fmt::Display for FriendItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{})", self.start, self.stop)?;
        if !self.is_on_disk() {
            write!(f, " (in memory)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sidecar_types::Column;
    use uuid::Uuid;

    fn mem(start: u64, stop: u64) -> FriendItem {
        let rows = (stop - start) as usize;
        FriendItem::new(start, stop, Batch::new([("x", Column::Int64(vec![0; rows]))]).unwrap())
    }

    #[test]
    fn range_ordering() {
        assert_eq!(mem(0, 10).range_cmp(&mem(10, 20)), Some(Ordering::Less));
        assert_eq!(mem(10, 20).range_cmp(&mem(0, 10)), Some(Ordering::Greater));
        assert_eq!(mem(0, 10).range_cmp(&mem(5, 15)), None);
        assert_eq!(mem(0, 10).range_cmp(&mem(0, 10)), None);
    }

    #[test]
    fn payload_kinds() {
        let item = mem(3, 7);
        assert!(!item.is_on_disk());
        assert_eq!(item.payload.len(), 4);
        assert_eq!(item.to_string(), "[3,7) (in memory)");

        let chunk = Chunk::new("f.sct", Uuid::nil(), "Events", 0, 4).unwrap();
        let disk = FriendItem::new(3, 7, chunk.clone());
        assert_eq!(disk.chunk(), Some(&chunk));
        assert_eq!(disk.to_string(), "[3,7)");
    }

    #[test]
    fn inverted_range_is_empty() {
        let chunk = Chunk::new("f.sct", Uuid::nil(), "Events", 0, 4).unwrap();
        let item = FriendItem::new(20, 10, chunk);
        assert_eq!(item.len(), 0);
        assert!(item.is_empty());
    }
}
