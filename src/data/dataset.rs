//! Dataset trait and reference implementations

use super::Sample;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Which part of a dataset an epoch reads
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    #[default]
    Train,
    Valid,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Valid, Split::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Valid => "valid",
            Split::Test => "test",
        }
    }

    /// Stable per-split number used to derive random streams
    pub(crate) fn stream_id(&self) -> u64 {
        match self {
            Split::Train => 1,
            Split::Valid => 2,
            Split::Test => 3,
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An indexed, length-bearing collection of samples per split.
///
/// Implementations must be `Send + Sync` so the batch loader can read from
/// worker threads. Ordering is never implied by the dataset itself; see
/// [`DataSetWrapper`](super::DataSetWrapper).
pub trait Dataset: Send + Sync {
    /// Number of samples in `split`
    fn len(&self, split: Split) -> usize;

    fn is_empty(&self, split: Split) -> bool {
        self.len(split) == 0
    }

    /// Sample at `index` of `split`. `Sample::None` marks a skippable sample.
    fn get(&self, split: Split, index: usize) -> Result<Sample>;

    /// Optional human-readable name.
    fn name(&self) -> &str {
        "dataset"
    }
}

/// In-memory dataset holding ready-made samples.
#[derive(Debug, Clone, Default)]
pub struct VecDataset {
    train: Vec<Sample>,
    valid: Vec<Sample>,
    test: Vec<Sample>,
}

impl VecDataset {
    pub fn new(train: Vec<Sample>) -> Self {
        Self {
            train,
            ..Self::default()
        }
    }

    pub fn with_valid(mut self, valid: Vec<Sample>) -> Self {
        self.valid = valid;
        self
    }

    pub fn with_test(mut self, test: Vec<Sample>) -> Self {
        self.test = test;
        self
    }

    fn split(&self, split: Split) -> &[Sample] {
        match split {
            Split::Train => &self.train,
            Split::Valid => &self.valid,
            Split::Test => &self.test,
        }
    }
}

impl Dataset for VecDataset {
    fn len(&self, split: Split) -> usize {
        self.split(split).len()
    }

    fn get(&self, split: Split, index: usize) -> Result<Sample> {
        let samples = self.split(split);
        samples.get(index).cloned().ok_or_else(|| Error::Sample {
            index,
            reason: format!("{split} split has {} samples", samples.len()),
        })
    }

    fn name(&self) -> &str {
        "vec"
    }
}

/// Stripe of a dataset for one data-parallel rank.
///
/// Rank `r` of `world_size` sees indices `r, r + world_size, r + 2 * world_size, …`
/// of every split. Every shard has `ceil(len / world_size)` samples: short
/// stripes wrap around to the start of the split, so all ranks run the same
/// number of synchronized steps and a few samples are seen twice per epoch.
pub struct Shard {
    inner: Arc<dyn Dataset>,
    rank: usize,
    world_size: usize,
}

impl Shard {
    pub fn new(inner: Arc<dyn Dataset>, rank: usize, world_size: usize) -> Result<Self> {
        if world_size == 0 || rank >= world_size {
            return Err(Error::InvalidParameter(format!(
                "rank {rank} is outside a world of size {world_size}"
            )));
        }
        Ok(Self {
            inner,
            rank,
            world_size,
        })
    }
}

impl Dataset for Shard {
    fn len(&self, split: Split) -> usize {
        self.inner.len(split).div_ceil(self.world_size)
    }

    fn get(&self, split: Split, index: usize) -> Result<Sample> {
        if index >= self.len(split) {
            return Err(Error::Sample {
                index,
                reason: format!("shard {} has {} samples", self.rank, self.len(split)),
            });
        }
        let n = self.inner.len(split);
        self.inner.get(split, (self.rank + index * self.world_size) % n)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(n: i64) -> Vec<Sample> {
        (0..n).map(Sample::Int).collect()
    }

    #[test]
    fn test_vec_dataset_splits() {
        let ds = VecDataset::new(ints(5)).with_test(ints(2));
        assert_eq!(ds.len(Split::Train), 5);
        assert!(ds.is_empty(Split::Valid));
        assert_eq!(ds.get(Split::Test, 1).unwrap(), Sample::Int(1));
    }

    #[test]
    fn test_vec_dataset_out_of_range() {
        let ds = VecDataset::new(ints(2));
        let err = ds.get(Split::Train, 7).unwrap_err();
        assert!(matches!(err, Error::Sample { index: 7, .. }));
    }

    fn shard_values(ds: &Arc<dyn Dataset>, rank: usize, world_size: usize) -> Vec<i64> {
        let shard = Shard::new(ds.clone(), rank, world_size).unwrap();
        (0..shard.len(Split::Train))
            .map(|i| match shard.get(Split::Train, i).unwrap() {
                Sample::Int(v) => v,
                other => panic!("unexpected {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_shards_partition_evenly_divisible_dataset() {
        let ds: Arc<dyn Dataset> = Arc::new(VecDataset::new(ints(9)));
        let mut seen: Vec<i64> = (0..3).flat_map(|rank| shard_values(&ds, rank, 3)).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..9).collect::<Vec<_>>());
    }

    #[test]
    fn test_uneven_shards_wrap_to_equal_length() {
        let ds: Arc<dyn Dataset> = Arc::new(VecDataset::new(ints(10)));
        assert_eq!(shard_values(&ds, 0, 3), vec![0, 3, 6, 9]);
        assert_eq!(shard_values(&ds, 1, 3), vec![1, 4, 7, 0]);
        assert_eq!(shard_values(&ds, 2, 3), vec![2, 5, 8, 1]);

        let empty: Arc<dyn Dataset> = Arc::new(VecDataset::new(vec![]));
        assert_eq!(Shard::new(empty, 1, 2).unwrap().len(Split::Train), 0);
    }

    #[test]
    fn test_shard_rejects_bad_rank() {
        let ds: Arc<dyn Dataset> = Arc::new(VecDataset::new(ints(1)));
        assert!(Shard::new(ds, 2, 2).is_err());
    }

    #[test]
    fn test_split_display() {
        assert_eq!(Split::Valid.to_string(), "valid");
    }
}
