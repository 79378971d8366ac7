//! Logical ordering over a dataset split

use super::{Dataset, Sample, Split};
use crate::random;
use crate::{Error, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;

/// Presents one split of a dataset through an owned order vector.
///
/// `get(i)` reads the underlying sample at `order[i]`. Shuffling replaces
/// the order with a fresh permutation of `0..len` and never touches the
/// dataset.
pub struct DataSetWrapper {
    dataset: Arc<dyn Dataset>,
    split: Split,
    order: Vec<usize>,
    rng: StdRng,
}

impl DataSetWrapper {
    /// Identity ordering, generator derived from the global seed
    pub fn new(dataset: Arc<dyn Dataset>, split: Split) -> Self {
        let order = (0..dataset.len(split)).collect();
        Self {
            dataset,
            split,
            order,
            rng: random::rng_for(split.stream_id()),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn split(&self) -> Split {
        self.split
    }

    pub fn dataset(&self) -> &Arc<dyn Dataset> {
        &self.dataset
    }

    /// Current order vector: position → dataset index
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn get(&self, index: usize) -> Result<Sample> {
        let real = self.order.get(index).copied().ok_or_else(|| Error::Sample {
            index,
            reason: format!("{} split has {} samples", self.split, self.order.len()),
        })?;
        self.dataset.get(self.split, real)
    }

    /// Replace the order with a fresh uniform permutation
    pub fn shuffle(&mut self) {
        // re-read the length in case the dataset grew
        self.order = (0..self.dataset.len(self.split)).collect();
        self.order.shuffle(&mut self.rng);
    }

    /// Restart the permutation generator from `seed`
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }
}
