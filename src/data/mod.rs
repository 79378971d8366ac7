//! Samples, datasets, collation and batch loading

mod collate;
mod dataset;
mod loader;
mod sample;
mod wrapper;

pub use collate::collate;
pub use dataset::{Dataset, Shard, Split, VecDataset};
pub use loader::{BatchLoader, Batches, LoaderConfig};
pub use sample::{Batch, Sample};
pub use wrapper::DataSetWrapper;
