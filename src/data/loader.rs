//! Batch loader with optional background prefetching
//!
//! With `num_workers == 0` batches are loaded and collated on the calling
//! thread. Otherwise worker threads read samples from an `Arc<dyn Dataset>`,
//! collate them and hand finished batches over rendezvous channels, so
//! loading overlaps the forward/backward pass. A worker holds at most the one
//! batch it is building or handing over, so no more than `num_workers + 1`
//! batches exist at once, counting the one the consumer is using.
//!
//! In deterministic mode batch `j` is always built by worker `j % W` and read
//! back from that worker's own channel, so batches arrive in order. Otherwise
//! workers pull from a shared queue and batches arrive as they complete.

use super::{collate, Batch, DataSetWrapper, Dataset, Split};
use crate::{Error, Result};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Configuration for the batch loader.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Number of samples per batch.
    pub batch_size: usize,
    /// Number of background workers; 0 loads on the calling thread.
    pub num_workers: usize,
    /// Deliver prefetched batches in order.
    pub deterministic: bool,
    /// Stop after this many batches.
    pub max_batches: Option<usize>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            num_workers: 0,
            deterministic: true,
            max_batches: None,
        }
    }
}

impl LoaderConfig {
    pub fn batch_size(mut self, bs: usize) -> Self {
        self.batch_size = bs;
        self
    }
    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }
    pub fn deterministic(mut self, d: bool) -> Self {
        self.deterministic = d;
        self
    }
    pub fn max_batches(mut self, cap: Option<usize>) -> Self {
        self.max_batches = cap;
        self
    }
}

/// Sample indices of one batch, tagged with the batch position
type Job = (usize, Vec<usize>);

/// Builds one epoch of batches from a wrapper's current order.
pub struct BatchLoader {
    config: LoaderConfig,
}

impl BatchLoader {
    pub fn new(config: LoaderConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(Error::InvalidParameter("batch_size must be positive".into()));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Number of batches one epoch over `len` samples yields
    pub fn num_batches(&self, len: usize) -> usize {
        let full = len.div_ceil(self.config.batch_size);
        self.config.max_batches.map_or(full, |cap| full.min(cap))
    }

    /// Iterate over the batches of one epoch.
    ///
    /// The order vector is snapshotted, so reshuffling the wrapper afterwards
    /// does not affect the returned iterator. Items are
    /// `(batch_index, batch)`; workers are joined when it is dropped.
    pub fn iter(&self, wrapper: &DataSetWrapper) -> Batches {
        let jobs: Vec<Job> = wrapper
            .order()
            .chunks(self.config.batch_size)
            .take(self.num_batches(wrapper.len()))
            .map(<[usize]>::to_vec)
            .enumerate()
            .collect();
        let remaining = jobs.len();
        let dataset = wrapper.dataset().clone();
        let split = wrapper.split();

        let workers = self.config.num_workers.min(jobs.len());
        let source = if workers == 0 {
            Source::Inline {
                dataset,
                split,
                jobs: jobs.into_iter(),
            }
        } else if self.config.deterministic {
            spawn_ordered(dataset, split, jobs, workers)
        } else {
            spawn_unordered(dataset, split, jobs, workers)
        };

        Batches {
            source,
            remaining,
            next: 0,
        }
    }
}

/// Load and collate the samples of one batch
fn load_batch(dataset: &dyn Dataset, split: Split, job: &Job) -> Result<Batch> {
    let (batch_idx, indices) = job;
    let samples = indices
        .iter()
        .map(|&i| dataset.get(split, i))
        .collect::<Result<Vec<_>>>()?;
    collate(samples).map_err(|e| Error::collate(*batch_idx, e))
}

fn log_failure(worker: usize, batch: usize, result: &Result<Batch>) {
    if let Err(e) = result {
        tracing::warn!(worker, batch, error = %e, "prefetch worker failed to load batch");
    }
}

fn spawn_ordered(dataset: Arc<dyn Dataset>, split: Split, jobs: Vec<Job>, workers: usize) -> Source {
    let mut receivers = Vec::with_capacity(workers);
    let mut handles = Vec::with_capacity(workers);

    for worker in 0..workers {
        let mine: Vec<Job> = jobs
            .iter()
            .filter(|(idx, _)| idx % workers == worker)
            .cloned()
            .collect();
        let (tx, rx) = mpsc::sync_channel::<Result<Batch>>(0);
        let ds = dataset.clone();

        handles.push(thread::spawn(move || {
            for job in &mine {
                let result = load_batch(&*ds, split, job);
                log_failure(worker, job.0, &result);
                // Receiver dropped: the epoch was abandoned
                if tx.send(result).is_err() {
                    tracing::debug!(worker, "batch receiver dropped, worker exiting");
                    break;
                }
            }
        }));
        receivers.push(rx);
    }

    Source::Ordered { receivers, handles }
}

fn spawn_unordered(dataset: Arc<dyn Dataset>, split: Split, jobs: Vec<Job>, workers: usize) -> Source {
    let (tx, rx) = mpsc::sync_channel::<(usize, Result<Batch>)>(0);
    let queue = Arc::new(Mutex::new(jobs.into_iter()));
    let mut handles = Vec::with_capacity(workers);

    for worker in 0..workers {
        let queue = queue.clone();
        let tx: SyncSender<(usize, Result<Batch>)> = tx.clone();
        let ds = dataset.clone();

        handles.push(thread::spawn(move || loop {
            let job = match queue.lock() {
                Ok(mut q) => q.next(),
                Err(_) => None,
            };
            let Some(job) = job else {
                break;
            };
            let result = load_batch(&*ds, split, &job);
            log_failure(worker, job.0, &result);
            if tx.send((job.0, result)).is_err() {
                tracing::debug!(worker, "batch receiver dropped, worker exiting");
                break;
            }
        }));
    }

    // channel closes once every worker has finished
    drop(tx);

    Source::Unordered { rx, handles }
}

enum Source {
    Inline {
        dataset: Arc<dyn Dataset>,
        split: Split,
        jobs: std::vec::IntoIter<Job>,
    },
    Ordered {
        receivers: Vec<Receiver<Result<Batch>>>,
        handles: Vec<JoinHandle<()>>,
    },
    Unordered {
        rx: Receiver<(usize, Result<Batch>)>,
        handles: Vec<JoinHandle<()>>,
    },
    Finished,
}

/// Iterator over one epoch of batches.
pub struct Batches {
    source: Source,
    remaining: usize,
    next: usize,
}

fn worker_gone() -> Error {
    Error::Io(std::io::Error::other("prefetch worker exited before finishing"))
}

impl Iterator for Batches {
    type Item = Result<(usize, Batch)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let item = match &mut self.source {
            Source::Inline {
                dataset,
                split,
                jobs,
            } => {
                let job = jobs.next()?;
                load_batch(&**dataset, *split, &job).map(|b| (job.0, b))
            }
            Source::Ordered { receivers, .. } => {
                let idx = self.next;
                let rx = &receivers[idx % receivers.len()];
                match rx.recv() {
                    Ok(result) => result.map(|b| (idx, b)),
                    Err(_) => Err(worker_gone()),
                }
            }
            Source::Unordered { rx, .. } => match rx.recv() {
                Ok((idx, result)) => result.map(|b| (idx, b)),
                Err(_) => Err(worker_gone()),
            },
            Source::Finished => return None,
        };

        self.next += 1;
        self.remaining -= 1;
        if item.is_err() {
            // nothing after a failed batch is delivered
            self.remaining = 0;
        }
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

impl Drop for Batches {
    fn drop(&mut self) {
        // Dropping the receivers unblocks workers waiting on a full channel
        let handles = match std::mem::replace(&mut self.source, Source::Finished) {
            Source::Ordered { receivers, handles } => {
                drop(receivers);
                handles
            }
            Source::Unordered { rx, handles } => {
                drop(rx);
                handles
            }
            Source::Inline { .. } | Source::Finished => Vec::new(),
        };
        for h in handles {
            let _ = h.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Sample, VecDataset};
    use crate::error::CollateError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dataset(n: usize) -> Arc<dyn Dataset> {
        let samples = (0..n)
            .map(|i| Sample::pair(vec![Sample::from_slice(&[i as f32])], vec![Sample::Int(i as i64)]))
            .collect();
        Arc::new(VecDataset::new(samples))
    }

    fn target_ids(batch: &Batch) -> Vec<i64> {
        let (_, targets) = batch.split_io().unwrap();
        targets.at(0).unwrap().as_int().unwrap().to_vec()
    }

    #[test]
    fn test_batch_sizes_for_ten_samples() {
        let w = DataSetWrapper::new(dataset(10), Split::Train);
        let loader = BatchLoader::new(LoaderConfig::default().batch_size(4)).unwrap();
        let sizes: Vec<usize> = loader.iter(&w).map(|b| b.unwrap().1.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn test_max_batches_truncates() {
        let w = DataSetWrapper::new(dataset(10), Split::Train);
        let loader =
            BatchLoader::new(LoaderConfig::default().batch_size(2).max_batches(Some(3))).unwrap();
        assert_eq!(loader.num_batches(w.len()), 3);
        assert_eq!(loader.iter(&w).count(), 3);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(BatchLoader::new(LoaderConfig::default().batch_size(0)).is_err());
    }

    #[test]
    fn test_prefetch_matches_inline_in_deterministic_mode() {
        let mut w = DataSetWrapper::new(dataset(23), Split::Train);
        w.reseed(5);
        w.shuffle();

        let inline = BatchLoader::new(LoaderConfig::default().batch_size(3)).unwrap();
        let prefetch = BatchLoader::new(
            LoaderConfig::default()
                .batch_size(3)
                .num_workers(4)
                .deterministic(true),
        )
        .unwrap();

        let a: Vec<(usize, Batch)> = inline.iter(&w).map(|b| b.unwrap()).collect();
        let b: Vec<(usize, Batch)> = prefetch.iter(&w).map(|b| b.unwrap()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unordered_mode_delivers_every_batch() {
        let w = DataSetWrapper::new(dataset(17), Split::Train);
        let loader = BatchLoader::new(
            LoaderConfig::default()
                .batch_size(4)
                .num_workers(3)
                .deterministic(false),
        )
        .unwrap();

        let mut ids: Vec<i64> = loader
            .iter(&w)
            .flat_map(|b| target_ids(&b.unwrap().1))
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..17).collect::<Vec<_>>());
    }

    #[test]
    fn test_dropping_early_joins_workers() {
        let w = DataSetWrapper::new(dataset(100), Split::Train);
        let loader = BatchLoader::new(LoaderConfig::default().batch_size(1).num_workers(2)).unwrap();
        let mut it = loader.iter(&w);
        assert!(it.next().is_some());
        drop(it);
    }

    /// Counts sample reads
    struct Counting {
        inner: Arc<dyn Dataset>,
        reads: AtomicUsize,
    }

    impl Dataset for Counting {
        fn len(&self, split: Split) -> usize {
            self.inner.len(split)
        }

        fn get(&self, split: Split, index: usize) -> Result<Sample> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get(split, index)
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[test]
    fn test_prefetch_holds_at_most_one_batch_per_worker() {
        let counting = Arc::new(Counting {
            inner: dataset(20),
            reads: AtomicUsize::new(0),
        });
        let ds: Arc<dyn Dataset> = counting.clone();
        let w = DataSetWrapper::new(ds, Split::Train);
        let loader = BatchLoader::new(LoaderConfig::default().batch_size(1).num_workers(2)).unwrap();

        let mut it = loader.iter(&w);
        let _held = it.next().unwrap().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(200));

        // the batch in hand plus one per blocked worker
        assert!(counting.reads.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn test_collate_failure_names_batch() {
        let samples = vec![Sample::Int(1), Sample::Int(2), Sample::None, Sample::None];
        let ds: Arc<dyn Dataset> = Arc::new(VecDataset::new(samples));
        let w = DataSetWrapper::new(ds, Split::Train);
        let loader = BatchLoader::new(LoaderConfig::default().batch_size(2).num_workers(1)).unwrap();

        let results: Vec<_> = loader.iter(&w).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        match &results[1] {
            Err(Error::Collate { batch, source }) => {
                assert_eq!(*batch, 1);
                assert_eq!(*source, CollateError::EmptyBatch);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
