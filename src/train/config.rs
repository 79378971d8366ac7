//! Training configuration

use crate::random::DEFAULT_SEED;
use std::path::PathBuf;

/// Training configuration
#[derive(Clone, Debug, PartialEq)]
pub struct TrainConfig {
    /// Samples per batch
    pub batch_size: usize,

    /// Epochs run by [`Trainer::train`](super::Trainer::train)
    pub epochs: usize,

    /// Prefetch worker threads (0 = load on the training thread)
    pub num_workers: usize,

    /// Dump `{prefix}_{epoch}` and `{prefix}_latest` every N epochs (0 = never)
    pub dump_period: usize,

    /// Path prefix of checkpoint files
    pub checkpoint_prefix: PathBuf,

    /// Also run a validation pass over the training split each epoch
    pub validate_on_train: bool,

    /// Batch caps per epoch (None = whole split)
    pub max_train_iterations: Option<usize>,
    pub max_valid_iterations: Option<usize>,
    pub max_test_iterations: Option<usize>,

    /// Process-wide seed applied when the trainer is built
    pub seed: u64,

    /// Keep batch order reproducible when prefetching
    pub deterministic: bool,

    /// Suppress progress output
    pub silent: bool,

    /// Run the test epoch on the primary rank only, one sample per batch
    pub solo_test: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            epochs: 10,
            num_workers: 0,
            dump_period: 1,
            checkpoint_prefix: PathBuf::from("checkpoint"),
            validate_on_train: false,
            max_train_iterations: None,
            max_valid_iterations: None,
            max_test_iterations: None,
            seed: DEFAULT_SEED,
            deterministic: false,
            silent: false,
            solo_test: false,
        }
    }
}

impl TrainConfig {
    /// Create a new training configuration
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Set checkpoint dumping
    pub fn with_checkpoints(mut self, dump_period: usize, prefix: impl Into<PathBuf>) -> Self {
        self.dump_period = dump_period;
        self.checkpoint_prefix = prefix.into();
        self
    }

    pub fn with_validate_on_train(mut self, enabled: bool) -> Self {
        self.validate_on_train = enabled;
        self
    }

    /// Cap the batches of train, valid and test epochs
    pub fn with_max_iterations(
        mut self,
        train: Option<usize>,
        valid: Option<usize>,
        test: Option<usize>,
    ) -> Self {
        self.max_train_iterations = train;
        self.max_valid_iterations = valid;
        self.max_test_iterations = test;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }

    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn with_solo_test(mut self, solo_test: bool) -> Self {
        self.solo_test = solo_test;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_chain() {
        let config = TrainConfig::new()
            .with_batch_size(4)
            .with_epochs(3)
            .with_workers(2)
            .with_checkpoints(5, "runs/exp")
            .with_max_iterations(Some(10), None, Some(1))
            .with_seed(42)
            .with_deterministic(true);

        assert_eq!(config.batch_size, 4);
        assert_eq!(config.epochs, 3);
        assert_eq!(config.num_workers, 2);
        assert_eq!(config.dump_period, 5);
        assert_eq!(config.checkpoint_prefix, PathBuf::from("runs/exp"));
        assert_eq!(config.max_train_iterations, Some(10));
        assert_eq!(config.max_valid_iterations, None);
        assert_eq!(config.max_test_iterations, Some(1));
        assert_eq!(config.seed, 42);
        assert!(config.deterministic);
        assert!(!config.silent);
    }
}
