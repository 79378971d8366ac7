//! Trainer bookkeeping visible to callbacks

use crate::data::Split;
use std::collections::BTreeMap;
use std::fmt;

/// Where the trainer is in its epoch loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Training,
    Validating,
    Testing,
    Checkpointing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Training => "training",
            Phase::Validating => "validating",
            Phase::Testing => "testing",
            Phase::Checkpointing => "checkpointing",
        };
        f.write_str(s)
    }
}

/// Mutable training state shared with callbacks.
///
/// Callbacks may annotate this (metric maps, the stop flag) but the trainer
/// alone advances the counters.
#[derive(Debug, Clone, Default)]
pub struct TrainerState {
    /// Completed training epochs
    pub epoch: usize,
    /// Epoch count requested by the current `train` call
    pub max_epochs: usize,
    /// Optimizer steps taken over the whole run
    pub global_step: usize,
    pub split: Split,
    pub phase: Phase,
    /// Position of the current batch within its epoch
    pub batch_index: usize,
    /// Batches the current epoch will run
    pub num_batches: usize,
    /// Loss of the most recent batch
    pub loss: Option<f32>,
    /// Sample-weighted mean loss of the last epoch of each split
    pub epoch_loss: BTreeMap<Split, f32>,
    /// Metrics of the most recent validation epoch
    pub val_metrics: BTreeMap<String, f32>,
    /// Metrics of the most recent epoch of each split
    pub metrics: BTreeMap<Split, BTreeMap<String, f32>>,
    /// Set when a callback asked to stop; honoured after the in-flight batch
    pub stop_requested: bool,
    pub seed: u64,
    pub silent: bool,
}

impl TrainerState {
    /// Most recent epoch loss of `split`
    pub fn epoch_loss(&self, split: Split) -> Option<f32> {
        self.epoch_loss.get(&split).copied()
    }

    /// Most recent value of metric `name` on `split`
    pub fn metric(&self, split: Split, name: &str) -> Option<f32> {
        self.metrics.get(&split).and_then(|m| m.get(name)).copied()
    }
}
