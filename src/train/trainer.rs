//! Trainer state machine
//!
//! The trainer owns the model, criterion, optimizer bindings, callbacks,
//! device and gradient sync handle, and drives them through epochs:
//!
//! ```text
//! Idle ─train()─▶ Training ─▶ Validating ─▶ Testing ─▶ Checkpointing ─┐
//!                    ▲                                                    │
//!                    └──────────────────── next epoch ◀──────────────────┘
//! Idle ─test()──▶ Testing ─▶ Idle
//! ```
//!
//! Within a training batch the order is fixed: `on_batch_begin`, device
//! placement, zero grads, forward, `on_batch_forward`, criterion, backward,
//! `on_batch_backward`, gradient sync, optimizer steps, loss bookkeeping,
//! `on_batch_end`.

use super::callback::{BatchView, CallbackAction, CallbackContext, CallbackManager, TrainerCallback};
use super::metrics::AverageMeter;
use super::{LossFn, Phase, TrainConfig, TrainerState};
use crate::autograd::{backward, no_grad};
use crate::checkpoint::{checkpoint_path, Checkpoint};
use crate::data::{Batch, BatchLoader, DataSetWrapper, Dataset, LoaderConfig, Split};
use crate::device::{CpuDevice, Device};
use crate::distributed::{GradientSync, LocalSync};
use crate::nn::Model;
use crate::optim::OptimizerBinding;
use crate::{random, Error, Result};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// The pieces a trainer is built from
pub struct TrainerParts {
    pub model: Box<dyn Model>,
    pub criterion: Box<dyn LossFn>,
    pub optimizers: Vec<OptimizerBinding>,
}

/// Result of a training run
#[derive(Debug, Clone)]
pub struct TrainResult {
    /// Completed epochs, including any restored from a checkpoint
    pub final_epoch: usize,
    /// Training loss of the last epoch
    pub final_loss: Option<f32>,
    /// Lowest training epoch loss seen in this run
    pub best_loss: Option<f32>,
    /// Whether a callback stopped training early
    pub stopped_early: bool,
    /// Total training time in seconds
    pub elapsed_secs: f64,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Event {
    Init,
    TrainBegin,
    TrainEnd,
    EpochBegin,
    EpochEnd,
    BatchBegin,
    BatchForward,
    BatchBackward,
    BatchEnd,
}

/// Builds a [`Trainer`], wiring optional collaborators before `on_init`
pub struct TrainerBuilder {
    parts: TrainerParts,
    config: TrainConfig,
    callbacks: CallbackManager,
    device: Option<Box<dyn Device>>,
    sync: Box<dyn GradientSync>,
}

impl TrainerBuilder {
    pub fn callback<C: TrainerCallback + 'static>(mut self, callback: C) -> Self {
        self.callbacks.add(callback);
        self
    }

    pub fn callbacks(mut self, callbacks: CallbackManager) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn device(mut self, device: Box<dyn Device>) -> Self {
        self.device = Some(device);
        self
    }

    pub fn sync(mut self, sync: Box<dyn GradientSync>) -> Self {
        self.sync = sync;
        self
    }

    /// Seed the process-wide RNG and fire `on_init`
    pub fn build(self) -> Result<Trainer> {
        if self.config.batch_size == 0 {
            return Err(Error::InvalidParameter("batch_size must be positive".into()));
        }
        random::set_global_seed(self.config.seed);

        let device: Box<dyn Device> = match self.device {
            Some(device) => device,
            None => Box::new(CpuDevice::new().with_deterministic(self.config.deterministic)),
        };
        let state = TrainerState {
            max_epochs: self.config.epochs,
            seed: self.config.seed,
            silent: self.config.silent,
            ..TrainerState::default()
        };

        let mut trainer = Trainer {
            model: self.parts.model,
            criterion: self.parts.criterion,
            optimizers: self.parts.optimizers,
            callbacks: self.callbacks,
            device,
            sync: self.sync,
            config: self.config,
            state,
        };
        tracing::debug!(
            model = trainer.model.name(),
            parameters = trainer.model.num_parameters(),
            callbacks = ?trainer.callbacks.names(),
            rank = trainer.sync.rank(),
            "trainer initialized"
        );
        trainer.fire(Event::Init, None)?;
        Ok(trainer)
    }
}

/// High-level trainer that orchestrates the training loop
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use scorch::data::{Dataset, VecDataset};
/// use scorch::nn::Linear;
/// use scorch::optim::{Adam, OptimizerBinding};
/// use scorch::train::{EarlyStopping, MSELoss, TrainConfig, Trainer, TrainerParts};
///
/// let parts = TrainerParts {
///     model: Box::new(Linear::new(3, 1)),
///     criterion: Box::new(MSELoss),
///     optimizers: vec![OptimizerBinding::all(Box::new(Adam::default_params(0.01)))],
/// };
/// let mut trainer = Trainer::builder(parts, TrainConfig::new().with_epochs(5))
///     .callback(EarlyStopping::new(2, 1e-4))
///     .build()?;
///
/// let dataset: Arc<dyn Dataset> = Arc::new(VecDataset::new(vec![]));
/// let result = trainer.train(&dataset)?;
/// println!("trained {} epochs", result.final_epoch);
/// # Ok::<(), scorch::Error>(())
/// ```
pub struct Trainer {
    model: Box<dyn Model>,
    criterion: Box<dyn LossFn>,
    optimizers: Vec<OptimizerBinding>,
    callbacks: CallbackManager,
    device: Box<dyn Device>,
    sync: Box<dyn GradientSync>,
    config: TrainConfig,
    state: TrainerState,
}

impl Trainer {
    pub fn builder(parts: TrainerParts, config: TrainConfig) -> TrainerBuilder {
        TrainerBuilder {
            parts,
            config,
            callbacks: CallbackManager::new(),
            device: None,
            sync: Box::new(LocalSync),
        }
    }

    /// Single-process trainer on the CPU without callbacks
    pub fn new(parts: TrainerParts, config: TrainConfig) -> Result<Self> {
        Self::builder(parts, config).build()
    }

    /// Add a callback after construction (it will not see `on_init`)
    pub fn add_callback<C: TrainerCallback + 'static>(&mut self, callback: C) {
        self.callbacks.add(callback);
    }

    pub fn callbacks(&self) -> &CallbackManager {
        &self.callbacks
    }

    pub fn callbacks_mut(&mut self) -> &mut CallbackManager {
        &mut self.callbacks
    }

    pub fn model(&self) -> &dyn Model {
        self.model.as_ref()
    }

    pub fn model_mut(&mut self) -> &mut dyn Model {
        self.model.as_mut()
    }

    pub fn optimizers(&self) -> &[OptimizerBinding] {
        &self.optimizers
    }

    pub fn optimizers_mut(&mut self) -> &mut [OptimizerBinding] {
        &mut self.optimizers
    }

    pub fn state(&self) -> &TrainerState {
        &self.state
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn is_primary(&self) -> bool {
        self.sync.is_primary()
    }

    /// Dispatch one event. A `Stop` from any callback latches
    /// `state.stop_requested`.
    fn fire(&mut self, event: Event, batch: Option<BatchView<'_>>) -> Result<CallbackAction> {
        let mut ctx = CallbackContext {
            state: &mut self.state,
            model: self.model.as_ref(),
            optimizers: &self.optimizers,
            batch,
            is_primary: self.sync.is_primary(),
        };
        let callbacks = &mut self.callbacks;
        let action = match event {
            Event::Init => callbacks.on_init(&mut ctx),
            Event::TrainBegin => callbacks.on_train_begin(&mut ctx),
            Event::TrainEnd => callbacks.on_train_end(&mut ctx),
            Event::EpochBegin => callbacks.on_epoch_begin(&mut ctx),
            Event::EpochEnd => callbacks.on_epoch_end(&mut ctx),
            Event::BatchBegin => callbacks.on_batch_begin(&mut ctx),
            Event::BatchForward => callbacks.on_batch_forward(&mut ctx),
            Event::BatchBackward => callbacks.on_batch_backward(&mut ctx),
            Event::BatchEnd => callbacks.on_batch_end(&mut ctx),
        }?;
        if action == CallbackAction::Stop && !self.state.stop_requested {
            tracing::info!(epoch = self.state.epoch, "callback requested stop");
            self.state.stop_requested = true;
        }
        Ok(action)
    }

    /// Train until `config.epochs` epochs are complete or a callback stops.
    ///
    /// Epochs restored from a checkpoint count toward the total. After each
    /// training epoch the training split is re-evaluated when
    /// `validate_on_train` is set, the valid and test splits are evaluated
    /// when they are non-empty, and every `dump_period` epochs the primary
    /// rank writes
    /// `{prefix}_{epoch}.json` and `{prefix}_latest.json`.
    pub fn train(&mut self, dataset: &Arc<dyn Dataset>) -> Result<TrainResult> {
        let start = Instant::now();
        let outcome = self.run_training(dataset);
        self.state.phase = Phase::Idle;
        match outcome {
            Ok(best_loss) => {
                let result = TrainResult {
                    final_epoch: self.state.epoch,
                    final_loss: self.state.epoch_loss(Split::Train),
                    best_loss,
                    stopped_early: self.state.stop_requested,
                    elapsed_secs: start.elapsed().as_secs_f64(),
                };
                tracing::info!(
                    epochs = result.final_epoch,
                    loss = ?result.final_loss,
                    stopped_early = result.stopped_early,
                    "training finished"
                );
                Ok(result)
            }
            Err(e) => {
                self.sync.abort(&e.to_string());
                Err(e)
            }
        }
    }

    fn run_training(&mut self, dataset: &Arc<dyn Dataset>) -> Result<Option<f32>> {
        self.state.max_epochs = self.config.epochs;
        self.state.stop_requested = false;
        let mut best_loss: Option<f32> = None;

        self.fire(Event::TrainBegin, None)?;
        while self.state.epoch < self.config.epochs && !self.state.stop_requested {
            if let Some(loss) = self.train_one_epoch(dataset)? {
                best_loss = Some(best_loss.map_or(loss, |b| b.min(loss)));
            }
            if self.state.stop_requested {
                break;
            }
            if self.config.validate_on_train {
                self.validate_one_epoch(dataset, Split::Train)?;
            }
            if !dataset.is_empty(Split::Valid) {
                self.validate_one_epoch(dataset, Split::Valid)?;
            }
            if !dataset.is_empty(Split::Test) {
                self.test_one_epoch(dataset)?;
            }

            let epoch = self.state.epoch;
            let period = self.config.dump_period;
            if period > 0 && epoch % period == 0 && self.sync.is_primary() {
                self.state.phase = Phase::Checkpointing;
                self.save_checkpoint(epoch)?;
                self.save_checkpoint("latest")?;
            }
        }
        self.sync.agree("final epoch", self.state.epoch as u64)?;
        self.fire(Event::TrainEnd, None)?;
        Ok(best_loss)
    }

    /// One pass over the training split with a freshly seeded shuffle.
    ///
    /// Returns the sample-weighted mean batch loss, `None` if no batch ran.
    pub fn train_one_epoch(&mut self, dataset: &Arc<dyn Dataset>) -> Result<Option<f32>> {
        self.state.phase = Phase::Training;
        let mut wrapper = DataSetWrapper::new(dataset.clone(), Split::Train);
        wrapper.reseed(random::epoch_seed(self.state.seed, self.state.epoch, Split::Train));
        wrapper.shuffle();
        let cap = self.config.max_train_iterations;
        self.run_epoch(&wrapper, self.config.batch_size, cap, true)
    }

    /// Evaluate `split` without gradients, in dataset order.
    ///
    /// `Split::Train` here is the `validate_on_train` pass and fires its
    /// events with `state.split == Split::Train` and phase `Validating`.
    pub fn validate_one_epoch(
        &mut self,
        dataset: &Arc<dyn Dataset>,
        split: Split,
    ) -> Result<Option<f32>> {
        self.state.phase = Phase::Validating;
        let wrapper = DataSetWrapper::new(dataset.clone(), split);
        let cap = self.config.max_valid_iterations;
        self.run_epoch(&wrapper, self.config.batch_size, cap, false)
    }

    /// Evaluate the test split without gradients.
    ///
    /// In solo-test mode only the primary rank runs, one sample per batch;
    /// other ranks return `Ok(None)`.
    pub fn test_one_epoch(&mut self, dataset: &Arc<dyn Dataset>) -> Result<Option<f32>> {
        if self.config.solo_test && !self.sync.is_primary() {
            return Ok(None);
        }
        self.state.phase = Phase::Testing;
        let batch_size = if self.config.solo_test {
            1
        } else {
            self.config.batch_size
        };
        let wrapper = DataSetWrapper::new(dataset.clone(), Split::Test);
        let cap = self.config.max_test_iterations;
        self.run_epoch(&wrapper, batch_size, cap, false)
    }

    /// Run the test epoch and return to `Idle`
    pub fn test(&mut self, dataset: &Arc<dyn Dataset>) -> Result<Option<f32>> {
        let outcome = self.test_one_epoch(dataset);
        self.state.phase = Phase::Idle;
        if let Err(e) = &outcome {
            self.sync.abort(&e.to_string());
        }
        outcome
    }

    fn run_epoch(
        &mut self,
        wrapper: &DataSetWrapper,
        batch_size: usize,
        cap: Option<usize>,
        training: bool,
    ) -> Result<Option<f32>> {
        let split = wrapper.split();
        let loader = BatchLoader::new(
            LoaderConfig::default()
                .batch_size(batch_size)
                .num_workers(self.config.num_workers)
                .deterministic(self.config.deterministic || self.device.deterministic())
                .max_batches(cap),
        )?;

        self.state.split = split;
        self.state.batch_index = 0;
        self.state.num_batches = loader.num_batches(wrapper.len());
        self.state.loss = None;

        let _guard = (!training).then(no_grad);
        let mut meter = AverageMeter::new();

        let mut batches = 0u64;
        let begin = self.fire(Event::EpochBegin, None)?;
        if begin == CallbackAction::Continue {
            for item in loader.iter(wrapper) {
                let (index, batch) = item?;
                self.state.batch_index = index;
                let action = self.run_batch(batch, training, &mut meter)?;
                batches += 1;
                if action != CallbackAction::Continue || self.state.stop_requested {
                    break;
                }
            }
        }
        if training {
            self.sync.agree("training batches", batches)?;
        }

        let epoch_loss = (meter.count() > 0.0).then(|| meter.avg() as f32);
        match epoch_loss {
            Some(loss) => {
                self.state.epoch_loss.insert(split, loss);
            }
            None => {
                self.state.epoch_loss.remove(&split);
            }
        }
        if training {
            self.state.epoch += 1;
        }
        self.fire(Event::EpochEnd, None)?;
        tracing::debug!(%split, epoch = self.state.epoch, loss = ?epoch_loss, "epoch complete");
        Ok(epoch_loss)
    }

    fn run_batch(
        &mut self,
        batch: Batch,
        training: bool,
        meter: &mut AverageMeter,
    ) -> Result<CallbackAction> {
        let mut action = {
            let (inputs, targets) = batch.split_io()?;
            let view = BatchView {
                inputs,
                targets,
                predictions: None,
            };
            self.fire(Event::BatchBegin, Some(view))?
        };

        let batch = self.device.place(batch)?;
        let (inputs, targets) = batch.split_io()?;
        let rows = targets.len();

        if training {
            self.model.zero_grad();
        }
        let predictions = self.model.forward(inputs)?;
        let view = BatchView {
            inputs,
            targets,
            predictions: Some(predictions.as_slice()),
        };
        action = action.max(self.fire(Event::BatchForward, Some(view))?);

        let loss = self.criterion.forward(&predictions, targets)?;
        let loss_value = loss.item();

        if training {
            backward(&loss, None);
            action = action.max(self.fire(Event::BatchBackward, Some(view))?);

            self.sync.synchronize(self.model.as_mut())?;
            for binding in self.optimizers.iter_mut().filter(|b| b.is_active()) {
                binding.step(self.model.named_parameters_mut());
            }
            self.state.global_step += 1;
        }

        self.state.loss = Some(loss_value);
        meter.update(f64::from(loss_value), rows as f64);
        action = action.max(self.fire(Event::BatchEnd, Some(view))?);
        Ok(action)
    }

    /// Write a checkpoint named `{prefix}_{suffix}.json`
    pub fn save_checkpoint(&self, suffix: impl Display) -> Result<PathBuf> {
        let path = checkpoint_path(&self.config.checkpoint_prefix, suffix);
        Checkpoint::capture(&self.state, self.model.as_ref(), &self.optimizers).save(&path)?;
        tracing::info!(path = %path.display(), epoch = self.state.epoch, "checkpoint written");
        Ok(path)
    }

    /// Resume from a checkpoint file.
    ///
    /// Restores model parameters, counters, seed and validation metrics.
    /// Optimizer states are restored too unless `new_optimizer` is set, in
    /// which case the bindings keep their fresh state. Every check runs
    /// before anything is modified; failures are [`Error::CheckpointLoad`].
    pub fn load_checkpoint(&mut self, path: impl AsRef<Path>, new_optimizer: bool) -> Result<()> {
        let path = path.as_ref();
        let checkpoint = Checkpoint::load(path)?;

        if !new_optimizer {
            if checkpoint.optimizers.len() != self.optimizers.len() {
                return Err(Error::checkpoint(
                    path,
                    format!(
                        "checkpoint has {} optimizer states, trainer has {} bindings",
                        checkpoint.optimizers.len(),
                        self.optimizers.len()
                    ),
                ));
            }
            for (binding, state) in self.optimizers.iter().zip(&checkpoint.optimizers) {
                state
                    .expect_kind(binding.optimizer().name())
                    .map_err(|e| Error::checkpoint(path, e.to_string()))?;
            }
        }

        checkpoint
            .restore_model(self.model.as_mut())
            .map_err(|e| Error::checkpoint(path, e.to_string()))?;
        if !new_optimizer {
            for (binding, state) in self.optimizers.iter_mut().zip(checkpoint.optimizers) {
                binding
                    .load_state(state)
                    .map_err(|e| Error::checkpoint(path, e.to_string()))?;
            }
        }

        self.state.epoch = checkpoint.epoch;
        self.state.global_step = checkpoint.global_step;
        self.state.seed = checkpoint.seed;
        self.state.val_metrics = checkpoint.val_metrics;
        random::set_global_seed(checkpoint.seed);

        tracing::info!(
            path = %path.display(),
            epoch = self.state.epoch,
            new_optimizer,
            "checkpoint loaded"
        );
        Ok(())
    }
}
