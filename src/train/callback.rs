//! Callback system for training events
//!
//! Callbacks observe the trainer at fixed lifecycle points. Within one epoch
//! the order is:
//!
//! `on_epoch_begin → (on_batch_begin → on_batch_forward → on_batch_backward →
//! on_batch_end)* → on_epoch_end`
//!
//! with `on_init` once at construction and `on_train_begin`/`on_train_end`
//! bracketing a multi-epoch run. Validation and test epochs fire the same
//! sequence without `on_batch_backward`; `ctx.state.split` tells them apart.
//!
//! # Example
//!
//! ```rust
//! use scorch::train::{CallbackAction, CallbackContext, TrainerCallback};
//!
//! struct PrintCallback;
//!
//! impl TrainerCallback for PrintCallback {
//!     fn on_epoch_end(&mut self, ctx: &mut CallbackContext<'_>) -> scorch::Result<CallbackAction> {
//!         println!("{} epoch {} done", ctx.state.split, ctx.state.epoch);
//!         Ok(CallbackAction::Continue)
//!     }
//! }
//! ```

use super::{Phase, TrainerState};
use crate::data::{Batch, Split};
use crate::nn::Model;
use crate::optim::OptimizerBinding;
use crate::{Result, Tensor};

/// The batch currently flowing through the trainer
#[derive(Clone, Copy)]
pub struct BatchView<'a> {
    pub inputs: &'a Batch,
    pub targets: &'a Batch,
    /// Model outputs, once the forward pass ran
    pub predictions: Option<&'a [Tensor]>,
}

/// Context passed to callbacks.
///
/// The state is mutable so callbacks can record metrics or request a stop;
/// the model and optimizer bindings are read-only.
pub struct CallbackContext<'a> {
    pub state: &'a mut TrainerState,
    pub model: &'a dyn Model,
    pub optimizers: &'a [OptimizerBinding],
    pub batch: Option<BatchView<'a>>,
    /// Whether this process is the designated writer in distributed runs
    pub is_primary: bool,
}

impl CallbackContext<'_> {
    pub fn split(&self) -> Split {
        self.state.split
    }

    /// Learning rate of the first active optimizer binding
    pub fn lr(&self) -> Option<f32> {
        self.optimizers
            .iter()
            .find(|b| b.is_active())
            .map(|b| b.optimizer().lr())
    }
}

/// Action to take after a callback
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CallbackAction {
    /// Continue training normally
    Continue,
    /// Skip rest of current epoch
    SkipEpoch,
    /// Stop training once the in-flight batch completes
    Stop,
}

/// Trait for training callbacks
///
/// All methods have default no-op implementations, so a callback only
/// implements the events it cares about. Returning an error aborts the
/// current epoch.
pub trait TrainerCallback: Send {
    /// Called once when the trainer is constructed
    fn on_init(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        Ok(CallbackAction::Continue)
    }

    /// Called before a multi-epoch run
    fn on_train_begin(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        Ok(CallbackAction::Continue)
    }

    /// Called after a multi-epoch run
    fn on_train_end(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        Ok(CallbackAction::Continue)
    }

    fn on_epoch_begin(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        Ok(CallbackAction::Continue)
    }

    fn on_epoch_end(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        Ok(CallbackAction::Continue)
    }

    fn on_batch_begin(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        Ok(CallbackAction::Continue)
    }

    /// Called after the forward pass; predictions are in `ctx.batch`
    fn on_batch_forward(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        Ok(CallbackAction::Continue)
    }

    /// Called after the backward pass, before gradient sync and the step
    fn on_batch_backward(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        Ok(CallbackAction::Continue)
    }

    fn on_batch_end(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        Ok(CallbackAction::Continue)
    }

    /// Get callback name for logging
    fn name(&self) -> &str {
        "TrainerCallback"
    }
}

// =============================================================================
// Early Stopping Callback
// =============================================================================

/// Early stopping callback to halt training when loss plateaus
///
/// Monitors the training epoch loss, or the validation epoch loss after
/// [`EarlyStopping::monitor_validation`], and stops training if no
/// improvement is seen for `patience` epochs.
#[derive(Clone, Debug)]
pub struct EarlyStopping {
    /// Number of epochs to wait for improvement
    patience: usize,
    /// Minimum improvement to reset patience
    min_delta: f32,
    best_loss: f32,
    epochs_without_improvement: usize,
    monitor_val: bool,
}

impl EarlyStopping {
    /// Create new early stopping callback
    pub fn new(patience: usize, min_delta: f32) -> Self {
        Self {
            patience,
            min_delta,
            best_loss: f32::INFINITY,
            epochs_without_improvement: 0,
            monitor_val: false,
        }
    }

    /// Monitor the validation split's loss (requires validation data)
    pub fn monitor_validation(mut self) -> Self {
        self.monitor_val = true;
        self
    }

    /// Reset internal state
    pub fn reset(&mut self) {
        self.best_loss = f32::INFINITY;
        self.epochs_without_improvement = 0;
    }

    pub fn best_loss(&self) -> f32 {
        self.best_loss
    }

    /// Check if loss improved
    fn check_improvement(&mut self, loss: f32) -> bool {
        if loss < self.best_loss - self.min_delta {
            self.best_loss = loss;
            self.epochs_without_improvement = 0;
            true
        } else {
            self.epochs_without_improvement += 1;
            false
        }
    }
}

impl TrainerCallback for EarlyStopping {
    fn on_epoch_end(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        let watched = if self.monitor_val {
            Split::Valid
        } else {
            Split::Train
        };
        // the validate-on-train pass also reports Split::Train
        if ctx.split() != watched || (watched == Split::Train && ctx.state.phase != Phase::Training) {
            return Ok(CallbackAction::Continue);
        }
        let Some(loss) = ctx.state.epoch_loss(watched) else {
            return Ok(CallbackAction::Continue);
        };
        self.check_improvement(loss);

        if self.epochs_without_improvement >= self.patience {
            tracing::info!(
                patience = self.patience,
                best_loss = self.best_loss,
                "early stopping: no improvement"
            );
            Ok(CallbackAction::Stop)
        } else {
            Ok(CallbackAction::Continue)
        }
    }

    fn name(&self) -> &str {
        "EarlyStopping"
    }
}

// =============================================================================
// Progress Callback
// =============================================================================

/// Logs training progress through `tracing`
#[derive(Clone, Debug)]
pub struct ProgressCallback {
    /// Log every N batches
    log_interval: usize,
}

impl ProgressCallback {
    /// Create progress callback
    pub fn new(log_interval: usize) -> Self {
        Self {
            log_interval: log_interval.max(1),
        }
    }
}

impl Default for ProgressCallback {
    fn default() -> Self {
        Self::new(10)
    }
}

impl TrainerCallback for ProgressCallback {
    fn on_epoch_begin(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        if ctx.split() == Split::Train {
            tracing::info!(
                epoch = ctx.state.epoch + 1,
                batches = ctx.state.num_batches,
                lr = ?ctx.lr(),
                "epoch starting"
            );
        }
        Ok(CallbackAction::Continue)
    }

    fn on_batch_end(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        let step = ctx.state.batch_index + 1;
        if step % self.log_interval == 0 {
            tracing::debug!(
                split = %ctx.split(),
                step,
                of = ctx.state.num_batches,
                loss = ?ctx.state.loss,
                "batch done"
            );
        }
        Ok(CallbackAction::Continue)
    }

    fn on_epoch_end(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        let split = ctx.split();
        let metrics = ctx
            .state
            .metrics
            .get(&split)
            .map(|m| {
                m.iter()
                    .map(|(k, v)| format!("{k}={v:.4}"))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();
        tracing::info!(
            split = %split,
            epoch = ctx.state.epoch,
            loss = ?ctx.state.epoch_loss(split),
            %metrics,
            "epoch finished"
        );
        Ok(CallbackAction::Continue)
    }

    fn name(&self) -> &str {
        "ProgressCallback"
    }
}

// =============================================================================
// Callback Manager
// =============================================================================

/// Manages multiple callbacks and dispatches events in registration order.
///
/// Every callback sees every event. The combined action is the strongest
/// one returned: `Stop` over `SkipEpoch` over `Continue`. An error stops the
/// dispatch and is returned.
#[derive(Default)]
pub struct CallbackManager {
    callbacks: Vec<Box<dyn TrainerCallback>>,
}

impl CallbackManager {
    /// Create new callback manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a callback
    pub fn add<C: TrainerCallback + 'static>(&mut self, callback: C) {
        self.callbacks.push(Box::new(callback));
    }

    pub fn push(&mut self, callback: Box<dyn TrainerCallback>) {
        self.callbacks.push(callback);
    }

    /// Check if no callbacks are registered
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Get number of callbacks
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.callbacks.iter().map(|cb| cb.name()).collect()
    }

    fn dispatch<F>(&mut self, ctx: &mut CallbackContext<'_>, mut hook: F) -> Result<CallbackAction>
    where
        F: FnMut(&mut dyn TrainerCallback, &mut CallbackContext<'_>) -> Result<CallbackAction>,
    {
        let mut action = CallbackAction::Continue;
        for cb in &mut self.callbacks {
            action = action.max(hook(cb.as_mut(), ctx)?);
        }
        Ok(action)
    }

    pub fn on_init(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        self.dispatch(ctx, |cb, ctx| cb.on_init(ctx))
    }

    pub fn on_train_begin(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        self.dispatch(ctx, |cb, ctx| cb.on_train_begin(ctx))
    }

    pub fn on_train_end(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        self.dispatch(ctx, |cb, ctx| cb.on_train_end(ctx))
    }

    pub fn on_epoch_begin(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        self.dispatch(ctx, |cb, ctx| cb.on_epoch_begin(ctx))
    }

    pub fn on_epoch_end(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        self.dispatch(ctx, |cb, ctx| cb.on_epoch_end(ctx))
    }

    pub fn on_batch_begin(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        self.dispatch(ctx, |cb, ctx| cb.on_batch_begin(ctx))
    }

    pub fn on_batch_forward(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        self.dispatch(ctx, |cb, ctx| cb.on_batch_forward(ctx))
    }

    pub fn on_batch_backward(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        self.dispatch(ctx, |cb, ctx| cb.on_batch_backward(ctx))
    }

    pub fn on_batch_end(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        self.dispatch(ctx, |cb, ctx| cb.on_batch_end(ctx))
    }
}
