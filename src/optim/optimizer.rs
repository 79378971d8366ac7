//! Optimizer trait and serializable optimizer state

use crate::{Error, Result, Tensor};
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-parameter buffers, indexed like the parameter slice passed to `step`
pub type Buffers = Vec<Option<ArrayD<f32>>>;

/// Snapshot of an optimizer's internal state, stored in checkpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    /// Optimizer name, e.g. `"adam"`
    pub kind: String,
    pub lr: f32,
    /// Number of steps taken
    pub step: u64,
    /// Named buffer sets (`"m"`, `"v"`, `"velocity"`)
    #[serde(default)]
    pub buffers: BTreeMap<String, Buffers>,
}

impl OptimizerState {
    pub fn new(kind: &str, lr: f32, step: u64) -> Self {
        Self {
            kind: kind.to_string(),
            lr,
            step,
            buffers: BTreeMap::new(),
        }
    }

    pub fn with_buffers(mut self, name: &str, buffers: Buffers) -> Self {
        self.buffers.insert(name.to_string(), buffers);
        self
    }

    /// Check the state was produced by an optimizer of kind `expected`
    pub fn expect_kind(&self, expected: &str) -> Result<()> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(Error::InvalidParameter(format!(
                "optimizer state is for '{}', not '{expected}'",
                self.kind
            )))
        }
    }

    /// Take a buffer set out of the state, empty when absent
    pub fn take_buffers(&mut self, name: &str) -> Buffers {
        self.buffers.remove(name).unwrap_or_default()
    }
}

/// Trait for optimization algorithms
pub trait Optimizer {
    /// Perform a single optimization step
    ///
    /// Parameters without a gradient are left untouched.
    fn step(&mut self, params: &mut [&mut Tensor]);

    /// Zero out all gradients
    fn zero_grad(&mut self, params: &mut [&mut Tensor]) {
        for param in params {
            param.zero_grad();
        }
    }

    /// Get learning rate
    fn lr(&self) -> f32;

    /// Set learning rate
    fn set_lr(&mut self, lr: f32);

    /// Short lowercase name, also the `kind` of its state
    fn name(&self) -> &'static str;

    /// Capture internal state for a checkpoint
    fn state(&self) -> OptimizerState;

    /// Restore internal state captured by [`Optimizer::state`]
    fn load_state(&mut self, state: OptimizerState) -> Result<()>;
}

/// Buffer `i`, grown on demand and restarted if its shape no longer matches
pub(crate) fn buffer_slot<'a>(
    buffers: &'a mut Buffers,
    i: usize,
    grad: &ArrayD<f32>,
) -> &'a mut Option<ArrayD<f32>> {
    if buffers.len() <= i {
        buffers.resize(i + 1, None);
    }
    let slot = &mut buffers[i];
    if slot.as_ref().is_some_and(|b| b.shape() != grad.shape()) {
        *slot = None;
    }
    slot
}
