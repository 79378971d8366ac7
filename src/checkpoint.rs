//! Checkpoint serialization
//!
//! A checkpoint captures everything needed to resume a run: model
//! parameters, optimizer states, counters, the seed and the last validation
//! metrics. Files are JSON and named `{prefix}_{suffix}.json`, where the
//! suffix is an epoch number, `latest` or `best`.
//!
//! Writes go to a temporary sibling first and are renamed into place, so a
//! crash mid-write never leaves a truncated checkpoint behind. Loading is
//! fail-fast: any problem surfaces as [`Error::CheckpointLoad`] naming the
//! file.

use crate::data::Split;
use crate::nn::Model;
use crate::optim::{OptimizerBinding, OptimizerState};
use crate::train::{CallbackAction, CallbackContext, TrainerCallback, TrainerState};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};

/// Version written into new checkpoints; loading rejects any other
pub const FORMAT_VERSION: u32 = 1;

/// Path of a checkpoint file: `{prefix}_{suffix}.json`
pub fn checkpoint_path(prefix: impl AsRef<Path>, suffix: impl Display) -> PathBuf {
    let prefix = prefix.as_ref();
    let file = format!(
        "{}_{suffix}.json",
        prefix
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    );
    prefix.with_file_name(file)
}

/// One named parameter, flattened in row-major order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamRecord {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Serializable snapshot of a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub format_version: u32,
    /// Completed training epochs
    pub epoch: usize,
    pub global_step: usize,
    pub seed: u64,
    pub model: Vec<ParamRecord>,
    /// One state per optimizer binding, in binding order
    pub optimizers: Vec<OptimizerState>,
    pub val_metrics: BTreeMap<String, f32>,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Snapshot the trainer's current state
    pub fn capture(
        state: &TrainerState,
        model: &dyn Model,
        optimizers: &[OptimizerBinding],
    ) -> Self {
        let params = model
            .named_parameters()
            .into_iter()
            .map(|(name, p)| ParamRecord {
                name,
                shape: p.shape().to_vec(),
                data: p.data().iter().copied().collect(),
            })
            .collect();

        Self {
            format_version: FORMAT_VERSION,
            epoch: state.epoch,
            global_step: state.global_step,
            seed: state.seed,
            model: params,
            optimizers: optimizers.iter().map(OptimizerBinding::state).collect(),
            val_metrics: state.val_metrics.clone(),
            created_at: Utc::now(),
        }
    }

    /// Copy the stored parameters into `model`.
    ///
    /// Parameter names and shapes must match exactly, in enumeration order.
    /// Nothing is written unless every parameter checks out.
    pub fn restore_model(&self, model: &mut dyn Model) -> Result<()> {
        let mut params = model.named_parameters_mut();
        if params.len() != self.model.len() {
            return Err(Error::InvalidParameter(format!(
                "model has {} parameters, checkpoint has {}",
                params.len(),
                self.model.len()
            )));
        }

        let mut arrays = Vec::with_capacity(self.model.len());
        for ((name, param), record) in params.iter().zip(&self.model) {
            if *name != record.name {
                return Err(Error::InvalidParameter(format!(
                    "parameter '{name}' found where checkpoint has '{}'",
                    record.name
                )));
            }
            if param.shape() != record.shape.as_slice() {
                return Err(Error::ShapeMismatch {
                    expected: param.shape().to_vec(),
                    got: record.shape.clone(),
                });
            }
            let array = ArrayD::from_shape_vec(IxDyn(&record.shape), record.data.clone())
                .map_err(|e| Error::InvalidParameter(format!("parameter '{name}': {e}")))?;
            arrays.push(array);
        }

        for ((_, param), array) in params.iter_mut().zip(arrays) {
            *param.data_mut() = array;
        }
        Ok(())
    }

    /// Write atomically to `path` (temp file + rename)
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let content = serde_json::to_string(self)
            .map_err(|e| Error::Serialization(format!("JSON serialization failed: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Read a checkpoint, failing on a missing, corrupt or foreign file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| Error::checkpoint(path, e.to_string()))?;
        let checkpoint: Checkpoint = serde_json::from_str(&content)
            .map_err(|e| Error::checkpoint(path, format!("corrupt checkpoint: {e}")))?;
        if checkpoint.format_version != FORMAT_VERSION {
            return Err(Error::checkpoint(
                path,
                format!(
                    "format version {} is not supported (expected {FORMAT_VERSION})",
                    checkpoint.format_version
                ),
            ));
        }
        Ok(checkpoint)
    }
}

/// Writes `{prefix}_best.json` whenever a monitored validation metric
/// improves.
///
/// Reads `state.val_metrics`, so it must be registered after the callback
/// that fills them ([`ComputeMetrics`](crate::train::ComputeMetrics)). Only
/// the primary rank writes.
#[derive(Debug, Clone)]
pub struct MakeCheckpoints {
    prefix: PathBuf,
    monitor: String,
    higher_is_better: bool,
    best: Option<f32>,
}

impl MakeCheckpoints {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
            monitor: "main".to_string(),
            higher_is_better: true,
            best: None,
        }
    }

    /// Metric to watch and its direction
    pub fn monitor(mut self, metric: impl Into<String>, higher_is_better: bool) -> Self {
        self.monitor = metric.into();
        self.higher_is_better = higher_is_better;
        self
    }

    pub fn best(&self) -> Option<f32> {
        self.best
    }

    fn improves(&self, value: f32) -> bool {
        match self.best {
            None => true,
            Some(best) if self.higher_is_better => value > best,
            Some(best) => value < best,
        }
    }
}

impl TrainerCallback for MakeCheckpoints {
    /// A resumed run starts from the metrics restored with the checkpoint
    fn on_train_begin(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        if self.best.is_none() {
            self.best = ctx.state.val_metrics.get(&self.monitor).copied();
            if let Some(best) = self.best {
                tracing::debug!(metric = %self.monitor, best, "best value restored");
            }
        }
        Ok(CallbackAction::Continue)
    }

    fn on_epoch_end(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        if ctx.split() != Split::Valid {
            return Ok(CallbackAction::Continue);
        }
        let Some(&value) = ctx.state.val_metrics.get(&self.monitor) else {
            tracing::debug!(metric = %self.monitor, "monitored metric missing, no best checkpoint");
            return Ok(CallbackAction::Continue);
        };
        if !self.improves(value) {
            return Ok(CallbackAction::Continue);
        }
        self.best = Some(value);

        if ctx.is_primary {
            let path = checkpoint_path(&self.prefix, "best");
            Checkpoint::capture(ctx.state, ctx.model, ctx.optimizers).save(&path)?;
            tracing::info!(
                path = %path.display(),
                metric = %self.monitor,
                value,
                "new best checkpoint"
            );
        }
        Ok(CallbackAction::Continue)
    }

    fn name(&self) -> &str {
        "MakeCheckpoints"
    }
}
