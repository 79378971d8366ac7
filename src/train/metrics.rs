//! Evaluation metrics and running averages
//!
//! - [`AverageMeter`]: weighted running mean of a scalar
//! - [`Metric`]: per-batch metric over predictions and targets
//! - [`ComputeMetrics`]: callback averaging named metrics per epoch

use super::callback::{CallbackAction, CallbackContext, TrainerCallback};
use super::LossFn;
use crate::autograd::no_grad;
use crate::data::{Batch, Split};
use crate::{Error, Result, Tensor};
use ndarray::{Axis, Ix2};
use std::collections::BTreeMap;

/// Running weighted mean of a scalar.
///
/// Before the first update (and after [`reset`](AverageMeter::reset)) the
/// average is defined as `0.0`, never NaN. Not thread-safe; keep one meter
/// per metric per thread.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AverageMeter {
    val: f64,
    sum: f64,
    count: f64,
}

impl AverageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero all accumulators
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Add `value` with `weight` (usually the batch size)
    pub fn update(&mut self, value: f64, weight: f64) {
        self.val = value;
        self.sum += value * weight;
        self.count += weight;
    }

    /// Last value passed to `update`
    pub fn val(&self) -> f64 {
        self.val
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn count(&self) -> f64 {
        self.count
    }

    /// `sum / count`, or `0.0` while `count == 0`
    pub fn avg(&self) -> f64 {
        if self.count == 0.0 {
            0.0
        } else {
            self.sum / self.count
        }
    }
}

/// Trait for evaluation metrics
pub trait Metric: Send {
    /// Compute the metric for one batch
    fn compute(&self, predictions: &[Tensor], targets: &Batch) -> Result<f32>;

    /// Name of the metric
    fn name(&self) -> &str;

    /// Whether higher values are better (true) or lower (false)
    fn higher_is_better(&self) -> bool {
        true
    }
}

/// Classification accuracy against integer labels.
///
/// Multi-column predictions use the argmax of each row. Single-column
/// predictions are thresholded at `threshold` into classes 0 and 1.
#[derive(Debug, Clone)]
pub struct Accuracy {
    threshold: f32,
}

impl Accuracy {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for Accuracy {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl Metric for Accuracy {
    fn compute(&self, predictions: &[Tensor], targets: &Batch) -> Result<f32> {
        let pred = predictions
            .first()
            .ok_or_else(|| Error::InvalidParameter("model produced no outputs".into()))?;
        let labels = targets.at(0)?.as_int()?;
        if labels.is_empty() {
            return Ok(0.0);
        }

        let rows = pred.shape().first().copied().unwrap_or(0);
        if rows != labels.len() {
            return Err(Error::ShapeMismatch {
                expected: vec![labels.len()],
                got: pred.shape().to_vec(),
            });
        }
        let flat = pred
            .data()
            .view()
            .into_shape_with_order((rows, pred.len() / rows.max(1)))
            .map_err(|e| Error::InvalidParameter(e.to_string()))?
            .into_dimensionality::<Ix2>()
            .map_err(|e| Error::InvalidParameter(e.to_string()))?;

        let correct = flat
            .axis_iter(Axis(0))
            .zip(labels.iter())
            .filter(|(row, &label)| {
                let predicted = if row.len() == 1 {
                    i64::from(row[0] >= self.threshold)
                } else {
                    row.iter()
                        .enumerate()
                        .fold((0usize, f32::NEG_INFINITY), |best, (i, &v)| {
                            if v > best.1 {
                                (i, v)
                            } else {
                                best
                            }
                        })
                        .0 as i64
                };
                predicted == label
            })
            .count();

        Ok(correct as f32 / labels.len() as f32)
    }

    fn name(&self) -> &str {
        "Accuracy"
    }
}

/// Mean absolute error against array targets
#[derive(Debug, Clone, Default)]
pub struct MAE;

impl Metric for MAE {
    fn compute(&self, predictions: &[Tensor], targets: &Batch) -> Result<f32> {
        let pred = predictions
            .first()
            .ok_or_else(|| Error::InvalidParameter("model produced no outputs".into()))?;
        let target = targets.at(0)?.as_array()?;
        if pred.shape() != target.shape() {
            return Err(Error::ShapeMismatch {
                expected: pred.shape().to_vec(),
                got: target.shape().to_vec(),
            });
        }
        if target.is_empty() {
            return Ok(0.0);
        }
        let total: f32 = (pred.data() - target).mapv(f32::abs).sum();
        Ok(total / target.len() as f32)
    }

    fn name(&self) -> &str {
        "MAE"
    }

    fn higher_is_better(&self) -> bool {
        false
    }
}

/// Use a criterion as a metric (lower is better)
pub struct LossMetric<L: LossFn + Send> {
    loss: L,
}

impl<L: LossFn + Send> LossMetric<L> {
    pub fn new(loss: L) -> Self {
        Self { loss }
    }
}

impl<L: LossFn + Send> Metric for LossMetric<L> {
    fn compute(&self, predictions: &[Tensor], targets: &Batch) -> Result<f32> {
        let _guard = no_grad();
        Ok(self.loss.forward(predictions, targets)?.item())
    }

    fn name(&self) -> &str {
        self.loss.name()
    }

    fn higher_is_better(&self) -> bool {
        false
    }
}

/// Averages named metrics over each epoch.
///
/// Results land in `state.metrics[split]`; after a validation epoch they are
/// also copied to `state.val_metrics`, where checkpointing callbacks look for
/// the monitored metric (conventionally `"main"`).
pub struct ComputeMetrics {
    metrics: Vec<(String, Box<dyn Metric>)>,
    meters: BTreeMap<String, AverageMeter>,
}

impl ComputeMetrics {
    pub fn new() -> Self {
        Self {
            metrics: Vec::new(),
            meters: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, metric: impl Metric + 'static) -> Self {
        self.metrics.push((name.into(), Box::new(metric)));
        self
    }

    pub fn with_boxed(mut self, name: impl Into<String>, metric: Box<dyn Metric>) -> Self {
        self.metrics.push((name.into(), metric));
        self
    }
}

impl Default for ComputeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainerCallback for ComputeMetrics {
    fn on_epoch_begin(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        self.meters.clear();
        Ok(CallbackAction::Continue)
    }

    fn on_batch_forward(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        let Some(view) = ctx.batch else {
            return Ok(CallbackAction::Continue);
        };
        let Some(predictions) = view.predictions else {
            return Ok(CallbackAction::Continue);
        };
        let weight = view.targets.len() as f64;
        for (name, metric) in &self.metrics {
            let value = metric.compute(predictions, view.targets)?;
            self.meters
                .entry(name.clone())
                .or_default()
                .update(f64::from(value), weight);
        }
        Ok(CallbackAction::Continue)
    }

    fn on_epoch_end(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        let results: BTreeMap<String, f32> = self
            .meters
            .iter()
            .map(|(name, meter)| (name.clone(), meter.avg() as f32))
            .collect();
        let split = ctx.split();
        if split == Split::Valid {
            ctx.state.val_metrics = results.clone();
        }
        ctx.state.metrics.insert(split, results);
        Ok(CallbackAction::Continue)
    }

    fn name(&self) -> &str {
        "ComputeMetrics"
    }
}
