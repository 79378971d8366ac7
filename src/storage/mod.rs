//! Metric sinks and result files
//!
//! A [`MetricsSink`] receives scalar time series (`train/loss`,
//! `valid/main`, …) keyed by step. Sinks are best effort: the
//! [`WriteMetrics`] callback logs sink failures and keeps training.
//!
//! # Backends
//!
//! - [`InMemorySink`]: keeps points in memory, for tests and embedding
//! - [`JsonlSink`]: appends one JSON object per point to a file
//!
//! # Example
//!
//! ```
//! use scorch::storage::{InMemorySink, MetricsSink};
//!
//! let mut sink = InMemorySink::new();
//! sink.log_scalar("train/loss", 0, 0.5).unwrap();
//! assert_eq!(sink.points().len(), 1);
//! ```

pub mod jsonl;
pub mod memory;
mod results;

pub use jsonl::JsonlSink;
pub use memory::InMemorySink;
pub use results::SaveResult;

use crate::data::Split;
use crate::train::{CallbackAction, CallbackContext, TrainerCallback};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sink errors
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Sink backend error: {0}")]
    Backend(String),
}

/// A single metric data point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub tag: String,
    /// Training step (global step or epoch, depending on the tag)
    pub step: u64,
    pub value: f64,
    /// Timestamp when recorded
    pub timestamp: DateTime<Utc>,
}

impl MetricPoint {
    /// Create a new metric point with current timestamp
    pub fn new(tag: impl Into<String>, step: u64, value: f64) -> Self {
        Self {
            tag: tag.into(),
            step,
            value,
            timestamp: Utc::now(),
        }
    }
}

/// Destination for scalar metrics
///
/// Implementations must be `Send` so a trainer can run on a worker thread.
pub trait MetricsSink: Send {
    fn log_scalar(&mut self, tag: &str, step: u64, value: f64) -> Result<(), SinkError>;

    /// Persist buffered points
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Sends losses and metrics to a [`MetricsSink`].
///
/// Per training batch it writes `train/batch_loss` at the global step; per
/// epoch it writes `{split}/loss` and `{split}/{metric}` at the epoch
/// number. Only the primary rank writes. Sink failures are logged with
/// `tracing::warn!` and never interrupt training.
pub struct WriteMetrics {
    sink: Box<dyn MetricsSink>,
}

impl WriteMetrics {
    pub fn new(sink: impl MetricsSink + 'static) -> Self {
        Self {
            sink: Box::new(sink),
        }
    }

    pub fn boxed(sink: Box<dyn MetricsSink>) -> Self {
        Self { sink }
    }

    fn write(&mut self, tag: &str, step: u64, value: f64) {
        if let Err(e) = self.sink.log_scalar(tag, step, value) {
            tracing::warn!(tag, step, error = %e, "metrics sink rejected a point");
        }
    }
}

impl TrainerCallback for WriteMetrics {
    fn on_batch_end(&mut self, ctx: &mut CallbackContext<'_>) -> crate::Result<CallbackAction> {
        if ctx.is_primary && ctx.split() == Split::Train {
            if let Some(loss) = ctx.state.loss {
                self.write("train/batch_loss", ctx.state.global_step as u64, f64::from(loss));
            }
        }
        Ok(CallbackAction::Continue)
    }

    fn on_epoch_end(&mut self, ctx: &mut CallbackContext<'_>) -> crate::Result<CallbackAction> {
        if !ctx.is_primary {
            return Ok(CallbackAction::Continue);
        }
        let split = ctx.split();
        let step = ctx.state.epoch as u64;
        if let Some(loss) = ctx.state.epoch_loss(split) {
            self.write(&format!("{split}/loss"), step, f64::from(loss));
        }
        let metrics: Vec<(String, f32)> = ctx
            .state
            .metrics
            .get(&split)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default();
        for (name, value) in metrics {
            self.write(&format!("{split}/{name}"), step, f64::from(value));
        }
        if let Err(e) = self.sink.flush() {
            tracing::warn!(error = %e, "metrics sink flush failed");
        }
        Ok(CallbackAction::Continue)
    }

    fn name(&self) -> &str {
        "WriteMetrics"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::Linear;
    use crate::train::TrainerState;

    struct Broken;

    impl MetricsSink for Broken {
        fn log_scalar(&mut self, _: &str, _: u64, _: f64) -> Result<(), SinkError> {
            Err(SinkError::Backend("disk full".into()))
        }
    }

    fn epoch_end(
        cb: &mut WriteMetrics,
        state: &mut TrainerState,
        is_primary: bool,
    ) -> CallbackAction {
        let model = Linear::new(1, 1);
        let mut ctx = CallbackContext {
            state,
            model: &model,
            optimizers: &[],
            batch: None,
            is_primary,
        };
        cb.on_epoch_end(&mut ctx).unwrap()
    }

    #[test]
    fn test_write_metrics_epoch_tags() {
        let sink = InMemorySink::new();
        let mut cb = WriteMetrics::new(sink.clone());
        let mut state = TrainerState {
            epoch: 2,
            split: Split::Valid,
            ..TrainerState::default()
        };
        state.epoch_loss.insert(Split::Valid, 0.25);
        state
            .metrics
            .entry(Split::Valid)
            .or_default()
            .insert("main".into(), 0.9);

        epoch_end(&mut cb, &mut state, true);

        let tags: Vec<(String, u64)> = sink
            .points()
            .into_iter()
            .map(|p| (p.tag, p.step))
            .collect();
        assert_eq!(
            tags,
            vec![("valid/loss".to_string(), 2), ("valid/main".to_string(), 2)]
        );
    }

    #[test]
    fn test_write_metrics_skips_non_primary() {
        let sink = InMemorySink::new();
        let mut cb = WriteMetrics::new(sink.clone());
        let mut state = TrainerState::default();
        state.epoch_loss.insert(Split::Train, 1.0);
        epoch_end(&mut cb, &mut state, false);
        assert!(sink.points().is_empty());
    }

    #[test]
    fn test_sink_failure_is_not_an_error() {
        let mut cb = WriteMetrics::new(Broken);
        let mut state = TrainerState::default();
        state.epoch_loss.insert(Split::Train, 1.0);
        assert_eq!(epoch_end(&mut cb, &mut state, true), CallbackAction::Continue);
    }
}
