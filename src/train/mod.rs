//! High-level training loop
//!
//! This module provides the training framework:
//! - Loss functions (MSE, Cross-Entropy)
//! - The [`Trainer`] state machine and its configuration
//! - Lifecycle callbacks and the metrics that ride on them
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use scorch::data::{Dataset, VecDataset};
//! use scorch::nn::Linear;
//! use scorch::optim::{OptimizerBinding, SGD};
//! use scorch::train::{ComputeMetrics, MAE, MSELoss, TrainConfig, Trainer, TrainerParts};
//!
//! let parts = TrainerParts {
//!     model: Box::new(Linear::new(4, 1)),
//!     criterion: Box::new(MSELoss),
//!     optimizers: vec![OptimizerBinding::all(Box::new(SGD::new(0.01, 0.9)))],
//! };
//! let mut trainer = Trainer::builder(parts, TrainConfig::default())
//!     .callback(ComputeMetrics::new().with_metric("main", MAE))
//!     .build()?;
//!
//! let dataset: Arc<dyn Dataset> = Arc::new(VecDataset::new(vec![]));
//! trainer.train(&dataset)?;
//! # Ok::<(), scorch::Error>(())
//! ```

pub mod callback;
mod config;
mod loss;
mod metrics;
mod state;
mod trainer;

pub use callback::{
    BatchView, CallbackAction, CallbackContext, CallbackManager, EarlyStopping, ProgressCallback,
    TrainerCallback,
};
pub use config::TrainConfig;
pub use loss::{CrossEntropyLoss, LossFn, MSELoss};
pub use metrics::{Accuracy, AverageMeter, ComputeMetrics, LossMetric, Metric, MAE};
pub use state::{Phase, TrainerState};
pub use trainer::{TrainResult, Trainer, TrainerBuilder, TrainerParts};
