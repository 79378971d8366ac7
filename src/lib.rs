//! # Scorch: training loop orchestration
//!
//! Scorch runs supervised training loops on top of a small tape-based
//! autograd engine, with pluggable models, datasets and callbacks.
//!
//! ## Architecture
//!
//! - **autograd**: Tape-based automatic differentiation
//! - **data**: Samples, collation of partially missing batches, shuffling, prefetching loader
//! - **nn**: Model trait and a reference linear layer
//! - **optim**: Optimizers (SGD, Adam, AdamW) and parameter-group bindings
//! - **train**: Trainer state machine, callbacks, losses and metrics
//! - **checkpoint**: Atomic checkpoint files and resume
//! - **distributed**: Gradient averaging across data-parallel ranks
//! - **device**: Batch placement
//! - **storage**: Metric sinks and prediction dumps
//! - **config**: Declarative YAML configuration and the CLI
//! - **registry**: Named model and dataset factories

pub mod autograd;
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod device;
pub mod distributed;
pub mod nn;
pub mod optim;
pub mod plugins;
pub mod random;
pub mod registry;
pub mod storage;
pub mod train;

pub mod error;

// Re-export commonly used types
pub use autograd::{backward, Tensor};
pub use error::{Error, Result};
