//! Declarative YAML configuration and the command line
//!
//! A run names a registered model and dataset, their keyword arguments, and
//! the training hyperparameters. Command-line flags override the YAML file.
//!
//! # Example
//!
//! ```yaml
//! model:
//!   name: linear
//!   args: {in_features: 4, lr: 0.05}
//!
//! dataset:
//!   name: synthetic
//!   args: {samples: 512, in_features: 4, noise: 0.1}
//!
//! optimizer:
//!   name: adam
//!   lr: 1e-3
//!
//! training:
//!   batch_size: 16
//!   epochs: 20
//!   dump_period: 5
//!   checkpoint_prefix: runs/linear
//!
//! output:
//!   results_dir: runs/results
//!   metrics_log: runs/metrics.jsonl
//! ```

mod builder;
mod cli;
mod kwargs;
mod schema;
mod train;
mod validate;

pub use builder::{build_bindings, build_optimizer};
pub use cli::{
    apply_overrides, apply_test_overrides, execute, init_tracing, parse_args, run, test_spec,
    train_spec, Cli, Command, CommonArgs, TestArgs, TrainArgs,
};
pub use kwargs::{KwArgs, KwValue};
pub use schema::{OptimSpec, OutputParams, PluginRef, TrainSpec, TrainingParams};
pub use train::{load_config, test_from_spec, train_from_spec, train_from_yaml};
pub use validate::{validate_config, ValidationError};
