//! Scorch CLI
//!
//! Trains and tests the built-in models and datasets.
//!
//! # Usage
//!
//! ```bash
//! # Train from flags
//! scorch train --model linear --dataset synthetic --epochs 10 -b 16
//!
//! # Train from config with overrides
//! scorch train --config run.yaml --epochs 3 --seed 7
//!
//! # Resume with fresh optimizers
//! scorch train --config run.yaml -c checkpoint_latest.json --new-optimizer
//!
//! # Write test predictions to results/predictions.jsonl
//! scorch test --config run.yaml -c checkpoint_best.json --prefix results
//! ```

use scorch::config;
use scorch::registry::Registry;
use std::process::ExitCode;

fn main() -> ExitCode {
    config::run(&Registry::with_builtins())
}
