//! CLI argument parsing and dispatch
//!
//! # Usage
//!
//! ```bash
//! scorch train --model linear --dataset synthetic -b 16 -e 20
//! scorch train --config run.yaml --epochs 5 --model-args "lr:0.05,optimizer:adam"
//! scorch train --model linear --dataset synthetic -c checkpoint_latest.json --new-optimizer
//! scorch test --model linear --dataset synthetic -c checkpoint_best.json --prefix results
//! ```
//!
//! Values given on the command line override the YAML file.

use super::kwargs::KwArgs;
use super::schema::{PluginRef, TrainSpec};
use super::train::{load_config, test_from_spec, train_from_spec};
use crate::error::Result;
use crate::registry::Registry;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

/// Scorch: supervised training orchestration
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "scorch")]
#[command(version)]
#[command(about = "Train and test registered models on registered datasets")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Train a model on a dataset
    Train(TrainArgs),

    /// Evaluate a model on the test split
    Test(TestArgs),
}

/// Flags shared by `train` and `test`
#[derive(Args, Debug, Clone, PartialEq)]
pub struct CommonArgs {
    /// YAML run description
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Registered model name
    #[arg(long)]
    pub model: Option<String>,

    /// Registered dataset name
    #[arg(long)]
    pub dataset: Option<String>,

    /// Model arguments, e.g. "in_features:3,lr:0.1"
    #[arg(long, value_name = "KEY:VALUE,...")]
    pub model_args: Option<KwArgs>,

    /// Dataset arguments, same syntax as --model-args
    #[arg(long, value_name = "KEY:VALUE,...")]
    pub dataset_args: Option<KwArgs>,

    /// Batch size
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Number of loader worker threads
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Checkpoint to load from
    #[arg(short, long)]
    pub checkpoint: Option<PathBuf>,

    /// Device to place batches on
    #[arg(long)]
    pub device: Option<String>,

    /// Seed for random number generators
    #[arg(long)]
    pub seed: Option<u64>,

    /// Keep batch order reproducible
    #[arg(long)]
    pub deterministic: bool,

    /// Do not print the status of learning
    #[arg(short, long)]
    pub silent: bool,

    /// Append scalar metrics to this JSON-lines file
    #[arg(long)]
    pub metrics_log: Option<PathBuf>,
}

/// Arguments for the train command
#[derive(Args, Debug, Clone, PartialEq)]
pub struct TrainArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Number of epochs to perform
    #[arg(short, long)]
    pub epochs: Option<usize>,

    /// Dump checkpoints every N epochs (0 = never)
    #[arg(short, long)]
    pub dump_period: Option<usize>,

    /// Prefix of the checkpoint file names
    #[arg(long)]
    pub checkpoint_prefix: Option<PathBuf>,

    /// Also evaluate the training split after each epoch
    #[arg(long)]
    pub validate_on_train: bool,

    /// Maximum training batches per epoch
    #[arg(long)]
    pub max_train_iterations: Option<usize>,

    /// Maximum validation batches per epoch
    #[arg(long)]
    pub max_valid_iterations: Option<usize>,

    /// Maximum test batches
    #[arg(long)]
    pub max_test_iterations: Option<usize>,

    /// Use new optimizers when loading from the checkpoint
    #[arg(long)]
    pub new_optimizer: bool,

    /// Run tests on the primary rank only with batch size 1
    #[arg(long)]
    pub solo_test: bool,
}

/// Arguments for the test command
#[derive(Args, Debug, Clone, PartialEq)]
pub struct TestArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Maximum test batches
    #[arg(long)]
    pub max_test_iterations: Option<usize>,

    /// Folder for the results
    #[arg(long)]
    pub prefix: Option<PathBuf>,
}

impl Cli {
    pub fn silent(&self) -> bool {
        match &self.command {
            Command::Train(args) => args.common.silent,
            Command::Test(args) => args.common.silent,
        }
    }
}

/// Parse command-line arguments
pub fn parse_args<I, T>(args: I) -> std::result::Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args)
}

/// Apply the shared overrides to a TrainSpec
fn apply_common(spec: &mut TrainSpec, args: &CommonArgs) {
    if let Some(model) = &args.model {
        spec.model.name = model.clone();
    }
    if let Some(dataset) = &args.dataset {
        spec.dataset.name = dataset.clone();
    }
    if let Some(model_args) = &args.model_args {
        spec.model.args.merge(model_args.clone());
    }
    if let Some(dataset_args) = &args.dataset_args {
        spec.dataset.args.merge(dataset_args.clone());
    }
    let training = &mut spec.training;
    if let Some(batch_size) = args.batch_size {
        training.batch_size = batch_size;
    }
    if let Some(workers) = args.workers {
        training.workers = workers;
    }
    if let Some(checkpoint) = &args.checkpoint {
        training.checkpoint = Some(checkpoint.clone());
    }
    if let Some(device) = &args.device {
        training.device = device.clone();
    }
    if let Some(seed) = args.seed {
        training.seed = seed;
    }
    training.deterministic |= args.deterministic;
    training.silent |= args.silent;
    if let Some(metrics_log) = &args.metrics_log {
        spec.output.metrics_log = Some(metrics_log.clone());
    }
}

/// Apply command-line overrides to a TrainSpec
pub fn apply_overrides(spec: &mut TrainSpec, args: &TrainArgs) {
    apply_common(spec, &args.common);
    let training = &mut spec.training;
    if let Some(epochs) = args.epochs {
        training.epochs = epochs;
    }
    if let Some(dump_period) = args.dump_period {
        training.dump_period = dump_period;
    }
    if let Some(prefix) = &args.checkpoint_prefix {
        training.checkpoint_prefix = prefix.clone();
    }
    if args.max_train_iterations.is_some() {
        training.max_train_iterations = args.max_train_iterations;
    }
    if args.max_valid_iterations.is_some() {
        training.max_valid_iterations = args.max_valid_iterations;
    }
    if args.max_test_iterations.is_some() {
        training.max_test_iterations = args.max_test_iterations;
    }
    training.validate_on_train |= args.validate_on_train;
    training.new_optimizer |= args.new_optimizer;
    training.solo_test |= args.solo_test;
}

/// Apply `test` overrides to a TrainSpec
pub fn apply_test_overrides(spec: &mut TrainSpec, args: &TestArgs) {
    apply_common(spec, &args.common);
    if args.max_test_iterations.is_some() {
        spec.training.max_test_iterations = args.max_test_iterations;
    }
    if let Some(prefix) = &args.prefix {
        spec.output.results_dir = prefix.clone();
    }
}

/// YAML spec (if any) with no plugin names yet
fn base_spec(args: &CommonArgs) -> Result<TrainSpec> {
    match &args.config {
        Some(path) => load_config(path),
        None => Ok(TrainSpec::new(PluginRef::default(), PluginRef::default())),
    }
}

/// Resolve the spec of a `train` invocation
pub fn train_spec(args: &TrainArgs) -> Result<TrainSpec> {
    let mut spec = base_spec(&args.common)?;
    apply_overrides(&mut spec, args);
    Ok(spec)
}

/// Resolve the spec of a `test` invocation
pub fn test_spec(args: &TestArgs) -> Result<TrainSpec> {
    let mut spec = base_spec(&args.common)?;
    apply_test_overrides(&mut spec, args);
    Ok(spec)
}

/// Run a parsed command against `registry`
pub fn execute(cli: &Cli, registry: &Registry) -> Result<()> {
    match &cli.command {
        Command::Train(args) => {
            let result = train_from_spec(&train_spec(args)?, registry)?;
            tracing::info!(
                epochs = result.final_epoch,
                loss = ?result.final_loss,
                best_loss = ?result.best_loss,
                stopped_early = result.stopped_early,
                elapsed_secs = result.elapsed_secs,
                "done"
            );
        }
        Command::Test(args) => {
            let loss = test_from_spec(&test_spec(args)?, registry)?;
            if loss.is_none() {
                tracing::warn!("test split is empty");
            }
        }
    }
    Ok(())
}

/// Install the `tracing` subscriber: `RUST_LOG` if set, else `info`, or
/// `warn` when silent
pub fn init_tracing(silent: bool) {
    let default = if silent { "warn" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    // a subscriber installed by the embedding program wins
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Entry point for binaries: parse `std::env::args`, run, report errors
pub fn run(registry: &Registry) -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.silent());

    match execute(&cli, registry) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
