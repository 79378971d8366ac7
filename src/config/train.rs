//! Training and testing from a [`TrainSpec`]

use super::builder::build_bindings;
use super::schema::TrainSpec;
use super::validate::validate_config;
use crate::checkpoint::MakeCheckpoints;
use crate::data::Dataset;
use crate::device::device_by_name;
use crate::error::{Error, Result};
use crate::random;
use crate::registry::{ModelBundle, Registry};
use crate::storage::{JsonlSink, SaveResult, WriteMetrics};
use crate::train::{
    CallbackManager, ComputeMetrics, ProgressCallback, TrainResult, Trainer, TrainerParts,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Load and parse a YAML run description
pub fn load_config<P: AsRef<Path>>(config_path: P) -> Result<TrainSpec> {
    let path = config_path.as_ref();
    let yaml_content = fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {e}", path.display()))
    })?;

    serde_yaml::from_str(&yaml_content)
        .map_err(|e| Error::Config(format!("Failed to parse YAML config: {e}")))
}

/// Train from a YAML file using the built-in plugins
///
/// # Example
///
/// ```no_run
/// use scorch::config::train_from_yaml;
///
/// let result = train_from_yaml("config.yaml")?;
/// println!("finished after {} epochs", result.final_epoch);
/// # Ok::<(), scorch::Error>(())
/// ```
pub fn train_from_yaml<P: AsRef<Path>>(config_path: P) -> Result<TrainResult> {
    let spec = load_config(config_path)?;
    train_from_spec(&spec, &Registry::with_builtins())
}

/// Everything a run needs, resolved from the registry
struct Prepared {
    dataset: Arc<dyn Dataset>,
    parts: TrainerParts,
    metrics: ComputeMetrics,
    main_higher_is_better: Option<bool>,
}

fn prepare(spec: &TrainSpec, registry: &Registry) -> Result<Prepared> {
    validate_config(spec).map_err(|e| Error::Config(format!("Invalid config: {e}")))?;
    // parameter init and data generation draw from the global seed
    random::set_global_seed(spec.training.seed);

    let dataset = registry.build_dataset(&spec.dataset.name, &spec.dataset.args)?;
    let ModelBundle { mut parts, metrics } =
        registry.build_model(&spec.model.name, &spec.model.args)?;
    if let Some(optimizer) = &spec.optimizer {
        parts.optimizers = build_bindings(optimizer)?;
    }

    let main_higher_is_better = metrics
        .iter()
        .find(|(name, _)| name == "main")
        .map(|(_, m)| m.higher_is_better());
    let metrics = metrics
        .into_iter()
        .fold(ComputeMetrics::new(), |acc, (name, metric)| acc.with_boxed(name, metric));

    tracing::info!(
        model = %spec.model.name,
        model_args = %spec.model.args,
        dataset = %spec.dataset.name,
        dataset_args = %spec.dataset.args,
        "plugins resolved"
    );
    Ok(Prepared {
        dataset,
        parts,
        metrics,
        main_higher_is_better,
    })
}

fn metrics_writer(spec: &TrainSpec) -> Result<Option<WriteMetrics>> {
    spec.output
        .metrics_log
        .as_ref()
        .map(|path| {
            JsonlSink::create(path).map(WriteMetrics::new).map_err(|e| {
                Error::Config(format!("cannot open metrics log {}: {e}", path.display()))
            })
        })
        .transpose()
}

/// Train the model and dataset named by `spec`.
///
/// Callbacks, in order: metric computation, best-checkpoint tracking on the
/// `main` metric, progress logging unless silent, and a JSON-lines metrics
/// log when `output.metrics_log` is set. Resumes from
/// `training.checkpoint` when given.
pub fn train_from_spec(spec: &TrainSpec, registry: &Registry) -> Result<TrainResult> {
    let prepared = prepare(spec, registry)?;
    let training = &spec.training;

    let mut callbacks = CallbackManager::new();
    callbacks.add(prepared.metrics);
    if let Some(higher_is_better) = prepared.main_higher_is_better {
        callbacks.add(
            MakeCheckpoints::new(training.checkpoint_prefix.clone())
                .monitor("main", higher_is_better),
        );
    }
    if !training.silent {
        callbacks.add(ProgressCallback::default());
    }
    if let Some(writer) = metrics_writer(spec)? {
        callbacks.add(writer);
    }

    let mut trainer = Trainer::builder(prepared.parts, spec.train_config())
        .callbacks(callbacks)
        .device(device_by_name(&training.device, training.deterministic)?)
        .build()?;

    if let Some(checkpoint) = &training.checkpoint {
        trainer.load_checkpoint(checkpoint, training.new_optimizer)?;
    }
    trainer.train(&prepared.dataset)
}

/// Evaluate the test split of the dataset named by `spec`.
///
/// Predictions go to `{output.results_dir}/predictions.jsonl`. Returns the
/// mean test loss, `None` if the split is empty.
pub fn test_from_spec(spec: &TrainSpec, registry: &Registry) -> Result<Option<f32>> {
    let prepared = prepare(spec, registry)?;
    let training = &spec.training;

    let mut callbacks = CallbackManager::new();
    callbacks.add(prepared.metrics);
    callbacks.add(SaveResult::new(spec.output.results_dir.clone()));
    if !training.silent {
        callbacks.add(ProgressCallback::default());
    }
    if let Some(writer) = metrics_writer(spec)? {
        callbacks.add(writer);
    }

    let mut trainer = Trainer::builder(prepared.parts, spec.train_config())
        .callbacks(callbacks)
        .device(device_by_name(&training.device, training.deterministic)?)
        .build()?;

    if let Some(checkpoint) = &training.checkpoint {
        trainer.load_checkpoint(checkpoint, true)?;
    }
    let loss = trainer.test(&prepared.dataset)?;
    tracing::info!(
        loss = ?loss,
        metrics = ?trainer.state().metrics.get(&crate::data::Split::Test),
        "test finished"
    );
    Ok(loss)
}
