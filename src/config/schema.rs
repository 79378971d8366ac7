//! YAML schema definitions for declarative training configuration

use super::kwargs::KwArgs;
use crate::random::DEFAULT_SEED;
use crate::train::TrainConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Complete run description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainSpec {
    /// Registered model and its arguments
    pub model: PluginRef,

    /// Registered dataset and its arguments
    pub dataset: PluginRef,

    /// Replaces the model's own optimizer bindings with one optimizer over
    /// all parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimizer: Option<OptimSpec>,

    /// Training hyperparameters
    #[serde(default)]
    pub training: TrainingParams,

    /// Where results and metric logs go
    #[serde(default)]
    pub output: OutputParams,
}

/// Name of a registered plugin plus its keyword arguments
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginRef {
    pub name: String,

    #[serde(default, skip_serializing_if = "KwArgs::is_empty")]
    pub args: KwArgs,
}

impl PluginRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: KwArgs::new(),
        }
    }
}

/// Optimizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimSpec {
    /// Optimizer name: "adam" | "adamw" | "sgd"
    pub name: String,

    /// Learning rate
    pub lr: f32,

    /// Optimizer-specific parameters (beta1, beta2, momentum, etc.)
    #[serde(flatten)]
    pub params: HashMap<String, serde_json::Value>,
}

/// Training hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParams {
    pub batch_size: usize,
    pub epochs: usize,
    pub workers: usize,

    /// Save checkpoints every N epochs (0 = never)
    pub dump_period: usize,
    pub checkpoint_prefix: PathBuf,

    /// Checkpoint to resume from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<PathBuf>,

    /// Keep the checkpoint's parameters but start with fresh optimizers
    pub new_optimizer: bool,

    pub validate_on_train: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_train_iterations: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_valid_iterations: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_test_iterations: Option<usize>,

    pub seed: u64,
    pub deterministic: bool,
    pub silent: bool,
    pub solo_test: bool,

    /// Device name, see [`device_by_name`](crate::device::device_by_name)
    pub device: String,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            batch_size: 8,
            epochs: 1000,
            workers: 0,
            dump_period: 1,
            checkpoint_prefix: PathBuf::from("checkpoint"),
            checkpoint: None,
            new_optimizer: false,
            validate_on_train: false,
            max_train_iterations: None,
            max_valid_iterations: None,
            max_test_iterations: None,
            seed: DEFAULT_SEED,
            deterministic: false,
            silent: false,
            solo_test: false,
            device: "cpu".to_string(),
        }
    }
}

/// Output locations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputParams {
    /// Directory of test predictions
    pub results_dir: PathBuf,

    /// JSON-lines file receiving scalar metrics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_log: Option<PathBuf>,
}

impl TrainSpec {
    pub fn new(model: PluginRef, dataset: PluginRef) -> Self {
        Self {
            model,
            dataset,
            optimizer: None,
            training: TrainingParams::default(),
            output: OutputParams::default(),
        }
    }

    /// Trainer configuration described by the `training` section
    pub fn train_config(&self) -> TrainConfig {
        let t = &self.training;
        TrainConfig::new()
            .with_batch_size(t.batch_size)
            .with_epochs(t.epochs)
            .with_workers(t.workers)
            .with_checkpoints(t.dump_period, t.checkpoint_prefix.clone())
            .with_validate_on_train(t.validate_on_train)
            .with_max_iterations(
                t.max_train_iterations,
                t.max_valid_iterations,
                t.max_test_iterations,
            )
            .with_seed(t.seed)
            .with_deterministic(t.deterministic)
            .with_silent(t.silent)
            .with_solo_test(t.solo_test)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KwValue;

    #[test]
    fn test_deserialize_minimal_config() {
        let yaml = r#"
model:
  name: linear
dataset:
  name: synthetic
"#;

        let spec: TrainSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.model.name, "linear");
        assert!(spec.model.args.is_empty());
        assert!(spec.optimizer.is_none());
        assert_eq!(spec.training, TrainingParams::default());
        assert_eq!(spec.output.metrics_log, None);
    }

    #[test]
    fn test_deserialize_full_config() {
        let yaml = r#"
model:
  name: linear
  args: {in_features: 4, out_features: 2}
dataset:
  name: synthetic
  args: {samples: 128, noise: 0.05}
optimizer:
  name: adamw
  lr: 0.0001
  weight_decay: 0.01
training:
  batch_size: 32
  epochs: 3
  dump_period: 0
  validate_on_train: true
  max_valid_iterations: 5
  seed: 7
output:
  results_dir: out
  metrics_log: out/metrics.jsonl
"#;

        let spec: TrainSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.model.args.get("out_features"), Some(&KwValue::Int(2)));
        assert_eq!(spec.dataset.args.get("noise"), Some(&KwValue::Float(0.05)));
        let optimizer = spec.optimizer.as_ref().unwrap();
        assert_eq!(optimizer.name, "adamw");
        assert!(optimizer.params.contains_key("weight_decay"));
        assert_eq!(spec.training.epochs, 3);
        assert_eq!(spec.training.workers, 0);
        assert_eq!(spec.output.results_dir, PathBuf::from("out"));
    }

    #[test]
    fn test_train_config_mapping() {
        let mut spec = TrainSpec::new(PluginRef::new("linear"), PluginRef::new("synthetic"));
        spec.training.batch_size = 4;
        spec.training.max_test_iterations = Some(2);
        spec.training.solo_test = true;

        let config = spec.train_config();
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.epochs, 1000);
        assert_eq!(config.max_test_iterations, Some(2));
        assert!(config.solo_test);
    }
}
