//! Named model and dataset factories
//!
//! The CLI resolves `--model NAME` and `--dataset NAME` through a
//! [`Registry`]. Each factory receives the parsed `--model-args` /
//! `--dataset-args`. Programs embedding their own plugins build a registry,
//! register factories, and hand it to [`cli::run`](crate::config::run).

use crate::config::KwArgs;
use crate::data::Dataset;
use crate::train::{Metric, TrainerParts};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// What a model factory produces: the trainer parts plus the metrics to
/// compute on every epoch.
///
/// A metric named `main` is the one best-checkpoint selection watches.
pub struct ModelBundle {
    pub parts: TrainerParts,
    pub metrics: Vec<(String, Box<dyn Metric>)>,
}

impl ModelBundle {
    pub fn new(parts: TrainerParts) -> Self {
        Self {
            parts,
            metrics: Vec::new(),
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, metric: impl Metric + 'static) -> Self {
        self.metrics.push((name.into(), Box::new(metric)));
        self
    }

    /// The `main` metric, if any
    pub fn main_metric(&self) -> Option<&dyn Metric> {
        self.metrics
            .iter()
            .find(|(name, _)| name == "main")
            .map(|(_, m)| m.as_ref())
    }
}

pub type ModelFactory = Box<dyn Fn(&KwArgs) -> Result<ModelBundle> + Send + Sync>;
pub type DatasetFactory = Box<dyn Fn(&KwArgs) -> Result<Arc<dyn Dataset>> + Send + Sync>;

/// Registry of model and dataset factories
#[derive(Default)]
pub struct Registry {
    models: BTreeMap<String, ModelFactory>,
    datasets: BTreeMap<String, DatasetFactory>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in plugins of [`crate::plugins`]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::plugins::register(&mut registry);
        registry
    }

    /// Registers a model factory, replacing any factory of the same name.
    pub fn register_model<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&KwArgs) -> Result<ModelBundle> + Send + Sync + 'static,
    {
        self.models.insert(name.into(), Box::new(factory));
        self
    }

    /// Registers a dataset factory, replacing any factory of the same name.
    pub fn register_dataset<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&KwArgs) -> Result<Arc<dyn Dataset>> + Send + Sync + 'static,
    {
        self.datasets.insert(name.into(), Box::new(factory));
        self
    }

    /// Builds the model registered under `name`.
    ///
    /// # Errors
    /// [`Error::UnknownPlugin`] if nothing is registered under `name`, or
    /// whatever the factory reports for bad arguments.
    pub fn build_model(&self, name: &str, args: &KwArgs) -> Result<ModelBundle> {
        let factory = self.models.get(name).ok_or_else(|| Error::UnknownPlugin {
            kind: "model",
            name: name.to_string(),
        })?;
        factory(args)
    }

    /// Builds the dataset registered under `name`.
    pub fn build_dataset(&self, name: &str, args: &KwArgs) -> Result<Arc<dyn Dataset>> {
        let factory = self.datasets.get(name).ok_or_else(|| Error::UnknownPlugin {
            kind: "dataset",
            name: name.to_string(),
        })?;
        factory(args)
    }

    pub fn model_names(&self) -> Vec<&str> {
        self.models.keys().map(String::as_str).collect()
    }

    pub fn dataset_names(&self) -> Vec<&str> {
        self.datasets.keys().map(String::as_str).collect()
    }
}
