//! Built-in plugins
//!
//! Models:
//! - `linear`: [`Linear`] regression with MSE loss, `main` = MAE.
//!   Args: `in_features`, `out_features`, `optimizer` (`sgd`/`adam`/`adamw`),
//!   `lr`, `momentum`.
//! - `logistic`: [`Linear`] classifier with cross-entropy, `main` = accuracy.
//!   Args: `in_features`, `classes`, `optimizer`, `lr`, `momentum`.
//!
//! Datasets:
//! - `synthetic`: noisy linear regression targets.
//!   Args: `samples`, `valid`, `test`, `in_features`, `out_features`,
//!   `noise`, `seed`.
//! - `blobs`: uniform clusters around per-class centers.
//!   Args: `samples`, `valid`, `test`, `in_features`, `classes`, `spread`,
//!   `seed`.

use crate::config::{build_optimizer, KwArgs, OptimSpec};
use crate::data::{Dataset, Sample, VecDataset};
use crate::nn::Linear;
use crate::optim::OptimizerBinding;
use crate::random::{self, DEFAULT_SEED};
use crate::registry::{ModelBundle, Registry};
use crate::train::{Accuracy, CrossEntropyLoss, LossFn, MSELoss, TrainerParts, MAE};
use crate::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;

/// Stream used for dataset generation, distinct from parameter init
const DATA_STREAM: u64 = 0x2000;

/// Register every built-in plugin
pub fn register(registry: &mut Registry) {
    registry
        .register_model("linear", linear_model)
        .register_model("logistic", logistic_model)
        .register_dataset("synthetic", synthetic_dataset)
        .register_dataset("blobs", blobs_dataset);
}

fn optimizer_from_args(args: &KwArgs, default_lr: f32) -> Result<Vec<OptimizerBinding>> {
    let mut params = HashMap::new();
    params.insert(
        "momentum".to_string(),
        serde_json::json!(args.get_f64("momentum", 0.0)?),
    );
    let spec = OptimSpec {
        name: args.get_str("optimizer", "sgd")?.to_string(),
        lr: args.get_f32("lr", default_lr)?,
        params,
    };
    Ok(vec![OptimizerBinding::all(build_optimizer(&spec)?)])
}

fn positive(args: &KwArgs, key: &str, default: usize) -> Result<usize> {
    match args.get_usize(key, default)? {
        0 => Err(Error::Config(format!("argument '{key}' must be positive"))),
        n => Ok(n),
    }
}

fn linear_bundle(
    args: &KwArgs,
    out_key: &str,
    criterion: Box<dyn LossFn>,
    default_lr: f32,
) -> Result<TrainerParts> {
    let in_features = positive(args, "in_features", if out_key == "classes" { 2 } else { 1 })?;
    let out_features = positive(args, out_key, if out_key == "classes" { 2 } else { 1 })?;
    Ok(TrainerParts {
        model: Box::new(Linear::new(in_features, out_features)),
        criterion,
        optimizers: optimizer_from_args(args, default_lr)?,
    })
}

pub fn linear_model(args: &KwArgs) -> Result<ModelBundle> {
    let parts = linear_bundle(args, "out_features", Box::new(MSELoss), 0.01)?;
    Ok(ModelBundle::new(parts).with_metric("main", MAE))
}

pub fn logistic_model(args: &KwArgs) -> Result<ModelBundle> {
    let parts = linear_bundle(args, "classes", Box::new(CrossEntropyLoss), 0.1)?;
    Ok(ModelBundle::new(parts).with_metric("main", Accuracy::default()))
}

struct SplitSizes {
    train: usize,
    valid: usize,
    test: usize,
}

impl SplitSizes {
    fn from_args(args: &KwArgs) -> Result<Self> {
        Ok(Self {
            train: args.get_usize("samples", 256)?,
            valid: args.get_usize("valid", 64)?,
            test: args.get_usize("test", 64)?,
        })
    }

    fn build(&self, mut make: impl FnMut() -> Sample) -> VecDataset {
        let mut split = |n: usize| (0..n).map(|_| make()).collect::<Vec<_>>();
        let train = split(self.train);
        let valid = split(self.valid);
        let test = split(self.test);
        VecDataset::new(train).with_valid(valid).with_test(test)
    }
}

fn data_rng(args: &KwArgs) -> Result<StdRng> {
    let seed = args.get_usize("seed", DEFAULT_SEED as usize)? as u64;
    Ok(StdRng::seed_from_u64(random::derive(seed, DATA_STREAM)))
}

pub fn synthetic_dataset(args: &KwArgs) -> Result<Arc<dyn Dataset>> {
    let sizes = SplitSizes::from_args(args)?;
    let in_features = positive(args, "in_features", 1)?;
    let out_features = positive(args, "out_features", 1)?;
    let noise = args.get_f32("noise", 0.0)?.abs();
    let mut rng = data_rng(args)?;

    let weights: Vec<f32> = (0..in_features * out_features)
        .map(|_| rng.gen_range(-2.0..=2.0))
        .collect();
    let bias: Vec<f32> = (0..out_features).map(|_| rng.gen_range(-1.0..=1.0)).collect();

    let dataset = sizes.build(|| {
        let x: Vec<f32> = (0..in_features).map(|_| rng.gen_range(-1.0..=1.0)).collect();
        let y: Vec<f32> = (0..out_features)
            .map(|o| {
                let clean: f32 = bias[o]
                    + x.iter()
                        .enumerate()
                        .map(|(i, xi)| xi * weights[i * out_features + o])
                        .sum::<f32>();
                if noise > 0.0 {
                    clean + rng.gen_range(-noise..=noise)
                } else {
                    clean
                }
            })
            .collect();
        Sample::pair(vec![Sample::from_slice(&x)], vec![Sample::from_slice(&y)])
    });
    Ok(Arc::new(dataset))
}

pub fn blobs_dataset(args: &KwArgs) -> Result<Arc<dyn Dataset>> {
    let sizes = SplitSizes::from_args(args)?;
    let in_features = positive(args, "in_features", 2)?;
    let classes = positive(args, "classes", 2)?;
    let spread = args.get_f32("spread", 0.5)?.abs();
    let mut rng = data_rng(args)?;

    let centers: Vec<Vec<f32>> = (0..classes)
        .map(|_| (0..in_features).map(|_| rng.gen_range(-3.0..=3.0)).collect())
        .collect();

    let dataset = sizes.build(|| {
        let label = rng.gen_range(0..classes);
        let x: Vec<f32> = centers[label]
            .iter()
            .map(|c| {
                if spread > 0.0 {
                    c + rng.gen_range(-spread..=spread)
                } else {
                    *c
                }
            })
            .collect();
        Sample::pair(vec![Sample::from_slice(&x)], vec![Sample::Int(label as i64)])
    });
    Ok(Arc::new(dataset))
}
