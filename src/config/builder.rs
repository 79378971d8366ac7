//! Build training components from configuration

use super::schema::OptimSpec;
use crate::error::{Error, Result};
use crate::optim::{Adam, AdamW, Optimizer, OptimizerBinding, SGD};

fn param(spec: &OptimSpec, key: &str, default: f32) -> f32 {
    spec.params
        .get(key)
        .and_then(|v| v.as_f64())
        .map_or(default, |v| v as f32)
}

/// Build optimizer from configuration
pub fn build_optimizer(spec: &OptimSpec) -> Result<Box<dyn Optimizer>> {
    match spec.name.to_lowercase().as_str() {
        "sgd" => Ok(Box::new(SGD::new(spec.lr, param(spec, "momentum", 0.0)))),
        "adam" => Ok(Box::new(Adam::new(
            spec.lr,
            param(spec, "beta1", 0.9),
            param(spec, "beta2", 0.999),
            param(spec, "eps", 1e-8),
        ))),
        "adamw" => Ok(Box::new(AdamW::new(
            spec.lr,
            param(spec, "beta1", 0.9),
            param(spec, "beta2", 0.999),
            param(spec, "eps", 1e-8),
            param(spec, "weight_decay", 0.01),
        ))),
        name => Err(Error::UnknownPlugin {
            kind: "optimizer",
            name: name.to_string(),
        }),
    }
}

/// One binding over every parameter, replacing a model's own optimizers
pub fn build_bindings(spec: &OptimSpec) -> Result<Vec<OptimizerBinding>> {
    Ok(vec![OptimizerBinding::all(build_optimizer(spec)?)])
}
