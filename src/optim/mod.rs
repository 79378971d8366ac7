//! Optimizers for training neural networks

mod adam;
mod adamw;
mod binding;
mod optimizer;
mod sgd;

pub use adam::Adam;
pub use adamw::AdamW;
pub use binding::{OptimizerBinding, ParamGroup};
pub use optimizer::{Buffers, Optimizer, OptimizerState};
pub use sgd::SGD;
