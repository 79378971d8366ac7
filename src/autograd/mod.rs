//! Tape-based autograd engine
//!
//! Provides the tensors models and criteria are built from. Each operation
//! records a backward op on its result; calling [`backward`] on a scalar loss
//! walks the recorded graph and accumulates gradients into the parameters.

mod backward;
mod context;
mod ops;
mod tensor;


pub use backward::BackwardOp;
pub use context::{is_grad_enabled, no_grad, NoGradGuard};
pub(crate) use ops::propagate;
pub use ops::{add, add_bias, matmul, mean, mul, relu, scale, sub, sum};
pub use tensor::{GradCell, Tensor};

use ndarray::ArrayD;

/// Perform backward pass on a tensor
///
/// Without an explicit output gradient the pass is seeded with ones, which is
/// what a scalar loss needs.
pub fn backward(tensor: &Tensor, grad_output: Option<ArrayD<f32>>) {
    let seed = grad_output.unwrap_or_else(|| ArrayD::ones(tensor.data().raw_dim()));
    tensor.set_grad(seed);

    if let Some(op) = tensor.backward_op() {
        op.backward();
    }
}
