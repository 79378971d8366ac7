//! Autograd operations with backward passes
//!
//! Shape errors panic the same way `ndarray` arithmetic does; layers
//! validate user-facing shapes before calling into these.

use super::{is_grad_enabled, BackwardOp, GradCell, Tensor};
use ndarray::{ArrayD, ArrayView2, Axis, Ix2, IxDyn};
use std::rc::Rc;

/// Whether a result built from `inputs` should record a backward op
fn tracks(inputs: &[&Tensor]) -> bool {
    is_grad_enabled() && inputs.iter().any(|t| t.requires_grad())
}

/// Continue the backward pass into `t`'s producer, if any
pub(crate) fn propagate(t: &Tensor) {
    if let Some(op) = t.backward_op() {
        op.backward();
    }
}

fn take_grad(cell: &GradCell) -> Option<ArrayD<f32>> {
    cell.borrow().clone()
}

fn matrix(data: &ArrayD<f32>) -> ArrayView2<'_, f32> {
    data.view()
        .into_dimensionality::<Ix2>()
        .expect("matmul operands must be 2-D")
}

/// Add two tensors of identical shape
pub fn add(a: &Tensor, b: &Tensor) -> Tensor {
    let data = a.data() + b.data();
    let mut result = Tensor::new(data, tracks(&[a, b]));

    if result.requires_grad() {
        let op = Rc::new(AddBackward {
            a: a.clone(),
            b: b.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(op);
    }

    result
}

struct AddBackward {
    a: Tensor,
    b: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for AddBackward {
    fn backward(&self) {
        let Some(grad) = take_grad(&self.result_grad) else {
            return;
        };
        if self.a.requires_grad() {
            self.a.accumulate_grad(grad.clone());
        }
        if self.b.requires_grad() {
            self.b.accumulate_grad(grad);
        }
        propagate(&self.a);
        propagate(&self.b);
    }
}

/// Subtract `b` from `a`
pub fn sub(a: &Tensor, b: &Tensor) -> Tensor {
    let data = a.data() - b.data();
    let mut result = Tensor::new(data, tracks(&[a, b]));

    if result.requires_grad() {
        let op = Rc::new(SubBackward {
            a: a.clone(),
            b: b.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(op);
    }

    result
}

struct SubBackward {
    a: Tensor,
    b: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for SubBackward {
    fn backward(&self) {
        let Some(grad) = take_grad(&self.result_grad) else {
            return;
        };
        if self.a.requires_grad() {
            self.a.accumulate_grad(grad.clone());
        }
        if self.b.requires_grad() {
            self.b.accumulate_grad(-grad);
        }
        propagate(&self.a);
        propagate(&self.b);
    }
}

/// Multiply two tensors element-wise
pub fn mul(a: &Tensor, b: &Tensor) -> Tensor {
    let data = a.data() * b.data();
    let mut result = Tensor::new(data, tracks(&[a, b]));

    if result.requires_grad() {
        let op = Rc::new(MulBackward {
            a: a.clone(),
            b: b.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(op);
    }

    result
}

struct MulBackward {
    a: Tensor,
    b: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for MulBackward {
    fn backward(&self) {
        let Some(grad) = take_grad(&self.result_grad) else {
            return;
        };
        if self.a.requires_grad() {
            // ∂L/∂a = ∂L/∂out * b
            self.a.accumulate_grad(&grad * self.b.data());
        }
        if self.b.requires_grad() {
            // ∂L/∂b = ∂L/∂out * a
            self.b.accumulate_grad(&grad * self.a.data());
        }
        propagate(&self.a);
        propagate(&self.b);
    }
}

/// Scale tensor by a scalar
pub fn scale(a: &Tensor, factor: f32) -> Tensor {
    let data = a.data() * factor;
    let mut result = Tensor::new(data, tracks(&[a]));

    if result.requires_grad() {
        let op = Rc::new(ScaleBackward {
            a: a.clone(),
            factor,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(op);
    }

    result
}

struct ScaleBackward {
    a: Tensor,
    factor: f32,
    result_grad: GradCell,
}

impl BackwardOp for ScaleBackward {
    fn backward(&self) {
        let Some(grad) = take_grad(&self.result_grad) else {
            return;
        };
        if self.a.requires_grad() {
            self.a.accumulate_grad(grad * self.factor);
        }
        propagate(&self.a);
    }
}

/// ReLU activation: max(0, x)
pub fn relu(a: &Tensor) -> Tensor {
    let data = a.data().mapv(|x| x.max(0.0));
    let mut result = Tensor::new(data, tracks(&[a]));

    if result.requires_grad() {
        let op = Rc::new(ReluBackward {
            a: a.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(op);
    }

    result
}

struct ReluBackward {
    a: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for ReluBackward {
    fn backward(&self) {
        let Some(grad) = take_grad(&self.result_grad) else {
            return;
        };
        if self.a.requires_grad() {
            let mask = self.a.data().mapv(|x| if x > 0.0 { 1.0 } else { 0.0 });
            self.a.accumulate_grad(grad * mask);
        }
        propagate(&self.a);
    }
}

/// Sum of all elements, as a 0-dimensional tensor
pub fn sum(a: &Tensor) -> Tensor {
    reduce(a, 1.0)
}

/// Mean of all elements, as a 0-dimensional tensor
pub fn mean(a: &Tensor) -> Tensor {
    let n = a.len().max(1) as f32;
    reduce(a, 1.0 / n)
}

fn reduce(a: &Tensor, factor: f32) -> Tensor {
    let value = a.data().sum() * factor;
    let mut result = Tensor::new(ArrayD::from_elem(IxDyn(&[]), value), tracks(&[a]));

    if result.requires_grad() {
        let op = Rc::new(ReduceBackward {
            a: a.clone(),
            factor,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(op);
    }

    result
}

struct ReduceBackward {
    a: Tensor,
    factor: f32,
    result_grad: GradCell,
}

impl BackwardOp for ReduceBackward {
    fn backward(&self) {
        let Some(grad) = take_grad(&self.result_grad) else {
            return;
        };
        if self.a.requires_grad() {
            let g = grad.sum() * self.factor;
            self.a
                .accumulate_grad(ArrayD::from_elem(self.a.data().raw_dim(), g));
        }
        propagate(&self.a);
    }
}

/// Matrix product of `a: [m, k]` and `b: [k, n]`
///
/// # Panics
///
/// Panics if either operand is not 2-D or the inner dimensions differ.
pub fn matmul(a: &Tensor, b: &Tensor) -> Tensor {
    let data = matrix(a.data()).dot(&matrix(b.data())).into_dyn();
    let mut result = Tensor::new(data, tracks(&[a, b]));

    if result.requires_grad() {
        let op = Rc::new(MatmulBackward {
            a: a.clone(),
            b: b.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(op);
    }

    result
}

struct MatmulBackward {
    a: Tensor,
    b: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for MatmulBackward {
    fn backward(&self) {
        let Some(grad) = take_grad(&self.result_grad) else {
            return;
        };
        let grad = matrix(&grad);
        if self.a.requires_grad() {
            // ∂L/∂A = ∂L/∂C · Bᵀ
            let grad_a = grad.dot(&matrix(self.b.data()).t());
            self.a.accumulate_grad(grad_a.into_dyn());
        }
        if self.b.requires_grad() {
            // ∂L/∂B = Aᵀ · ∂L/∂C
            let grad_b = matrix(self.a.data()).t().dot(&grad);
            self.b.accumulate_grad(grad_b.into_dyn());
        }
        propagate(&self.a);
        propagate(&self.b);
    }
}

/// Add a `[n]` bias to every row of a `[m, n]` tensor
pub fn add_bias(x: &Tensor, bias: &Tensor) -> Tensor {
    let data = x.data() + bias.data();
    let mut result = Tensor::new(data, tracks(&[x, bias]));

    if result.requires_grad() {
        let op = Rc::new(AddBiasBackward {
            x: x.clone(),
            bias: bias.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(op);
    }

    result
}

struct AddBiasBackward {
    x: Tensor,
    bias: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for AddBiasBackward {
    fn backward(&self) {
        let Some(grad) = take_grad(&self.result_grad) else {
            return;
        };
        if self.bias.requires_grad() {
            self.bias.accumulate_grad(grad.sum_axis(Axis(0)));
        }
        if self.x.requires_grad() {
            self.x.accumulate_grad(grad);
        }
        propagate(&self.x);
        propagate(&self.bias);
    }
}
