//! Loss functions for training
//!
//! A criterion maps the model's outputs and the targets half of a batch to a
//! scalar loss. Only the first output and the first target position are used
//! by the reference losses.

use crate::autograd::{is_grad_enabled, propagate, BackwardOp, GradCell};
use crate::data::Batch;
use crate::{Error, Result, Tensor};
use ndarray::{ArrayD, Axis, Ix2, IxDyn};
use std::rc::Rc;

/// Trait for loss functions
pub trait LossFn {
    /// Compute the scalar loss and record its backward op
    fn forward(&self, predictions: &[Tensor], targets: &Batch) -> Result<Tensor>;

    /// Name of the loss function
    fn name(&self) -> &str;
}

/// Backward op shared by the reference losses: the gradient with respect to
/// the predictions is computed in the forward pass and scaled by the incoming
/// loss gradient.
struct PrecomputedBackward {
    predictions: Tensor,
    grad: ArrayD<f32>,
    loss_grad: GradCell,
}

impl BackwardOp for PrecomputedBackward {
    fn backward(&self) {
        let scale = self.loss_grad.borrow().as_ref().map_or(1.0, |g| g.sum());
        self.predictions.accumulate_grad(&self.grad * scale);
        propagate(&self.predictions);
    }
}

fn scalar_loss(value: f32, predictions: &Tensor, grad: ArrayD<f32>) -> Tensor {
    let tracked = predictions.requires_grad() && is_grad_enabled();
    let mut loss = Tensor::new(ArrayD::from_elem(IxDyn(&[]), value), tracked);
    if tracked {
        let op = Rc::new(PrecomputedBackward {
            predictions: predictions.clone(),
            grad,
            loss_grad: loss.grad_cell(),
        });
        loss.set_backward_op(op);
    }
    loss
}

fn first_output(predictions: &[Tensor]) -> Result<&Tensor> {
    predictions
        .first()
        .ok_or_else(|| Error::InvalidParameter("model produced no outputs".into()))
}

/// Mean Squared Error Loss
///
/// L = mean((predictions - targets)²)
pub struct MSELoss;

impl LossFn for MSELoss {
    fn forward(&self, predictions: &[Tensor], targets: &Batch) -> Result<Tensor> {
        let pred = first_output(predictions)?;
        let target = targets.at(0)?.as_array()?;
        if pred.shape() != target.shape() {
            return Err(Error::ShapeMismatch {
                expected: pred.shape().to_vec(),
                got: target.shape().to_vec(),
            });
        }

        let diff = pred.data() - target;
        let n = pred.len().max(1) as f32;
        let mse = diff.mapv(|d| d * d).sum() / n;

        // d(MSE)/d(pred) = 2 * (pred - target) / n
        let grad = diff * (2.0 / n);
        Ok(scalar_loss(mse, pred, grad))
    }

    fn name(&self) -> &str {
        "MSE"
    }
}

/// Cross Entropy Loss over integer class labels
///
/// L = mean over rows of -log(softmax(logits)[label])
pub struct CrossEntropyLoss;

impl CrossEntropyLoss {
    /// Row-wise softmax of `[batch, classes]` logits
    fn softmax(logits: &ArrayD<f32>) -> Result<ndarray::Array2<f32>> {
        let logits = logits
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|_| Error::ShapeMismatch {
                expected: vec![0, 0],
                got: logits.shape().to_vec(),
            })?;
        let mut probs = logits.to_owned();
        for mut row in probs.axis_iter_mut(Axis(0)) {
            let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row /= sum;
        }
        Ok(probs)
    }
}

impl LossFn for CrossEntropyLoss {
    fn forward(&self, predictions: &[Tensor], targets: &Batch) -> Result<Tensor> {
        let logits = first_output(predictions)?;
        let labels = targets.at(0)?.as_int()?;
        let mut probs = Self::softmax(logits.data())?;
        let (rows, classes) = probs.dim();
        if labels.len() != rows {
            return Err(Error::ShapeMismatch {
                expected: vec![rows],
                got: vec![labels.len()],
            });
        }

        let mut total = 0.0;
        for (i, &label) in labels.iter().enumerate() {
            let class = usize::try_from(label)
                .ok()
                .filter(|&c| c < classes)
                .ok_or_else(|| {
                    Error::InvalidParameter(format!("label {label} outside 0..{classes}"))
                })?;
            total -= (probs[[i, class]] + 1e-10).ln();
            // d(CE)/d(logits) = probs - onehot
            probs[[i, class]] -= 1.0;
        }

        let n = rows.max(1) as f32;
        let grad = (probs / n).into_dyn();
        Ok(scalar_loss(total / n, logits, grad))
    }

    fn name(&self) -> &str {
        "CrossEntropy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::backward;
    use approx::assert_relative_eq;
    use ndarray::{arr1, arr2};

    fn array_targets(t: ArrayD<f32>) -> Batch {
        Batch::Seq(vec![Batch::Array(t)])
    }

    #[test]
    fn test_mse_loss_basic() {
        let pred = Tensor::from_vec(vec![1.0, 2.0, 3.0], true);
        let target = array_targets(arr1(&[1.5, 2.5, 3.5]).into_dyn());

        let loss = MSELoss.forward(&[pred], &target).unwrap();

        // MSE = mean((0.5, 0.5, 0.5)^2) = 0.25
        assert_relative_eq!(loss.item(), 0.25, epsilon = 1e-5);
    }

    #[test]
    fn test_mse_gradient() {
        let pred = Tensor::from_vec(vec![1.0, 2.0, 3.0], true);
        let target = array_targets(arr1(&[0.0, 0.0, 0.0]).into_dyn());

        let loss = MSELoss.forward(&[pred.clone()], &target).unwrap();
        backward(&loss, None);

        // d(MSE)/d(pred) = 2*(pred - target)/n
        let grad = pred.grad().unwrap();
        assert_relative_eq!(grad[[0]], 2.0 / 3.0, epsilon = 1e-5);
        assert_relative_eq!(grad[[1]], 4.0 / 3.0, epsilon = 1e-5);
        assert_relative_eq!(grad[[2]], 6.0 / 3.0, epsilon = 1e-5);
    }

    #[test]
    fn test_mse_shape_mismatch_is_an_error() {
        let pred = Tensor::from_vec(vec![1.0, 2.0], true);
        let target = array_targets(arr1(&[1.0, 2.0, 3.0]).into_dyn());
        assert!(matches!(
            MSELoss.forward(&[pred], &target),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_cross_entropy_gradient_rows_sum_to_zero() {
        let logits = Tensor::new(arr2(&[[2.0, 1.0, 0.5], [0.0, 0.0, 3.0]]).into_dyn(), true);
        let targets = Batch::Seq(vec![Batch::Int(arr1(&[0, 2]))]);

        let loss = CrossEntropyLoss.forward(&[logits.clone()], &targets).unwrap();
        assert!(loss.item() > 0.0 && loss.item().is_finite());

        backward(&loss, None);
        let grad = logits.grad().unwrap();
        for row in grad.axis_iter(Axis(0)) {
            assert_relative_eq!(row.sum(), 0.0, epsilon = 1e-5);
        }
        assert!(grad[[0, 0]] < 0.0);
    }

    #[test]
    fn test_cross_entropy_rejects_bad_label() {
        let logits = Tensor::new(arr2(&[[1.0, 2.0]]).into_dyn(), true);
        let targets = Batch::Seq(vec![Batch::Int(arr1(&[5]))]);
        assert!(CrossEntropyLoss.forward(&[logits], &targets).is_err());
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let x = arr2(&[[1.0, 2.0, 3.0], [0.0, 0.0, 0.0]]).into_dyn();
        let probs = CrossEntropyLoss::softmax(&x).unwrap();
        for row in probs.axis_iter(Axis(0)) {
            assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-5);
            assert!(row.iter().all(|&p| (0.0..=1.0).contains(&p)));
        }
    }

    #[test]
    fn test_loss_under_no_grad_is_untracked() {
        let pred = Tensor::from_vec(vec![1.0], true);
        let target = array_targets(arr1(&[0.0]).into_dyn());
        let _guard = crate::autograd::no_grad();
        let loss = MSELoss.forward(&[pred], &target).unwrap();
        assert!(loss.backward_op().is_none());
    }
}
