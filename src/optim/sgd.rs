//! Stochastic Gradient Descent optimizer

use super::optimizer::{buffer_slot, Buffers};
use super::{Optimizer, OptimizerState};
use crate::{Result, Tensor};

/// SGD optimizer with optional momentum
pub struct SGD {
    lr: f32,
    momentum: f32,
    steps: u64,
    velocities: Buffers,
}

impl SGD {
    /// Create a new SGD optimizer
    pub fn new(lr: f32, momentum: f32) -> Self {
        Self {
            lr,
            momentum,
            steps: 0,
            velocities: Vec::new(),
        }
    }

    pub fn momentum(&self) -> f32 {
        self.momentum
    }
}

impl Optimizer for SGD {
    fn step(&mut self, params: &mut [&mut Tensor]) {
        self.steps += 1;

        for (i, param) in params.iter_mut().enumerate() {
            let Some(grad) = param.grad() else {
                continue;
            };
            if self.momentum > 0.0 {
                // v = momentum * v - lr * grad
                let slot = buffer_slot(&mut self.velocities, i, &grad);
                let velocity = match slot.as_ref() {
                    Some(v) => v * self.momentum - &grad * self.lr,
                    None => &grad * (-self.lr),
                };

                *param.data_mut() += &velocity;
                *slot = Some(velocity);
            } else {
                // Simple SGD: param -= lr * grad
                *param.data_mut() -= &(&grad * self.lr);
            }
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn name(&self) -> &'static str {
        "sgd"
    }

    fn state(&self) -> OptimizerState {
        OptimizerState::new(self.name(), self.lr, self.steps)
            .with_buffers("velocity", self.velocities.clone())
    }

    fn load_state(&mut self, mut state: OptimizerState) -> Result<()> {
        state.expect_kind(self.name())?;
        self.lr = state.lr;
        self.steps = state.step;
        self.velocities = state.take_buffers("velocity");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_sgd_plain_step() {
        let mut p = Tensor::from_vec(vec![1.0, 2.0], true);
        p.set_grad(ndarray::arr1(&[0.5, -1.0]).into_dyn());

        let mut sgd = SGD::new(0.1, 0.0);
        sgd.step(&mut [&mut p]);

        assert_abs_diff_eq!(p.data()[[0]], 0.95);
        assert_abs_diff_eq!(p.data()[[1]], 2.1);
    }

    #[test]
    fn test_sgd_skips_params_without_grad() {
        let mut p = Tensor::from_vec(vec![1.0], true);
        let mut sgd = SGD::new(0.1, 0.9);
        sgd.step(&mut [&mut p]);
        assert_abs_diff_eq!(p.data()[[0]], 1.0);
    }

    #[test]
    fn test_sgd_momentum_quadratic_convergence() {
        let mut p = Tensor::from_vec(vec![5.0, -3.0], true);
        let mut sgd = SGD::new(0.05, 0.9);

        for _ in 0..200 {
            // ∇(x²) = 2x
            let grad = p.data().mapv(|x| 2.0 * x);
            p.set_grad(grad);
            sgd.step(&mut [&mut p]);
        }

        for &val in p.data().iter() {
            assert!(val.abs() < 0.1, "Value {} did not converge", val);
        }
    }

    #[test]
    fn test_sgd_state_round_trip() {
        let mut p = Tensor::from_vec(vec![1.0, 1.0], true);
        p.set_grad(ndarray::arr1(&[1.0, 1.0]).into_dyn());
        let mut sgd = SGD::new(0.1, 0.5);
        sgd.step(&mut [&mut p]);

        let state = sgd.state();
        assert_eq!(state.kind, "sgd");
        assert_eq!(state.step, 1);

        let mut fresh = SGD::new(0.3, 0.5);
        fresh.load_state(state.clone()).unwrap();
        assert_eq!(fresh.state(), state);
    }

    #[test]
    fn test_sgd_rejects_foreign_state() {
        let mut sgd = SGD::new(0.1, 0.0);
        let state = OptimizerState::new("adam", 0.1, 3);
        assert!(sgd.load_state(state).is_err());
    }
}
