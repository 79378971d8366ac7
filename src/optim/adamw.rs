//! AdamW optimizer (Adam with decoupled Weight decay)

use super::adam::{adam_update, corrected_lr};
use super::optimizer::Buffers;
use super::{Optimizer, OptimizerState};
use crate::{Result, Tensor};

/// AdamW optimizer
///
/// Standard Adam with L2: θ_t = θ_{t-1} - lr * (m_t / (√v_t + ε) + λ * θ_{t-1})
/// AdamW: θ_t = (1 - lr * λ) * θ_{t-1} - lr * m_t / (√v_t + ε)
pub struct AdamW {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    weight_decay: f32,
    t: u64,
    m: Buffers,
    v: Buffers,
}

impl AdamW {
    /// Create a new AdamW optimizer
    pub fn new(lr: f32, beta1: f32, beta2: f32, epsilon: f32, weight_decay: f32) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            epsilon,
            weight_decay,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    /// Create AdamW with default parameters (weight_decay = 0.01)
    pub fn default_params(lr: f32) -> Self {
        Self::new(lr, 0.9, 0.999, 1e-8, 0.01)
    }
}

impl Optimizer for AdamW {
    fn step(&mut self, params: &mut [&mut Tensor]) {
        self.t += 1;
        let lr_t = corrected_lr(self.lr, self.beta1, self.beta2, self.t);
        let betas = (self.beta1, self.beta2, self.epsilon);
        let weight_decay_factor = 1.0 - self.lr * self.weight_decay;

        for (i, param) in params.iter_mut().enumerate() {
            if let Some(grad) = param.grad() {
                let update = adam_update(&mut self.m, &mut self.v, i, &grad, betas, lr_t);
                // decay applied to the parameter, not the gradient
                let data = param.data_mut();
                *data *= weight_decay_factor;
                *data -= &update;
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
        "adamw"
    }

    fn state(&self) -> OptimizerState {
        OptimizerState::new(self.name(), self.lr, self.t)
            .with_buffers("m", self.m.clone())
            .with_buffers("v", self.v.clone())
    }

    fn load_state(&mut self, mut state: OptimizerState) -> Result<()> {
        state.expect_kind(self.name())?;
        self.lr = state.lr;
        self.t = state.step;
        self.m = state.take_buffers("m");
        self.v = state.take_buffers("v");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_adamw_quadratic_convergence() {
        let mut param = Tensor::from_vec(vec![5.0, -3.0, 2.0], true);
        let mut optimizer = AdamW::default_params(0.1);

        for _ in 0..100 {
            let grad = param.data().mapv(|x| 2.0 * x);
            param.set_grad(grad);
            optimizer.step(&mut [&mut param]);
        }

        for &val in param.data().iter() {
            assert!(val.abs() < 0.5, "Value {} did not converge", val);
        }
    }

    #[test]
    fn test_adamw_decays_with_zero_gradient() {
        let mut param = Tensor::from_vec(vec![1.0], true);
        param.set_grad(ndarray::arr1(&[0.0]).into_dyn());
        let mut optimizer = AdamW::new(0.1, 0.9, 0.999, 1e-8, 0.5);

        optimizer.step(&mut [&mut param]);

        // (1 - 0.1 * 0.5) * 1.0, adaptive term is zero
        assert_abs_diff_eq!(param.data()[[0]], 0.95, epsilon = 1e-6);
    }
}
