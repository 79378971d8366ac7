//! Adam optimizer

use super::optimizer::{buffer_slot, Buffers};
use super::{Optimizer, OptimizerState};
use crate::{Result, Tensor};
use ndarray::ArrayD;

/// Adam optimizer (Adaptive Moment Estimation)
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    t: u64,
    m: Buffers, // First moment
    v: Buffers, // Second moment
}

impl Adam {
    /// Create a new Adam optimizer
    pub fn new(lr: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            epsilon,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    /// Create Adam with default parameters
    pub fn default_params(lr: f32) -> Self {
        Self::new(lr, 0.9, 0.999, 1e-8)
    }
}

/// Shared moment update of Adam and AdamW.
///
/// Returns the adaptive step `lr_t * m_t / (√v_t + ε)` for parameter `i`.
pub(super) fn adam_update(
    m: &mut Buffers,
    v: &mut Buffers,
    i: usize,
    grad: &ArrayD<f32>,
    (beta1, beta2, epsilon): (f32, f32, f32),
    lr_t: f32,
) -> ArrayD<f32> {
    // m_t = β1 * m_{t-1} + (1 - β1) * g
    let m_slot = buffer_slot(m, i, grad);
    let m_t = match m_slot.as_ref() {
        Some(m) => m * beta1 + grad * (1.0 - beta1),
        None => grad * (1.0 - beta1),
    };

    // v_t = β2 * v_{t-1} + (1 - β2) * g²
    let grad_sq = grad * grad;
    let v_slot = buffer_slot(v, i, grad);
    let v_t = match v_slot.as_ref() {
        Some(v) => v * beta2 + &grad_sq * (1.0 - beta2),
        None => &grad_sq * (1.0 - beta2),
    };

    let update = &m_t / &(v_t.mapv(f32::sqrt) + epsilon) * lr_t;
    *m_slot = Some(m_t);
    *v_slot = Some(v_t);
    update
}

/// Bias-corrected learning rate for step `t`
pub(super) fn corrected_lr(lr: f32, beta1: f32, beta2: f32, t: u64) -> f32 {
    let t = t.min(i32::MAX as u64) as i32;
    lr * ((1.0 - beta2.powi(t)).sqrt() / (1.0 - beta1.powi(t)))
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [&mut Tensor]) {
        self.t += 1;
        let lr_t = corrected_lr(self.lr, self.beta1, self.beta2, self.t);
        let betas = (self.beta1, self.beta2, self.epsilon);

        for (i, param) in params.iter_mut().enumerate() {
            if let Some(grad) = param.grad() {
                // θ_t = θ_{t-1} - lr_t * m_t / (√v_t + ε)
                let update = adam_update(&mut self.m, &mut self.v, i, &grad, betas, lr_t);
                *param.data_mut() -= &update;
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
        "adam"
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

    #[test]
    fn test_adam_quadratic_convergence() {
        // Test convergence on f(x) = x²
        let mut param = Tensor::from_vec(vec![5.0, -3.0, 2.0], true);
        let mut optimizer = Adam::default_params(0.1);

        for _ in 0..100 {
            // Compute gradient: ∇(x²) = 2x
            let grad = param.data().mapv(|x| 2.0 * x);
            param.set_grad(grad);

            optimizer.step(&mut [&mut param]);
        }

        // Should converge close to 0
        for &val in param.data().iter() {
            assert!(val.abs() < 0.5, "Value {} did not converge", val);
        }
    }

    #[test]
    fn test_adam_resume_matches_uninterrupted_run() {
        let run = |split_at: Option<usize>| {
            let mut param = Tensor::from_vec(vec![1.0, -2.0], true);
            let mut optimizer = Adam::default_params(0.05);
            for step in 0..10 {
                if split_at == Some(step) {
                    let state = optimizer.state();
                    optimizer = Adam::default_params(0.05);
                    optimizer.load_state(state).unwrap();
                }
                param.set_grad(param.data().mapv(|x| 2.0 * x));
                optimizer.step(&mut [&mut param]);
            }
            param.data().clone()
        };

        assert_eq!(run(None), run(Some(4)));
    }

    #[test]
    fn test_adam_state_serializes() {
        let mut param = Tensor::from_vec(vec![1.0], true);
        param.set_grad(ndarray::arr1(&[1.0]).into_dyn());
        let mut optimizer = Adam::default_params(0.01);
        optimizer.step(&mut [&mut param]);

        let json = serde_json::to_string(&optimizer.state()).unwrap();
        let back: OptimizerState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, optimizer.state());
    }
}
