//! Model trait and the reference linear layer

use crate::autograd::{add_bias, matmul};
use crate::data::Batch;
use crate::random;
use crate::{Error, Result, Tensor};
use ndarray::{Array1, Array2};
use rand::Rng;

/// A trainable model.
///
/// `forward` receives the inputs half of a training batch (a sequence batch,
/// one position per model input) and returns one tensor per output.
/// Parameter enumeration order must be stable: checkpoints and optimizer
/// buffers are matched by it.
pub trait Model {
    fn forward(&self, inputs: &Batch) -> Result<Vec<Tensor>>;

    fn named_parameters(&self) -> Vec<(String, &Tensor)>;

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)>;

    fn name(&self) -> &str {
        "model"
    }

    /// Clear the gradients of every parameter
    fn zero_grad(&self) {
        for (_, p) in self.named_parameters() {
            p.zero_grad();
        }
    }

    /// Total number of scalar parameters
    fn num_parameters(&self) -> usize {
        self.named_parameters().iter().map(|(_, p)| p.len()).sum()
    }
}

/// Fully connected layer `y = x·W + b` over the first model input.
///
/// Expects input position 0 to be a `[batch, in_features]` array.
pub struct Linear {
    weight: Tensor,
    bias: Tensor,
    in_features: usize,
    out_features: usize,
}

impl Linear {
    /// Uniform init in `±1/√in_features`, drawn from the seeded init stream
    pub fn new(in_features: usize, out_features: usize) -> Self {
        let bound = 1.0 / (in_features.max(1) as f32).sqrt();
        let mut rng = random::rng_for(random::INIT_STREAM);
        let weight = Array2::from_shape_simple_fn((in_features, out_features), || {
            rng.gen_range(-bound..=bound)
        });
        let bias = Array1::from_shape_simple_fn(out_features, || rng.gen_range(-bound..=bound));
        Self {
            weight: Tensor::new(weight.into_dyn(), true),
            bias: Tensor::new(bias.into_dyn(), true),
            in_features,
            out_features,
        }
    }

    /// Layer with explicit weights; `weight` is `[in, out]`
    pub fn from_weights(weight: Array2<f32>, bias: Array1<f32>) -> Result<Self> {
        let (in_features, out_features) = weight.dim();
        if bias.len() != out_features {
            return Err(Error::ShapeMismatch {
                expected: vec![out_features],
                got: vec![bias.len()],
            });
        }
        Ok(Self {
            weight: Tensor::new(weight.into_dyn(), true),
            bias: Tensor::new(bias.into_dyn(), true),
            in_features,
            out_features,
        })
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> &Tensor {
        &self.bias
    }
}

impl Model for Linear {
    fn forward(&self, inputs: &Batch) -> Result<Vec<Tensor>> {
        let x = inputs.at(0)?.as_array()?;
        let shape = x.shape();
        if shape.len() != 2 || shape[1] != self.in_features {
            return Err(Error::ShapeMismatch {
                expected: vec![shape.first().copied().unwrap_or(0), self.in_features],
                got: shape.to_vec(),
            });
        }
        let x = Tensor::new(x.clone(), false);
        Ok(vec![add_bias(&matmul(&x, &self.weight), &self.bias)])
    }

    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        vec![
            ("weight".to_string(), &self.weight),
            ("bias".to_string(), &self.bias),
        ]
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        vec![
            ("weight".to_string(), &mut self.weight),
            ("bias".to_string(), &mut self.bias),
        ]
    }

    fn name(&self) -> &str {
        "linear"
    }
}
