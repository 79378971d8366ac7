//! Optimizer bindings: an update rule tied to a subset of model parameters

use super::{Optimizer, OptimizerState};
use crate::{Result, Tensor};

/// Which named parameters an optimizer updates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamGroup {
    All,
    /// Parameters whose name starts with any of the prefixes
    Prefixes(Vec<String>),
}

impl ParamGroup {
    pub fn contains(&self, name: &str) -> bool {
        match self {
            ParamGroup::All => true,
            ParamGroup::Prefixes(prefixes) => prefixes.iter().any(|p| name.starts_with(p.as_str())),
        }
    }
}

/// An optimizer bound to a parameter group.
///
/// Inactive bindings are skipped by the trainer, which lets a model switch
/// between optimizers (e.g. a warm-up rule and a fine-tuning rule) without
/// losing either one's state.
pub struct OptimizerBinding {
    optimizer: Box<dyn Optimizer>,
    group: ParamGroup,
    active: bool,
}

impl OptimizerBinding {
    pub fn new(optimizer: Box<dyn Optimizer>, group: ParamGroup) -> Self {
        Self {
            optimizer,
            group,
            active: true,
        }
    }

    /// Bind to every parameter of the model
    pub fn all(optimizer: Box<dyn Optimizer>) -> Self {
        Self::new(optimizer, ParamGroup::All)
    }

    pub fn group(&self) -> &ParamGroup {
        &self.group
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn optimizer(&self) -> &dyn Optimizer {
        self.optimizer.as_ref()
    }

    pub fn optimizer_mut(&mut self) -> &mut dyn Optimizer {
        self.optimizer.as_mut()
    }

    /// Step the optimizer over the bound subset of `named` parameters
    pub fn step(&mut self, named: Vec<(String, &mut Tensor)>) {
        let mut params: Vec<&mut Tensor> = named
            .into_iter()
            .filter(|(name, _)| self.group.contains(name))
            .map(|(_, t)| t)
            .collect();
        self.optimizer.step(&mut params);
    }

    pub fn state(&self) -> OptimizerState {
        self.optimizer.state()
    }

    pub fn load_state(&mut self, state: OptimizerState) -> Result<()> {
        self.optimizer.load_state(state)
    }
}

impl std::fmt::Debug for OptimizerBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizerBinding")
            .field("optimizer", &self.optimizer.name())
            .field("lr", &self.optimizer.lr())
            .field("group", &self.group)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::SGD;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_group_prefixes() {
        let group = ParamGroup::Prefixes(vec!["head.".into()]);
        assert!(group.contains("head.weight"));
        assert!(!group.contains("body.weight"));
        assert!(ParamGroup::All.contains("anything"));
    }

    #[test]
    fn test_binding_steps_only_its_group() {
        let mut head = Tensor::from_vec(vec![1.0], true);
        let mut body = Tensor::from_vec(vec![1.0], true);
        head.set_grad(ndarray::arr1(&[1.0]).into_dyn());
        body.set_grad(ndarray::arr1(&[1.0]).into_dyn());

        let mut binding = OptimizerBinding::new(
            Box::new(SGD::new(0.5, 0.0)),
            ParamGroup::Prefixes(vec!["head".into()]),
        );
        binding.step(vec![
            ("head.w".to_string(), &mut head),
            ("body.w".to_string(), &mut body),
        ]);

        assert_abs_diff_eq!(head.data()[[0]], 0.5);
        assert_abs_diff_eq!(body.data()[[0]], 1.0);
    }
}
