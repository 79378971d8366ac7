//! Backward operation trait

/// Trait for backward pass operations
///
/// An op reads the gradient accumulated on its output, pushes the partial
/// derivatives into its inputs, then recurses into their ops. The recursion
/// assumes every intermediate value feeds exactly one consumer; leaf
/// parameters may be shared freely.
pub trait BackwardOp {
    /// Perform backward pass
    fn backward(&self);
}
