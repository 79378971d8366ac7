//! Configuration validation

use super::schema::TrainSpec;

/// Validation error type
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing {0} name")]
    MissingPlugin(&'static str),

    #[error("Checkpoint does not exist: {0}")]
    CheckpointNotFound(String),

    #[error("Invalid learning rate: {0} (must be > 0.0)")]
    InvalidLearningRate(f32),

    #[error("Invalid batch size: {0} (must be > 0)")]
    InvalidBatchSize(usize),

    #[error("Invalid epochs: {0} (must be > 0)")]
    InvalidEpochs(usize),

    #[error("Invalid optimizer: {0} (must be one of: adam, adamw, sgd)")]
    InvalidOptimizer(String),

    #[error("Invalid {0}: 0 (use no cap instead)")]
    ZeroIterationCap(&'static str),

    #[error("new_optimizer requires a checkpoint to resume from")]
    NewOptimizerWithoutCheckpoint,
}

/// Validate a run description
///
/// Checks:
/// - Plugin names are present
/// - The resume checkpoint exists
/// - Numeric values are in valid ranges
/// - Enums match allowed values
pub fn validate_config(spec: &TrainSpec) -> Result<(), ValidationError> {
    if spec.model.name.trim().is_empty() {
        return Err(ValidationError::MissingPlugin("model"));
    }
    if spec.dataset.name.trim().is_empty() {
        return Err(ValidationError::MissingPlugin("dataset"));
    }

    let training = &spec.training;
    match &training.checkpoint {
        Some(path) if !path.exists() => {
            return Err(ValidationError::CheckpointNotFound(
                path.display().to_string(),
            ));
        }
        None if training.new_optimizer => {
            return Err(ValidationError::NewOptimizerWithoutCheckpoint);
        }
        _ => {}
    }

    if training.batch_size == 0 {
        return Err(ValidationError::InvalidBatchSize(training.batch_size));
    }
    if training.epochs == 0 {
        return Err(ValidationError::InvalidEpochs(training.epochs));
    }

    for (name, cap) in [
        ("max_train_iterations", training.max_train_iterations),
        ("max_valid_iterations", training.max_valid_iterations),
        ("max_test_iterations", training.max_test_iterations),
    ] {
        if cap == Some(0) {
            return Err(ValidationError::ZeroIterationCap(name));
        }
    }

    if let Some(optimizer) = &spec.optimizer {
        if optimizer.lr <= 0.0 {
            return Err(ValidationError::InvalidLearningRate(optimizer.lr));
        }
        let valid_optimizers = ["adam", "adamw", "sgd"];
        if !valid_optimizers.contains(&optimizer.name.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidOptimizer(optimizer.name.clone()));
        }
    }

    Ok(())
}
