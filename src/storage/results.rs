//! Test-split prediction dumps

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use serde::Serialize;

use crate::data::Split;
use crate::train::{CallbackAction, CallbackContext, TrainerCallback};
use crate::{Error, Result};

#[derive(Debug, Serialize)]
struct PredictionRow {
    /// Position in test-epoch order
    index: usize,
    shape: Vec<usize>,
    prediction: Vec<f32>,
}

/// Collects the model's test-split predictions and writes them to
/// `{dir}/predictions.jsonl` when the test epoch ends.
///
/// One line per sample, holding the first model output's row for that
/// sample. Only the primary rank writes.
#[derive(Debug)]
pub struct SaveResult {
    dir: PathBuf,
    rows: Vec<PredictionRow>,
}

impl SaveResult {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            rows: Vec::new(),
        }
    }

    pub fn output_path(&self) -> PathBuf {
        self.dir.join("predictions.jsonl")
    }
}

impl TrainerCallback for SaveResult {
    fn on_epoch_begin(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        self.rows.clear();
        Ok(CallbackAction::Continue)
    }

    fn on_batch_forward(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        if ctx.split() != Split::Test || !ctx.is_primary {
            return Ok(CallbackAction::Continue);
        }
        let Some(output) = ctx.batch.and_then(|b| b.predictions).and_then(|p| p.first()) else {
            return Ok(CallbackAction::Continue);
        };
        if output.shape().is_empty() {
            return Ok(CallbackAction::Continue);
        }
        let shape = output.shape().get(1..).unwrap_or_default().to_vec();
        for row in output.data().outer_iter() {
            self.rows.push(PredictionRow {
                index: self.rows.len(),
                shape: shape.clone(),
                prediction: row.iter().copied().collect(),
            });
        }
        Ok(CallbackAction::Continue)
    }

    fn on_epoch_end(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        if ctx.split() != Split::Test || !ctx.is_primary {
            return Ok(CallbackAction::Continue);
        }
        std::fs::create_dir_all(&self.dir)?;
        let path = self.output_path();
        let mut writer = BufWriter::new(File::create(&path)?);
        for row in self.rows.drain(..) {
            serde_json::to_writer(&mut writer, &row)
                .map_err(|e| Error::Serialization(e.to_string()))?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        tracing::info!(path = %path.display(), "test predictions written");
        Ok(CallbackAction::Continue)
    }

    fn name(&self) -> &str {
        "SaveResult"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Batch;
    use crate::nn::Linear;
    use crate::train::{BatchView, TrainerState};
    use crate::Tensor;
    use ndarray::{arr1, arr2};
    use tempfile::TempDir;

    #[test]
    fn test_save_result_writes_one_line_per_sample() {
        let dir = TempDir::new().unwrap();
        let mut cb = SaveResult::new(dir.path().join("results"));
        let model = Linear::new(1, 1);
        let mut state = TrainerState {
            split: Split::Test,
            ..TrainerState::default()
        };
        let inputs = Batch::Seq(vec![]);
        let targets = Batch::Seq(vec![Batch::Int(arr1(&[0, 1]))]);
        let preds = vec![Tensor::new(arr2(&[[0.1, 0.9], [0.7, 0.3]]).into_dyn(), false)];

        let mut ctx = CallbackContext {
            state: &mut state,
            model: &model,
            optimizers: &[],
            batch: Some(BatchView {
                inputs: &inputs,
                targets: &targets,
                predictions: Some(preds.as_slice()),
            }),
            is_primary: true,
        };
        cb.on_epoch_begin(&mut ctx).unwrap();
        cb.on_batch_forward(&mut ctx).unwrap();
        cb.on_batch_forward(&mut ctx).unwrap();
        cb.on_epoch_end(&mut ctx).unwrap();

        let content = std::fs::read_to_string(cb.output_path()).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[3]["index"], 3);
        assert_eq!(lines[1]["shape"], serde_json::json!([2]));
    }

    #[test]
    fn test_save_result_ignores_training() {
        let dir = TempDir::new().unwrap();
        let mut cb = SaveResult::new(dir.path());
        let model = Linear::new(1, 1);
        let mut state = TrainerState::default();
        let mut ctx = CallbackContext {
            state: &mut state,
            model: &model,
            optimizers: &[],
            batch: None,
            is_primary: true,
        };
        cb.on_epoch_end(&mut ctx).unwrap();
        assert!(!cb.output_path().exists());
    }
}
