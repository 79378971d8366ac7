//! Checkpoint round trips through the trainer.

use std::sync::Arc;

use approx::assert_abs_diff_eq;
use ndarray::{arr1, arr2, ArrayD};
use scorch::checkpoint::{checkpoint_path, Checkpoint, MakeCheckpoints};
use scorch::data::{Dataset, Sample, Split, VecDataset};
use scorch::nn::Linear;
use scorch::optim::{Adam, OptimizerBinding};
use scorch::train::{
    CallbackAction, CallbackContext, MSELoss, TrainConfig, Trainer, TrainerCallback, TrainerParts,
};
use scorch::Error;
use tempfile::TempDir;

fn dataset() -> Arc<dyn Dataset> {
    let samples = (0..12)
        .map(|i| {
            let x = i as f32 / 12.0;
            Sample::pair(
                vec![Sample::from_slice(&[x])],
                vec![Sample::from_slice(&[3.0 * x + 0.5])],
            )
        })
        .collect();
    Arc::new(VecDataset::new(samples))
}

fn parts() -> TrainerParts {
    TrainerParts {
        model: Box::new(Linear::from_weights(arr2(&[[0.0]]), arr1(&[0.0])).unwrap()),
        criterion: Box::new(MSELoss),
        optimizers: vec![OptimizerBinding::all(Box::new(Adam::default_params(0.05)))],
    }
}

fn params(trainer: &Trainer) -> Vec<ArrayD<f32>> {
    trainer
        .model()
        .named_parameters()
        .iter()
        .map(|(_, p)| p.data().clone())
        .collect()
}

#[test]
fn resumed_run_matches_uninterrupted_run() {
    let dir = TempDir::new().unwrap();
    let prefix = dir.path().join("run");
    let config = TrainConfig::new()
        .with_batch_size(5)
        .with_epochs(4)
        .with_seed(3)
        .with_checkpoints(1, &prefix);
    let data = dataset();

    let mut full = Trainer::new(parts(), config.clone()).unwrap();
    full.train(&data).unwrap();

    let mut first = Trainer::new(parts(), config.clone().with_epochs(2)).unwrap();
    first.train(&data).unwrap();

    let mut resumed = Trainer::new(parts(), config).unwrap();
    resumed
        .load_checkpoint(checkpoint_path(&prefix, 2), false)
        .unwrap();
    let result = resumed.train(&data).unwrap();

    assert_eq!(result.final_epoch, 4);
    assert_eq!(resumed.state().global_step, full.state().global_step);
    for (a, b) in params(&resumed).iter().zip(params(&full).iter()) {
        for (x, y) in a.iter().zip(b.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-6);
        }
    }
}

#[test]
fn checkpoint_file_holds_model_and_counters() {
    let dir = TempDir::new().unwrap();
    let prefix = dir.path().join("ckpt");
    let config = TrainConfig::new()
        .with_batch_size(4)
        .with_epochs(1)
        .with_checkpoints(1, &prefix);
    let mut trainer = Trainer::new(parts(), config).unwrap();
    trainer.train(&dataset()).unwrap();

    let checkpoint = Checkpoint::load(checkpoint_path(&prefix, "latest")).unwrap();
    assert_eq!(checkpoint.epoch, 1);
    assert_eq!(checkpoint.global_step, 3);
    assert_eq!(checkpoint.model.len(), 2);
    assert_eq!(checkpoint.optimizers.len(), 1);
    assert!(!prefix.with_file_name("ckpt_latest.json.tmp").exists());
}

#[test]
fn shape_mismatch_leaves_model_untouched() {
    let dir = TempDir::new().unwrap();
    let prefix = dir.path().join("wide");
    let wide = TrainerParts {
        model: Box::new(Linear::new(3, 2)),
        criterion: Box::new(MSELoss),
        optimizers: vec![OptimizerBinding::all(Box::new(Adam::default_params(0.05)))],
    };
    let config = TrainConfig::new().with_checkpoints(1, &prefix);
    let path = Trainer::new(wide, config.clone())
        .unwrap()
        .save_checkpoint("latest")
        .unwrap();

    let mut narrow = Trainer::new(parts(), config).unwrap();
    let before = params(&narrow);
    let err = narrow.load_checkpoint(&path, true).unwrap_err();

    assert!(matches!(err, Error::CheckpointLoad { .. }));
    assert_eq!(params(&narrow), before);
    assert_eq!(narrow.state().epoch, 0);
}

#[test]
fn corrupt_checkpoint_is_a_load_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken_latest.json");
    std::fs::write(&path, "{\"format_version\": 1, \"epoch\": ").unwrap();

    let mut trainer = Trainer::new(parts(), TrainConfig::new()).unwrap();
    let err = trainer.load_checkpoint(&path, false).unwrap_err();
    assert!(matches!(err, Error::CheckpointLoad { .. }));
}

/// Reports a fixed `main` validation metric
struct FixedMain(f32);

impl TrainerCallback for FixedMain {
    fn on_epoch_end(&mut self, ctx: &mut CallbackContext<'_>) -> scorch::Result<CallbackAction> {
        if ctx.split() == Split::Valid {
            ctx.state.val_metrics.insert("main".into(), self.0);
        }
        Ok(CallbackAction::Continue)
    }
}

#[test]
fn resumed_run_keeps_better_best_checkpoint() {
    let dir = TempDir::new().unwrap();
    let prefix = dir.path().join("run");
    let best = checkpoint_path(&prefix, "best");
    let data: Arc<dyn Dataset> = {
        let samples = |n: usize| {
            (0..n)
                .map(|i| {
                    let x = i as f32;
                    Sample::pair(vec![Sample::from_slice(&[x])], vec![Sample::from_slice(&[x])])
                })
                .collect::<Vec<_>>()
        };
        Arc::new(VecDataset::new(samples(8)).with_valid(samples(4)))
    };
    let config = TrainConfig::new()
        .with_batch_size(4)
        .with_epochs(1)
        .with_checkpoints(1, &prefix);

    let mut first = Trainer::builder(parts(), config.clone())
        .callback(FixedMain(0.9))
        .callback(MakeCheckpoints::new(&prefix))
        .build()
        .unwrap();
    first.train(&data).unwrap();
    assert_eq!(Checkpoint::load(&best).unwrap().epoch, 1);

    let mut resumed = Trainer::builder(parts(), config.with_epochs(2))
        .callback(FixedMain(0.5))
        .callback(MakeCheckpoints::new(&prefix))
        .build()
        .unwrap();
    resumed
        .load_checkpoint(checkpoint_path(&prefix, "latest"), false)
        .unwrap();
    resumed.train(&data).unwrap();

    let kept = Checkpoint::load(&best).unwrap();
    assert_eq!(kept.epoch, 1);
    assert_eq!(kept.val_metrics.get("main"), Some(&0.9));
}
