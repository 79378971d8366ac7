//! Data-parallel training with ranks on threads.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ndarray::{arr1, arr2, ArrayD};
use scorch::data::{Dataset, Sample, Shard, VecDataset};
use scorch::distributed::ProcessGroup;
use scorch::nn::Linear;
use scorch::optim::{OptimizerBinding, SGD};
use scorch::train::{
    CallbackAction, CallbackContext, MSELoss, TrainConfig, Trainer, TrainerCallback, TrainerParts,
};
use scorch::Error;

fn dataset(n: usize) -> Arc<dyn Dataset> {
    let samples = (0..n)
        .map(|i| {
            let x = i as f32 / n as f32;
            Sample::pair(
                vec![Sample::from_slice(&[x, 1.0 - x])],
                vec![Sample::from_slice(&[x * x])],
            )
        })
        .collect();
    Arc::new(VecDataset::new(samples))
}

fn parts() -> TrainerParts {
    TrainerParts {
        model: Box::new(Linear::from_weights(arr2(&[[0.1], [-0.2]]), arr1(&[0.0])).unwrap()),
        criterion: Box::new(MSELoss),
        optimizers: vec![OptimizerBinding::all(Box::new(SGD::new(0.1, 0.9)))],
    }
}

fn config() -> TrainConfig {
    TrainConfig::new()
        .with_batch_size(4)
        .with_epochs(3)
        .with_checkpoints(0, "unused")
        .with_silent(true)
}

/// Train one model per rank on its shard and return the final parameters
fn train_ranks(full: Arc<dyn Dataset>, config: TrainConfig) -> Vec<Vec<ArrayD<f32>>> {
    let group = ProcessGroup::with_timeout(2, Duration::from_secs(20)).unwrap();

    let handles: Vec<_> = group
        .into_iter()
        .enumerate()
        .map(|(rank, pg)| {
            let full = full.clone();
            let config = config.clone();
            thread::spawn(move || -> scorch::Result<Vec<ArrayD<f32>>> {
                let shard: Arc<dyn Dataset> = Arc::new(Shard::new(full, rank, 2)?);
                let mut trainer = Trainer::builder(parts(), config)
                    .sync(Box::new(pg))
                    .build()?;
                assert_eq!(trainer.is_primary(), rank == 0);
                trainer.train(&shard)?;
                Ok(trainer
                    .model()
                    .named_parameters()
                    .iter()
                    .map(|(_, p)| p.data().clone())
                    .collect())
            })
        })
        .collect();

    handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect()
}

#[test]
fn ranks_end_with_identical_parameters() {
    let results = train_ranks(dataset(16), config());
    assert_eq!(results[0], results[1]);

    let initial = parts()
        .model
        .named_parameters()
        .iter()
        .map(|(_, p)| p.data().clone())
        .collect::<Vec<_>>();
    assert_ne!(results[0], initial);
}

#[test]
fn failing_rank_aborts_its_peer() {
    let group = ProcessGroup::with_timeout(2, Duration::from_secs(20)).unwrap();

    let handles: Vec<_> = group
        .into_iter()
        .enumerate()
        .map(|(rank, pg)| {
            thread::spawn(move || -> scorch::Result<()> {
                let mut samples: Vec<Sample> = (0..8)
                    .map(|_| {
                        Sample::pair(
                            vec![Sample::from_slice(&[0.5, 0.5])],
                            vec![Sample::from_slice(&[1.0])],
                        )
                    })
                    .collect();
                if rank == 1 {
                    // wrong input width: rank 1 fails in forward
                    samples[0] = Sample::pair(
                        vec![Sample::from_slice(&[0.5, 0.5, 0.5])],
                        vec![Sample::from_slice(&[1.0])],
                    );
                    samples.truncate(1);
                }
                let data: Arc<dyn Dataset> = Arc::new(VecDataset::new(samples));
                let mut trainer = Trainer::builder(parts(), config())
                    .sync(Box::new(pg))
                    .build()?;
                trainer.train(&data).map(|_| ())
            })
        })
        .collect();

    let results: Vec<scorch::Result<()>> =
        handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(matches!(results[0], Err(Error::DistributedSync(_))));
    assert!(matches!(results[1], Err(Error::ShapeMismatch { .. })));
}

#[test]
fn odd_length_dataset_keeps_ranks_in_step() {
    let results = train_ranks(dataset(5), config().with_batch_size(1));
    assert_eq!(results[0], results[1]);
}

/// Stops its rank after the first training batch
struct StopFirstBatch;

impl TrainerCallback for StopFirstBatch {
    fn on_batch_end(&mut self, _ctx: &mut CallbackContext<'_>) -> scorch::Result<CallbackAction> {
        Ok(CallbackAction::Stop)
    }
}

#[test]
fn rank_stopping_alone_fails_every_rank() {
    let full = dataset(8);
    let group = ProcessGroup::with_timeout(2, Duration::from_secs(20)).unwrap();

    let handles: Vec<_> = group
        .into_iter()
        .enumerate()
        .map(|(rank, pg)| {
            let full = full.clone();
            thread::spawn(move || -> scorch::Result<()> {
                let shard: Arc<dyn Dataset> = Arc::new(Shard::new(full, rank, 2)?);
                let mut builder = Trainer::builder(parts(), config().with_batch_size(1))
                    .sync(Box::new(pg));
                if rank == 0 {
                    builder = builder.callback(StopFirstBatch);
                }
                builder.build()?.train(&shard).map(|_| ())
            })
        })
        .collect();

    for handle in handles {
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(Error::DistributedSync(_))), "{result:?}");
    }
}
