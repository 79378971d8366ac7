//! Gradient synchronization for data-parallel training
//!
//! Each rank runs its own trainer over a [`Shard`](crate::data::Shard) of the
//! dataset. After the backward pass the trainer hands the model to a
//! [`GradientSync`], which replaces every parameter gradient with the mean
//! over all ranks. Identical initial parameters plus identical averaged
//! gradients keep the replicas in lockstep.
//!
//! [`ProcessGroup`] implements the all-reduce for ranks running as threads of
//! one process. A failure on any rank (mismatched shapes, a timeout, an
//! explicit [`ProcessGroup::abort`], ranks that disagree on how far they
//! got) poisons the whole group: every pending and future reduction returns
//! [`Error::DistributedSync`].

use crate::nn::Model;
use crate::{Error, Result};
use ndarray::{arr1, ArrayD};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default time a rank waits for its peers before giving up
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Averages gradients across data-parallel ranks
pub trait GradientSync: Send {
    fn rank(&self) -> usize;

    fn world_size(&self) -> usize;

    /// The rank that writes checkpoints and results
    fn is_primary(&self) -> bool {
        self.rank() == 0
    }

    /// Replace every parameter gradient with its cross-rank mean
    fn synchronize(&mut self, model: &mut dyn Model) -> Result<()>;

    /// Check that every rank reports the same `value` for `what`.
    ///
    /// A rank that ran fewer steps or stopped early fails here together
    /// with its peers instead of leaving them waiting on a reduction.
    fn agree(&mut self, _what: &'static str, _value: u64) -> Result<()> {
        Ok(())
    }

    /// Tell the peers this rank failed and will not reach the next reduction
    fn abort(&self, _reason: &str) {}
}

/// Single-process training: nothing to synchronize
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSync;

impl GradientSync for LocalSync {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn synchronize(&mut self, _model: &mut dyn Model) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Reduce {
    Mean,
    Max,
}

#[derive(Default)]
struct ReduceState {
    /// Bumped each time a reduction completes
    generation: u64,
    /// Collective the arrived ranks are in
    kind: Option<&'static str>,
    arrived: usize,
    sums: Option<Vec<ArrayD<f32>>>,
    result: Option<Arc<Vec<ArrayD<f32>>>>,
    aborted: Option<String>,
}

struct Shared {
    world_size: usize,
    timeout: Duration,
    state: Mutex<ReduceState>,
    cv: Condvar,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, ReduceState>> {
        self.state
            .lock()
            .map_err(|_| Error::DistributedSync("process group lock poisoned".into()))
    }

    fn fail(&self, state: &mut ReduceState, reason: String) -> Error {
        tracing::error!(%reason, "aborting process group");
        state.aborted.get_or_insert(reason.clone());
        self.cv.notify_all();
        Error::DistributedSync(reason)
    }
}

/// One rank's handle on an in-process all-reduce group
pub struct ProcessGroup {
    shared: Arc<Shared>,
    rank: usize,
}

impl ProcessGroup {
    /// Create the handles of all `world_size` ranks, index = rank
    pub fn new(world_size: usize) -> Result<Vec<ProcessGroup>> {
        Self::with_timeout(world_size, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(world_size: usize, timeout: Duration) -> Result<Vec<ProcessGroup>> {
        if world_size == 0 {
            return Err(Error::InvalidParameter(
                "process group needs at least one rank".into(),
            ));
        }
        let shared = Arc::new(Shared {
            world_size,
            timeout,
            state: Mutex::new(ReduceState::default()),
            cv: Condvar::new(),
        });
        Ok((0..world_size)
            .map(|rank| ProcessGroup {
                shared: shared.clone(),
                rank,
            })
            .collect())
    }

    /// Abort the group; every rank's next or pending reduction fails
    pub fn abort(&self, reason: impl Into<String>) {
        if let Ok(mut state) = self.shared.state.lock() {
            self.shared.fail(&mut state, reason.into());
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.shared
            .state
            .lock()
            .map_or(true, |state| state.aborted.is_some())
    }

    /// Element-wise mean of `arrays` over all ranks.
    ///
    /// Blocks until every rank has contributed. All ranks must pass the same
    /// number of arrays with matching shapes.
    pub fn all_reduce_mean(&self, arrays: Vec<ArrayD<f32>>) -> Result<Vec<ArrayD<f32>>> {
        self.reduce("gradients", arrays, Reduce::Mean)
    }

    /// Fail the whole group unless every rank passes the same `value`
    pub fn agree(&self, what: &'static str, value: u64) -> Result<()> {
        let v = value as f32;
        let extremes = self.reduce(what, vec![arr1(&[v, -v]).into_dyn()], Reduce::Max)?;
        let (max, min) = (extremes[0][[0]] as u64, (-extremes[0][[1]]) as u64);
        if max != min {
            let reason = format!("ranks disagree on {what}: between {min} and {max}");
            let mut state = self.shared.lock()?;
            return Err(self.shared.fail(&mut state, reason));
        }
        Ok(())
    }

    fn reduce(
        &self,
        kind: &'static str,
        arrays: Vec<ArrayD<f32>>,
        op: Reduce,
    ) -> Result<Vec<ArrayD<f32>>> {
        let shared = &*self.shared;
        let mut state = shared.lock()?;
        if let Some(reason) = &state.aborted {
            return Err(Error::DistributedSync(reason.clone()));
        }
        let generation = state.generation;

        match state.kind {
            None => state.kind = Some(kind),
            Some(current) if current != kind => {
                let reason = format!(
                    "rank {} reached {kind} while peers are in {current}",
                    self.rank
                );
                return Err(shared.fail(&mut state, reason));
            }
            Some(_) => {}
        }

        match state.sums.as_mut() {
            None => state.sums = Some(arrays),
            Some(sums) => {
                if sums.len() != arrays.len() {
                    let reason = format!(
                        "rank {} sent {} tensors, peers sent {}",
                        self.rank,
                        arrays.len(),
                        sums.len()
                    );
                    return Err(shared.fail(&mut state, reason));
                }
                if let Some((i, (s, a))) = sums
                    .iter()
                    .zip(&arrays)
                    .enumerate()
                    .find(|(_, (s, a))| s.shape() != a.shape())
                {
                    let reason = format!(
                        "rank {} tensor {i} has shape {:?}, peers have {:?}",
                        self.rank,
                        a.shape(),
                        s.shape()
                    );
                    return Err(shared.fail(&mut state, reason));
                }
                for (s, a) in sums.iter_mut().zip(&arrays) {
                    match op {
                        Reduce::Mean => *s += a,
                        Reduce::Max => s.zip_mut_with(a, |x, &y| *x = x.max(y)),
                    }
                }
            }
        }
        state.arrived += 1;

        if state.arrived == shared.world_size {
            let n = shared.world_size as f32;
            let reduced: Vec<ArrayD<f32>> = state
                .sums
                .take()
                .unwrap_or_default()
                .into_iter()
                .map(|s| if op == Reduce::Mean { s / n } else { s })
                .collect();
            let reduced = Arc::new(reduced);
            state.result = Some(reduced.clone());
            state.kind = None;
            state.arrived = 0;
            state.generation += 1;
            shared.cv.notify_all();
            return Ok((*reduced).clone());
        }

        let deadline = Instant::now() + shared.timeout;
        while state.generation == generation && state.aborted.is_none() {
            let now = Instant::now();
            if now >= deadline {
                let reason = format!(
                    "rank {} timed out after {:?} waiting for peers",
                    self.rank, shared.timeout
                );
                return Err(shared.fail(&mut state, reason));
            }
            state = shared
                .cv
                .wait_timeout(state, deadline - now)
                .map_err(|_| Error::DistributedSync("process group lock poisoned".into()))?
                .0;
        }

        if let Some(reason) = &state.aborted {
            return Err(Error::DistributedSync(reason.clone()));
        }
        state
            .result
            .as_ref()
            .map(|r| (**r).clone())
            .ok_or_else(|| Error::DistributedSync("reduction finished without a result".into()))
    }
}

impl GradientSync for ProcessGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.shared.world_size
    }

    fn abort(&self, reason: &str) {
        ProcessGroup::abort(self, reason);
    }

    fn agree(&mut self, what: &'static str, value: u64) -> Result<()> {
        if self.shared.world_size == 1 {
            return Ok(());
        }
        ProcessGroup::agree(self, what, value)
    }

    fn synchronize(&mut self, model: &mut dyn Model) -> Result<()> {
        if self.shared.world_size == 1 {
            return Ok(());
        }
        let grads: Vec<ArrayD<f32>> = model
            .named_parameters()
            .iter()
            .map(|(_, p)| p.grad().unwrap_or_else(|| ArrayD::zeros(p.data().raw_dim())))
            .collect();

        let averaged = self.all_reduce_mean(grads)?;

        for ((_, param), grad) in model.named_parameters_mut().into_iter().zip(averaged) {
            param.set_grad(grad);
        }
        Ok(())
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        // a panicking rank would otherwise strand its peers until timeout
        if std::thread::panicking() {
            self.abort(format!("rank {} panicked", self.rank));
        }
    }
}
