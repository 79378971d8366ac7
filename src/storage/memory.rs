//! In-Memory Sink Backend
//!
//! Keeps every point in a shared buffer. Clones share the buffer, so a test
//! can hand one clone to the trainer and inspect the other.

use std::sync::{Arc, Mutex};

use super::{MetricPoint, MetricsSink, SinkError};

/// In-memory metrics sink
#[derive(Debug, Clone, Default)]
pub struct InMemorySink {
    points: Arc<Mutex<Vec<MetricPoint>>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all points logged so far
    pub fn points(&self) -> Vec<MetricPoint> {
        self.points.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Points logged under `tag`, in arrival order
    pub fn series(&self, tag: &str) -> Vec<(u64, f64)> {
        self.points()
            .into_iter()
            .filter(|p| p.tag == tag)
            .map(|p| (p.step, p.value))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.points.lock().map_or(0, |p| p.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetricsSink for InMemorySink {
    fn log_scalar(&mut self, tag: &str, step: u64, value: f64) -> Result<(), SinkError> {
        self.points
            .lock()
            .map_err(|_| SinkError::Backend("sink buffer poisoned".into()))?
            .push(MetricPoint::new(tag, step, value));
        Ok(())
    }
}
