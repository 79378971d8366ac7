//! Device placement of batches
//!
//! Tensors in this crate always live in host memory, so placement is a
//! validation hook rather than a copy. A device also decides whether the
//! loader must keep batch order reproducible.

use crate::data::Batch;
use crate::{Error, Result};

/// Where batches are moved before the forward pass
pub trait Device: Send {
    /// Move (or validate) a batch for this device
    fn place(&self, batch: Batch) -> Result<Batch>;

    /// Whether runs on this device must be bitwise reproducible
    fn deterministic(&self) -> bool {
        false
    }

    fn name(&self) -> &str;
}

/// Host CPU
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuDevice {
    deterministic: bool,
}

impl CpuDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }
}

impl Device for CpuDevice {
    fn place(&self, batch: Batch) -> Result<Batch> {
        Ok(batch)
    }

    fn deterministic(&self) -> bool {
        self.deterministic
    }

    fn name(&self) -> &str {
        "cpu"
    }
}

/// Resolve a device by its command-line name
pub fn device_by_name(name: &str, deterministic: bool) -> Result<Box<dyn Device>> {
    match name.to_ascii_lowercase().as_str() {
        "cpu" => Ok(Box::new(CpuDevice::new().with_deterministic(deterministic))),
        _ => Err(Error::UnknownPlugin {
            kind: "device",
            name: name.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn test_cpu_place_is_identity() {
        let batch = Batch::Int(arr1(&[1, 2, 3]));
        let placed = CpuDevice::new().place(batch.clone()).unwrap();
        assert_eq!(placed, batch);
    }

    #[test]
    fn test_device_by_name() {
        let dev = device_by_name("CPU", true).unwrap();
        assert_eq!(dev.name(), "cpu");
        assert!(dev.deterministic());

        let err = device_by_name("cuda:0", false).err().unwrap();
        assert!(matches!(err, Error::UnknownPlugin { kind: "device", .. }));
    }
}
