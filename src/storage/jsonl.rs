//! JSON-lines file sink
//!
//! Each point becomes one line:
//! `{"tag":"train/loss","step":3,"value":0.41,"timestamp":"…"}`.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{MetricPoint, MetricsSink, SinkError};

/// Appends metric points to a file, one JSON object per line
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlSink {
    /// Open `path` for appending, creating it and its parent directories
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricsSink for JsonlSink {
    fn log_scalar(&mut self, tag: &str, step: u64, value: f64) -> Result<(), SinkError> {
        let point = MetricPoint::new(tag, step, value);
        serde_json::to_writer(&mut self.writer, &point)
            .map_err(|e| SinkError::Serialization(e.to_string()))?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

impl Drop for JsonlSink {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            tracing::warn!(path = %self.path.display(), error = %e, "could not flush metrics file");
        }
    }
}
