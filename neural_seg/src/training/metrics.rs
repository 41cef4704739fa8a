//! Per-step outputs, running averages and scalar sinks.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::error::Result;

/// Host-side summary of one optimizer step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StepOutput {
    /// `(loss_x + loss_u) / 2`.
    pub loss: f32,
    /// Supervised loss.
    pub loss_x: f32,
    /// Masked consistency loss.
    pub loss_u: f32,
    /// Fraction of non-ignored unlabeled voxels with a trusted pseudo label.
    pub mask_ratio: f32,
    /// Ramped consistency weight at this step.
    pub consistency_weight: f64,
    /// Learning rate the step was taken with.
    pub lr: f64,
    /// The unlabeled batch was entirely ignored.
    pub skipped: bool,
}

/// Running mean of a scalar.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningMean {
    sum: f64,
    count: usize,
}

impl RunningMean {
    /// Add one value.
    pub fn update(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    /// Mean so far, 0 when empty.
    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Number of values.
    pub fn count(&self) -> usize {
        self.count
    }
}

/// Running means over one epoch.
#[derive(Debug, Clone, Default)]
pub struct EpochMeters {
    /// Total loss.
    pub loss: RunningMean,
    /// Supervised loss.
    pub loss_x: RunningMean,
    /// Consistency loss.
    pub loss_u: RunningMean,
    /// Mask ratio.
    pub mask_ratio: RunningMean,
}

impl EpochMeters {
    /// Fold in one step.
    pub fn update(&mut self, step: &StepOutput) {
        self.loss.update(step.loss as f64);
        self.loss_x.update(step.loss_x as f64);
        self.loss_u.update(step.loss_u as f64);
        self.mask_ratio.update(step.mask_ratio as f64);
    }
}

/// Destination for tagged scalar series.
pub trait ScalarSink {
    /// Record `value` for `tag` at `step`.
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()>;

    /// Flush buffered output.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes scalars to the `log` facade at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogScalarSink;

impl ScalarSink for LogScalarSink {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        log::debug!("{tag} = {value:.6} @ {step}");
        Ok(())
    }
}

#[derive(Serialize)]
struct ScalarRecord<'a> {
    tag: &'a str,
    value: f64,
    step: usize,
}

/// Appends one JSON object per scalar to a file.
#[derive(Debug)]
pub struct JsonlScalarSink {
    writer: BufWriter<File>,
}

impl JsonlScalarSink {
    /// Create (or truncate) the output file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
        })
    }
}

impl ScalarSink for JsonlScalarSink {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        let line = serde_json::to_string(&ScalarRecord { tag, value, step })
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writeln!(self.writer, "{line}")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_mean() {
        let mut mean = RunningMean::default();
        assert_eq!(mean.avg(), 0.0);
        mean.update(1.0);
        mean.update(3.0);
        assert_eq!(mean.avg(), 2.0);
        assert_eq!(mean.count(), 2);
    }

    #[test]
    fn test_jsonl_sink_writes_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs/scalars.jsonl");
        let mut sink = JsonlScalarSink::create(&path).unwrap();
        sink.add_scalar("train/loss_all", 0.5, 1).unwrap();
        sink.add_scalar("train/lr", 1e-3, 1).unwrap();
        sink.flush().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["tag"], "train/loss_all");
        assert_eq!(lines[1]["step"], 1);
    }
}
