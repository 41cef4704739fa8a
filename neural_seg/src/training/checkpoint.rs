//! On-disk checkpoints: latest every epoch, plus one per best evaluation.
//!
//! A checkpoint is a directory:
//!
//! - `model.mpk`: student weights
//! - `model_ema.mpk`: teacher weights
//! - `optimizer.mpk`: optimizer moments
//! - `state.json`: [`TrainingState`]
//!
//! `latest/` is replaced atomically from the reader's point of view: the new
//! checkpoint is written to `latest.partial/`, the old one is moved to
//! `latest.old/`, and only then is the partial directory renamed into place.

use std::fs;
use std::path::{Path, PathBuf};

use burn::module::{AutodiffModule, Module};
use burn::optim::Optimizer;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::backend::{AutodiffBackend, Backend};

use super::state::TrainingState;
use crate::error::{NeuralSegError, Result};

const STUDENT_FILE: &str = "model";
const TEACHER_FILE: &str = "model_ema";
const OPTIMIZER_FILE: &str = "optimizer";
const STATE_FILE: &str = "state.json";

const LATEST: &str = "latest";
const LATEST_PARTIAL: &str = "latest.partial";
const LATEST_OLD: &str = "latest.old";

type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

fn recorder_error(err: impl std::fmt::Debug) -> NeuralSegError {
    NeuralSegError::Recorder {
        message: format!("{err:?}"),
    }
}

fn corrupt(path: &Path, reason: impl std::fmt::Debug) -> NeuralSegError {
    NeuralSegError::CheckpointCorrupt {
        path: path.to_path_buf(),
        reason: format!("{reason:?}"),
    }
}

/// Name of the checkpoint written when an evaluation sets a new best.
pub fn best_checkpoint_name(epoch: usize, batch_size: usize, dice: f64, dice_ema: f64) -> String {
    format!("ep{epoch}_bs{batch_size}mdice{dice:.4}_ema{dice_ema:.4}")
}

/// Checkpoint directory layout under one root.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    /// Store rooted at `root`. Nothing is created until the first save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the latest checkpoint.
    pub fn latest_dir(&self) -> PathBuf {
        self.root.join(LATEST)
    }

    /// Write every component of a checkpoint into `dir`.
    pub fn save<B, M, O>(dir: &Path, student: &M, teacher: &M::InnerModule, optimizer: &O, state: &TrainingState) -> Result<()>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        fs::create_dir_all(dir)?;
        let recorder = CheckpointRecorder::new();

        student
            .clone()
            .save_file(dir.join(STUDENT_FILE), &recorder)
            .map_err(recorder_error)?;
        teacher
            .clone()
            .save_file(dir.join(TEACHER_FILE), &recorder)
            .map_err(recorder_error)?;
        Recorder::<B>::record(&recorder, optimizer.to_record(), dir.join(OPTIMIZER_FILE)).map_err(recorder_error)?;

        let json = serde_json::to_string_pretty(state).map_err(recorder_error)?;
        fs::write(dir.join(STATE_FILE), json)?;
        Ok(())
    }

    /// Replace `latest/` with a new checkpoint.
    pub fn save_latest<B, M, O>(&self, student: &M, teacher: &M::InnerModule, optimizer: &O, state: &TrainingState) -> Result<PathBuf>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let partial = self.root.join(LATEST_PARTIAL);
        let latest = self.root.join(LATEST);
        let old = self.root.join(LATEST_OLD);

        if partial.exists() {
            fs::remove_dir_all(&partial)?;
        }
        Self::save::<B, M, O>(&partial, student, teacher, optimizer, state)?;

        if old.exists() {
            fs::remove_dir_all(&old)?;
        }
        if latest.exists() {
            fs::rename(&latest, &old)?;
        }
        fs::rename(&partial, &latest)?;
        if old.exists() {
            fs::remove_dir_all(&old)?;
        }

        log::debug!("saved latest checkpoint (epoch {:?})", state.epoch);
        Ok(latest)
    }

    /// Write a best checkpoint named after its scores.
    pub fn save_best<B, M, O>(
        &self,
        student: &M,
        teacher: &M::InnerModule,
        optimizer: &O,
        state: &TrainingState,
        batch_size: usize,
        scores: (f64, f64),
    ) -> Result<PathBuf>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let epoch = state.epoch.unwrap_or(0);
        let dir = self
            .root
            .join(best_checkpoint_name(epoch, batch_size, scores.0, scores.1));
        Self::save::<B, M, O>(&dir, student, teacher, optimizer, state)?;
        log::info!("saved best checkpoint {}", dir.display());
        Ok(dir)
    }

    /// Locate the latest checkpoint and read its state.
    ///
    /// Falls back to `latest.old/` when a crash interrupted the final rename.
    /// Nothing there is [`NeuralSegError::CheckpointNotFound`]; a directory
    /// whose state cannot be parsed is [`NeuralSegError::CheckpointCorrupt`].
    pub fn load_latest_state(&self) -> Result<(PathBuf, TrainingState)> {
        let dir = [LATEST, LATEST_OLD]
            .iter()
            .map(|name| self.root.join(name))
            .find(|dir| dir.is_dir())
            .ok_or_else(|| NeuralSegError::CheckpointNotFound {
                path: self.latest_dir(),
            })?;
        let state = Self::read_state(&dir)?;
        Ok((dir, state))
    }

    /// Read `state.json` from a checkpoint directory.
    pub fn read_state(dir: &Path) -> Result<TrainingState> {
        let text = fs::read_to_string(dir.join(STATE_FILE)).map_err(|e| corrupt(dir, e))?;
        serde_json::from_str(&text).map_err(|e| corrupt(dir, e))
    }

    /// Load student, teacher and optimizer from a checkpoint directory.
    pub fn restore<B, M, O>(dir: &Path, student: M, teacher: M::InnerModule, optimizer: O, device: &B::Device) -> Result<(M, M::InnerModule, O)>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let recorder = CheckpointRecorder::new();
        let student = student
            .load_file(dir.join(STUDENT_FILE), &recorder, device)
            .map_err(|e| corrupt(dir, e))?;
        let teacher = teacher
            .load_file(dir.join(TEACHER_FILE), &recorder, device)
            .map_err(|e| corrupt(dir, e))?;
        let record = Recorder::<B>::load(&recorder, dir.join(OPTIMIZER_FILE), device).map_err(|e| corrupt(dir, e))?;
        Ok((student, teacher, optimizer.load_record(record)))
    }

    /// Load the student weights of a checkpoint into any module of the same
    /// architecture, e.g. to initialize a teacher.
    pub fn load_student_weights<B, M>(dir: &Path, module: M, device: &B::Device) -> Result<M>
    where
        B: Backend,
        M: Module<B>,
    {
        load_weights(dir, STUDENT_FILE, module, device)
    }

    /// Load the teacher (EMA) weights of a checkpoint.
    pub fn load_teacher_weights<B, M>(dir: &Path, module: M, device: &B::Device) -> Result<M>
    where
        B: Backend,
        M: Module<B>,
    {
        load_weights(dir, TEACHER_FILE, module, device)
    }
}

fn load_weights<B: Backend, M: Module<B>>(dir: &Path, file: &str, module: M, device: &B::Device) -> Result<M> {
    let path = dir.join(file);
    if !path.with_extension("mpk").is_file() {
        return Err(NeuralSegError::CheckpointNotFound { path });
    }
    module
        .load_file(path, &CheckpointRecorder::new(), device)
        .map_err(|e| corrupt(dir, e))
}
