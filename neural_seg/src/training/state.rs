//! Resumable training progress.

use serde::{Deserialize, Serialize};

/// Counters and best-metric bookkeeping persisted with every checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    /// Last completed epoch, `None` before the first.
    pub epoch: Option<usize>,
    /// Optimizer steps taken so far.
    pub iter_num: usize,
    /// Best mean Dice of the student.
    pub previous_best_1: f64,
    /// Best mean Dice of the teacher.
    pub previous_best_2: f64,
    /// Epoch at which the student reached `previous_best_1`.
    pub best_epoch: usize,
    /// Epoch at which the teacher reached `previous_best_2`.
    pub best_epoch_ema: usize,
    /// Learning rate for the next step.
    pub lr: f64,
}

impl TrainingState {
    /// State of a fresh run.
    pub fn new(initial_best: f64, base_lr: f64) -> Self {
        Self {
            epoch: None,
            iter_num: 0,
            previous_best_1: initial_best,
            previous_best_2: initial_best,
            best_epoch: 0,
            best_epoch_ema: 0,
            lr: base_lr,
        }
    }

    /// First epoch still to run.
    pub fn next_epoch(&self) -> usize {
        self.epoch.map_or(0, |e| e + 1)
    }

    /// Fold in an evaluation of student (`dice_1`) and teacher (`dice_2`).
    ///
    /// Returns whether the epoch is a new best for either model. Ties count
    /// as best, and also move the best epoch.
    pub fn record_evaluation(&mut self, epoch: usize, dice_1: f64, dice_2: f64) -> bool {
        let is_best = dice_1 >= self.previous_best_1 || dice_2 >= self.previous_best_2;

        self.previous_best_1 = dice_1.max(self.previous_best_1);
        self.previous_best_2 = dice_2.max(self.previous_best_2);
        if dice_1 == self.previous_best_1 {
            self.best_epoch = epoch;
        }
        if dice_2 == self.previous_best_2 {
            self.best_epoch_ema = epoch;
        }
        is_best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_epoch() {
        let mut state = TrainingState::new(0.0, 1e-3);
        assert_eq!(state.next_epoch(), 0);
        state.epoch = Some(4);
        assert_eq!(state.next_epoch(), 5);
    }

    #[test]
    fn test_either_model_improving_is_best() {
        let mut state = TrainingState::new(0.5, 1e-3);
        assert!(state.record_evaluation(5, 0.4, 0.6));
        assert_eq!(state.previous_best_1, 0.5);
        assert_eq!(state.previous_best_2, 0.6);
        assert_eq!(state.best_epoch, 0);
        assert_eq!(state.best_epoch_ema, 5);

        assert!(!state.record_evaluation(10, 0.3, 0.3));
    }

    #[test]
    fn test_tie_counts_as_best() {
        let mut state = TrainingState::new(0.0, 1e-3);
        assert!(state.record_evaluation(5, 0.7, 0.7));
        assert!(state.record_evaluation(10, 0.7, 0.1));
        assert_eq!(state.best_epoch, 10);
        assert_eq!(state.best_epoch_ema, 5);
    }

    #[test]
    fn test_json_field_names() {
        let state = TrainingState::new(0.78, 1e-3);
        let json = serde_json::to_value(&state).unwrap();
        for key in [
            "epoch",
            "iter_num",
            "previous_best_1",
            "previous_best_2",
            "best_epoch",
            "best_epoch_ema",
            "lr",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        let back: TrainingState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
