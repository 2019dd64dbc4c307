use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SegError};

pub const HISTORY_FILE: &str = "training_curves.json";

/// Per-epoch curves of one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub train_losses: Vec<f32>,
    pub val_losses: Vec<f32>,
    pub train_accs: Vec<f32>,
    pub val_accs: Vec<f32>,
    pub learning_rates: Vec<f32>,
    pub best_val_loss: Option<f32>,
    pub best_epoch: Option<usize>,
    pub stopped_early: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for TrainingHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self {
            train_losses: Vec::new(),
            val_losses: Vec::new(),
            train_accs: Vec::new(),
            val_accs: Vec::new(),
            learning_rates: Vec::new(),
            best_val_loss: None,
            best_epoch: None,
            stopped_early: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn epochs(&self) -> usize {
        self.val_losses.len()
    }

    pub fn record(&mut self, epoch: EpochMetrics) {
        self.train_losses.push(epoch.train_loss);
        self.val_losses.push(epoch.val_loss);
        self.train_accs.push(epoch.train_acc);
        self.val_accs.push(epoch.val_acc);
        self.learning_rates.push(epoch.learning_rate);
    }

    pub fn finish(&mut self, stopped_early: bool) {
        self.stopped_early = stopped_early;
        self.finished_at = Some(Utc::now());
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(HISTORY_FILE);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).map_err(|e| SegError::file_system(&path, "history write", e))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .map_err(|e| SegError::file_system(path, "history read", e))?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Aggregates of one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochMetrics {
    pub train_loss: f32,
    pub train_acc: f32,
    pub val_loss: f32,
    pub val_acc: f32,
    /// Rate the epoch was trained with.
    pub learning_rate: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() -> Result<()> {
        let dir = TempDir::new()?;
        let mut history = TrainingHistory::new();
        history.record(EpochMetrics {
            train_loss: 1.5,
            train_acc: 0.4,
            val_loss: 1.25,
            val_acc: 0.5,
            learning_rate: 1e-3,
        });
        history.best_val_loss = Some(1.25);
        history.best_epoch = Some(0);
        history.finish(false);
        history.save(dir.path())?;

        let loaded = TrainingHistory::load(&dir.path().join(HISTORY_FILE))?;
        assert_eq!(loaded, history);
        assert_eq!(loaded.epochs(), 1);
        assert!(loaded.finished_at.is_some());
        Ok(())
    }
}
