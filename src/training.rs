//! Epoch loop over a [`TrainableModel`]: plateau scheduling, best-checkpoint
//! persistence and early stopping.

pub mod history;
pub mod metrics;
#[cfg(feature = "training")]
pub mod ort_trainer;
pub mod scheduler;

pub use history::{EpochMetrics, TrainingHistory, HISTORY_FILE};
pub use metrics::{cross_entropy, pixel_accuracy};
#[cfg(feature = "training")]
pub use ort_trainer::OrtTrainer;
pub use scheduler::ReduceLrOnPlateau;

use std::fs;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use crate::errors::{Result, SegError};
use crate::model::CheckpointMetadata;
use crate::palette::ClassPalette;
use crate::traits::{BatchSource, TrainableModel};

pub const BEST_MODEL_FILE: &str = "best_model.onnx";

#[derive(Debug, Clone)]
pub struct TrainerConfig {
    pub epochs: usize,
    pub learning_rate: f32,
    pub output_dir: PathBuf,
    pub show_progress: bool,
    /// Early stopping is only considered after this (0-based) epoch.
    pub early_stop_after: usize,
    /// Stop when validation loss exceeds `best * early_stop_ratio`.
    pub early_stop_ratio: f32,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            epochs: 50,
            learning_rate: 1e-3,
            output_dir: PathBuf::from("outputs"),
            show_progress: true,
            early_stop_after: 10,
            early_stop_ratio: 1.1,
        }
    }
}

pub struct Trainer<M: TrainableModel> {
    model: M,
    palette: ClassPalette,
    config: TrainerConfig,
    scheduler: ReduceLrOnPlateau,
}

impl<M: TrainableModel> Trainer<M> {
    pub fn new(model: M, palette: ClassPalette, config: TrainerConfig) -> Self {
        Self {
            model,
            palette,
            config,
            scheduler: ReduceLrOnPlateau::default(),
        }
    }

    pub fn with_scheduler(mut self, scheduler: ReduceLrOnPlateau) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn best_model_path(&self) -> PathBuf {
        self.config.output_dir.join(BEST_MODEL_FILE)
    }

    pub fn fit<T, V>(&mut self, train: &mut T, val: &mut V) -> Result<TrainingHistory>
    where
        T: BatchSource,
        V: BatchSource,
    {
        if train.is_empty() || val.is_empty() {
            return Err(SegError::Dataset {
                reason: format!(
                    "empty loader: {} training and {} validation samples",
                    train.len(),
                    val.len()
                ),
            });
        }
        let output_dir = self.config.output_dir.clone();
        fs::create_dir_all(&output_dir)
            .map_err(|e| SegError::file_system(&output_dir, "create output dir", e))?;

        self.model.set_learning_rate(self.config.learning_rate)?;
        let mut history = TrainingHistory::new();
        let mut best_val_loss = f32::INFINITY;
        let mut stopped_early = false;

        info!(
            train_samples = train.len(),
            val_samples = val.len(),
            epochs = self.config.epochs,
            "starting training"
        );

        for epoch in 0..self.config.epochs {
            let learning_rate = self.model.learning_rate();
            let train_bar = self.progress_bar(epoch, train.len())?;
            let (train_loss, train_acc) =
                run_epoch(&mut self.model, train, Phase::Train, train_bar)?;
            let val_bar = self.progress_bar(epoch, val.len())?;
            let (val_loss, val_acc) = run_epoch(&mut self.model, val, Phase::Validate, val_bar)?;

            let next_lr = self.scheduler.step(val_loss, learning_rate);
            if next_lr != learning_rate {
                info!("reducing learning rate to {next_lr:e}");
                self.model.set_learning_rate(next_lr)?;
            }

            history.record(EpochMetrics {
                train_loss,
                train_acc,
                val_loss,
                val_acc,
                learning_rate,
            });
            info!(
                "epoch {}/{}: train loss {train_loss:.4} acc {train_acc:.4}, val loss {val_loss:.4} acc {val_acc:.4}",
                epoch + 1,
                self.config.epochs
            );

            if val_loss < best_val_loss {
                best_val_loss = val_loss;
                history.best_val_loss = Some(val_loss);
                history.best_epoch = Some(epoch);
                self.save_best()?;
            }

            if epoch > self.config.early_stop_after
                && val_loss > self.config.early_stop_ratio * best_val_loss
            {
                info!("early stopping at epoch {}", epoch + 1);
                stopped_early = true;
                break;
            }
        }

        history.finish(stopped_early);
        history.save(&output_dir)?;
        info!(
            "training finished, best val loss {best_val_loss:.4}, curves in {}",
            output_dir.join(HISTORY_FILE).display()
        );
        Ok(history)
    }

    fn save_best(&mut self) -> Result<()> {
        let path = self.best_model_path();
        self.model.save_checkpoint(&path)?;
        CheckpointMetadata::for_palette(&self.palette).write(&path)?;
        info!("saved best model to {}", path.display());
        Ok(())
    }

    fn progress_bar(&self, epoch: usize, samples: usize) -> Result<ProgressBar> {
        if !self.config.show_progress {
            return Ok(ProgressBar::hidden());
        }
        let progress_bar = ProgressBar::new(samples as u64);
        progress_bar.set_style(
            ProgressStyle::with_template(
                "{msg} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec} {eta})",
            )
            .map_err(|e| SegError::Configuration {
                message: format!("progress bar template: {e}"),
            })?
            .progress_chars("#>-"),
        );
        progress_bar.set_message(format!("epoch {}", epoch + 1));
        Ok(progress_bar)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Train,
    Validate,
}

/// Mean batch loss and pixel accuracy over one pass of `source`.
fn run_epoch<M, S>(
    model: &mut M,
    source: &mut S,
    phase: Phase,
    progress_bar: ProgressBar,
) -> Result<(f32, f32)>
where
    M: TrainableModel,
    S: BatchSource,
{
    let plans = source.plan_epoch();
    let mut loss_sum = 0.0_f64;
    let mut correct = 0_usize;
    let mut total = 0_usize;

    for plan in &plans {
        let batch = source.load_batch(plan)?;
        let step = match phase {
            Phase::Train => model.train_step(batch.images.view(), batch.masks.view())?,
            Phase::Validate => model.eval_step(batch.images.view(), batch.masks.view())?,
        };
        let (batch_correct, batch_total) = pixel_accuracy(step.logits.view(), batch.masks.view())?;
        loss_sum += f64::from(step.loss);
        correct += batch_correct;
        total += batch_total;
        progress_bar.inc(batch.len() as u64);
    }
    progress_bar.finish_and_clear();

    let loss = (loss_sum / plans.len().max(1) as f64) as f32;
    let accuracy = correct as f32 / total.max(1) as f32;
    debug!(?phase, loss, accuracy, batches = plans.len(), "epoch pass done");
    Ok((loss, accuracy))
}

/// `<dir>/best_model.onnx` and its metadata sidecar exist.
pub fn has_checkpoint(dir: &Path) -> bool {
    let path = dir.join(BEST_MODEL_FILE);
    path.is_file() && CheckpointMetadata::sidecar_path(&path).is_file()
}
