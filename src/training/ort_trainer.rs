use std::path::{Path, PathBuf};

use ndarray::prelude::*;
use ort::memory::Allocator;
use ort::session::builder::SessionBuilder;
use ort::training::Trainer;
use ort::value::TensorRef;
use tracing::info;

use crate::errors::{Result, SegError};
use crate::traits::{StepOutput, TrainableModel};

const ARTIFACTS: [&str; 4] = [
    "checkpoint",
    "training_model.onnx",
    "eval_model.onnx",
    "optimizer_model.onnx",
];
const LOSS_OUTPUT: &str = "loss";
const LOGITS_OUTPUT: &str = "logits";

/// ONNX Runtime training artifacts generated offline for the U-Net graph:
/// `checkpoint`, `training_model.onnx`, `eval_model.onnx` and
/// `optimizer_model.onnx` in one directory. Both graphs output `loss` and
/// `logits`.
pub struct OrtTrainer {
    trainer: Trainer,
    learning_rate: f32,
    artifacts_dir: PathBuf,
}

impl OrtTrainer {
    pub fn from_artifacts(artifacts_dir: &Path) -> Result<Self> {
        for artifact in ARTIFACTS {
            let path = artifacts_dir.join(artifact);
            if !path.exists() {
                return Err(SegError::file_system(
                    &path,
                    "training artifact lookup",
                    std::io::Error::new(std::io::ErrorKind::NotFound, "missing training artifact"),
                ));
            }
        }

        let builder =
            SessionBuilder::new().map_err(|e| SegError::model("session builder init", e))?;
        let trainer =
            Trainer::new_from_artifacts(builder, Allocator::default(), artifacts_dir, None)
                .map_err(|e| {
                    SegError::model(
                        format!("load training artifacts from {}", artifacts_dir.display()),
                        e,
                    )
                })?;
        info!("loaded training artifacts from {}", artifacts_dir.display());

        Ok(Self {
            trainer,
            learning_rate: 0.0,
            artifacts_dir: artifacts_dir.to_path_buf(),
        })
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }
}

fn extract(outputs: &ort::session::SessionOutputs<'_>) -> Result<StepOutput> {
    let loss = outputs[LOSS_OUTPUT]
        .try_extract_array::<f32>()?
        .iter()
        .next()
        .copied()
        .ok_or_else(|| SegError::inference("loss extraction", "empty loss tensor"))?;
    let logits = outputs[LOGITS_OUTPUT]
        .try_extract_array::<f32>()?
        .into_dimensionality::<Ix4>()?
        .to_owned();
    Ok(StepOutput { loss, logits })
}

impl TrainableModel for OrtTrainer {
    fn train_step(
        &mut self,
        images: ArrayView4<f32>,
        masks: ArrayView3<i64>,
    ) -> Result<StepOutput> {
        let images = images.as_standard_layout();
        let masks = masks.as_standard_layout();
        let output = {
            let outputs = self.trainer.step(
                ort::inputs![TensorRef::from_array_view(&images)?],
                ort::inputs![TensorRef::from_array_view(&masks)?],
            )?;
            extract(&outputs)?
        };
        self.trainer.optimizer().step()?;
        self.trainer.optimizer().reset_grad()?;
        Ok(output)
    }

    fn eval_step(&mut self, images: ArrayView4<f32>, masks: ArrayView3<i64>) -> Result<StepOutput> {
        let images = images.as_standard_layout();
        let masks = masks.as_standard_layout();
        let outputs = self.trainer.eval_step(
            ort::inputs![TensorRef::from_array_view(&images)?],
            ort::inputs![TensorRef::from_array_view(&masks)?],
        )?;
        extract(&outputs)
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f32) -> Result<()> {
        self.trainer.optimizer().set_lr(learning_rate)?;
        self.learning_rate = learning_rate;
        Ok(())
    }

    fn save_checkpoint(&mut self, path: &Path) -> Result<()> {
        self.trainer
            .export(path, [LOGITS_OUTPUT])
            .map_err(|e| SegError::model(format!("export {}", path.display()), e))
    }
}
