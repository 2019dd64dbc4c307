use image::DynamicImage;
use tracing::{info, warn};

use crate::errors::{Result, SegError};
use crate::model::{ModelOptions, OnnxSegmentationModel};
use crate::palette::ClassPalette;
use crate::pipeline::{self, decode_image, PredictionResult};
use crate::traits::SegmentationModel;

/// Palette plus the (optional) loaded network. Shared by every request
/// handler; without a model only health and status queries succeed.
pub struct InferenceService {
    palette: ClassPalette,
    model: Option<Box<dyn SegmentationModel>>,
}

impl std::fmt::Debug for InferenceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceService")
            .field("palette", &self.palette)
            .field("model_loaded", &self.is_loaded())
            .finish()
    }
}

impl InferenceService {
    pub fn new(palette: ClassPalette, model: Option<Box<dyn SegmentationModel>>) -> Result<Self> {
        if let Some(model) = &model {
            if model.num_classes() != palette.len() {
                return Err(SegError::IncompatibleCheckpoint {
                    reason: format!(
                        "model has {} classes, palette has {}",
                        model.num_classes(),
                        palette.len()
                    ),
                });
            }
        }
        Ok(Self { palette, model })
    }

    /// Service in degraded mode.
    pub fn without_model(palette: ClassPalette) -> Self {
        Self { palette, model: None }
    }

    /// Loads the checkpoint; any failure leaves the service running without a model.
    pub fn load(options: &ModelOptions, palette: ClassPalette) -> Self {
        match OnnxSegmentationModel::load(options, &palette) {
            Ok(model) => {
                info!("model ready: {}", options.model_path.display());
                Self {
                    palette,
                    model: Some(Box::new(model)),
                }
            }
            Err(e) => {
                warn!(
                    "could not load model from {}: {e}; serving without predictions",
                    options.model_path.display()
                );
                Self::without_model(palette)
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub fn palette(&self) -> &ClassPalette {
        &self.palette
    }

    /// Decodes and segments an uploaded file. Fails with
    /// [`SegError::ModelUnavailable`] before touching the bytes when no model
    /// is loaded.
    pub fn predict_bytes(&self, bytes: &[u8]) -> Result<PredictionResult> {
        let model = self.model.as_deref().ok_or(SegError::ModelUnavailable)?;
        let image = decode_image(bytes)?;
        pipeline::run(model, &self.palette, image)
    }

    pub fn predict_image(&self, image: DynamicImage) -> Result<PredictionResult> {
        let model = self.model.as_deref().ok_or(SegError::ModelUnavailable)?;
        pipeline::run(model, &self.palette, image)
    }
}
