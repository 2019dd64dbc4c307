use std::fs;
use std::path::{Path, PathBuf};

use crate::{
    errors::{Result, SegError},
    palette::ClassPalette,
    traits::SegmentationModel,
    MODEL_IMAGE_SIZE,
};
use ndarray::prelude::*;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const DEFAULT_MODEL_PATH: &str = "models/deforestation_model.onnx";
pub const DEFAULT_INPUT_NAME: &str = "input";
pub const DEFAULT_OUTPUT_NAME: &str = "logits";

fn default_input_name() -> String {
    DEFAULT_INPUT_NAME.to_string()
}

fn default_output_name() -> String {
    DEFAULT_OUTPUT_NAME.to_string()
}

/// Architecture the weights were trained with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub encoder_name: String,
    pub encoder_weights: Option<String>,
    pub in_channels: u32,
    pub classes: usize,
}

impl ModelConfig {
    pub fn unet_resnet34(classes: usize) -> Self {
        Self {
            encoder_name: "resnet34".to_string(),
            encoder_weights: Some("imagenet".to_string()),
            in_channels: 3,
            classes,
        }
    }
}

/// JSON sidecar stored next to an ONNX checkpoint (`<stem>.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub classes: Vec<String>,
    pub num_classes: usize,
    pub model_config: ModelConfig,
    #[serde(default = "default_input_name")]
    pub input_name: String,
    #[serde(default = "default_output_name")]
    pub output_name: String,
}

impl CheckpointMetadata {
    pub fn for_palette(palette: &ClassPalette) -> Self {
        Self {
            classes: palette.names(),
            num_classes: palette.len(),
            model_config: ModelConfig::unet_resnet34(palette.len()),
            input_name: default_input_name(),
            output_name: default_output_name(),
        }
    }

    pub fn sidecar_path(model_path: &Path) -> PathBuf {
        model_path.with_extension("json")
    }

    /// `Ok(None)` when the checkpoint has no sidecar.
    pub fn read(model_path: &Path) -> Result<Option<Self>> {
        let path = Self::sidecar_path(model_path);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)
            .map_err(|e| SegError::file_system(&path, "checkpoint metadata read", e))?;
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| SegError::IncompatibleCheckpoint {
                reason: format!("malformed metadata {}: {e}", path.display()),
            })
    }

    pub fn write(&self, model_path: &Path) -> Result<()> {
        let path = Self::sidecar_path(model_path);
        let text = serde_json::to_string_pretty(self)?;
        fs::write(&path, text)
            .map_err(|e| SegError::file_system(&path, "checkpoint metadata write", e))
    }

    /// The checkpoint must produce exactly the palette's classes, in order.
    pub fn check_compatible(&self, palette: &ClassPalette) -> Result<()> {
        let incompatible = |reason: String| Err(SegError::IncompatibleCheckpoint { reason });

        if self.num_classes != palette.len() || self.model_config.classes != palette.len() {
            return incompatible(format!(
                "checkpoint has {} classes (model_config: {}), palette has {}",
                self.num_classes,
                self.model_config.classes,
                palette.len()
            ));
        }
        if self.classes != palette.names() {
            return incompatible(format!(
                "class order {:?} does not match palette {:?}",
                self.classes,
                palette.names()
            ));
        }
        if self.model_config.in_channels != 3 {
            return incompatible(format!(
                "expected 3 input channels, checkpoint declares {}",
                self.model_config.in_channels
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ModelOptions {
    pub model_path: PathBuf,
    /// GPU device for the TensorRT/CUDA providers; CPU when unset or unavailable.
    pub device_id: Option<i32>,
    pub num_threads: Option<usize>,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            device_id: None,
            num_threads: None,
        }
    }
}

/// ONNX Runtime session for the segmentation network.
pub struct OnnxSegmentationModel {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    num_classes: usize,
    image_size: u32,
}

impl std::fmt::Debug for OnnxSegmentationModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxSegmentationModel")
            .field("input_name", &self.input_name)
            .field("output_name", &self.output_name)
            .field("num_classes", &self.num_classes)
            .field("image_size", &self.image_size)
            .finish_non_exhaustive()
    }
}

impl OnnxSegmentationModel {
    pub fn load(options: &ModelOptions, palette: &ClassPalette) -> Result<Self> {
        let model_path = &options.model_path;
        if !model_path.is_file() {
            return Err(SegError::file_system(
                model_path,
                "checkpoint lookup",
                std::io::Error::new(std::io::ErrorKind::NotFound, "checkpoint not found"),
            ));
        }

        let metadata = match CheckpointMetadata::read(model_path)? {
            Some(metadata) => metadata,
            None => {
                debug!(
                    "no checkpoint metadata next to {}, assuming palette order",
                    model_path.display()
                );
                CheckpointMetadata::for_palette(palette)
            }
        };
        metadata.check_compatible(palette)?;

        let mut builder = SessionBuilder::new()
            .map_err(|e| SegError::model("session builder init", e))?
            .with_memory_pattern(true)
            .map_err(|e| SegError::model("memory pattern", e))?;
        if let Some(device_id) = options.device_id {
            builder = builder
                .with_execution_providers([
                    TensorRTExecutionProvider::default()
                        .with_device_id(device_id)
                        .build(),
                    CUDAExecutionProvider::default()
                        .with_device_id(device_id)
                        .build(),
                ])
                .map_err(|e| SegError::model("execution providers", e))?;
        }
        if let Some(threads) = options.num_threads {
            builder = builder
                .with_intra_threads(threads)
                .map_err(|e| SegError::model("intra-op threads", e))?;
        }
        let session = builder
            .commit_from_file(model_path)
            .map_err(|e| SegError::model(format!("load {}", model_path.display()), e))?;

        let model = Self {
            session: Mutex::new(session),
            input_name: metadata.input_name,
            output_name: metadata.output_name,
            num_classes: metadata.num_classes,
            image_size: MODEL_IMAGE_SIZE,
        };
        model.warm_up()?;

        info!(
            classes = model.num_classes,
            encoder = %metadata.model_config.encoder_name,
            "loaded segmentation model from {}",
            model_path.display()
        );
        Ok(model)
    }

    /// Zero-tensor forward pass; also checks the output shape.
    fn warm_up(&self) -> Result<()> {
        let size = self.image_size as usize;
        let data = Array4::<f32>::zeros((1, 3, size, size));
        let logits = self.run(data.view())?;
        let expected = [1, self.num_classes, size, size];
        if logits.shape() != expected {
            return Err(SegError::IncompatibleCheckpoint {
                reason: format!("warm-up produced {:?}, expected {:?}", logits.shape(), expected),
            });
        }
        Ok(())
    }

    fn run(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        let mut binding = self.session.lock();
        let outputs = binding.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(&tensor.as_standard_layout())?
        ])?;
        Ok(outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned())
    }
}

impl SegmentationModel for OnnxSegmentationModel {
    fn forward(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        let (_, channels, height, width) = tensor.dim();
        let size = self.image_size as usize;
        if channels != 3 || height != size || width != size {
            return Err(SegError::inference(
                "forward pass",
                format!("expected (N, 3, {size}, {size}) input, got {:?}", tensor.shape()),
            ));
        }
        self.run(tensor)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn image_size(&self) -> u32 {
        self.image_size
    }
}
