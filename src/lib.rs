pub mod config;
pub mod dataset;
pub mod errors;
pub mod imageops_ai;
pub mod model;
pub mod palette;
pub mod pipeline;
pub mod server;
pub mod service;
pub mod traits;
pub mod training;

pub mod mocks;

/// Spatial size (height = width) of the network input and output.
pub const MODEL_IMAGE_SIZE: u32 = 256;

pub use config::{Cli, Command, ServeConfig, TrainConfig, ValidateConfig};
pub use errors::{Result, SegError};
pub use model::{CheckpointMetadata, ModelOptions, OnnxSegmentationModel};
pub use palette::{ClassPalette, LandCoverClass};
pub use pipeline::PredictionResult;
pub use server::{router, Flavor, ServerOptions};
pub use service::InferenceService;
pub use traits::*;
pub use training::{Trainer, TrainerConfig, TrainingHistory};
