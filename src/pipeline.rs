//! Shared inference pipeline: preprocessing, forward pass and decoding.
//!
//! Every stage is a plain function so both HTTP front-ends, the CLI and the
//! tests compose the exact same arithmetic.

pub mod encode;
pub mod postprocess;
pub mod preprocess;

use image::{DynamicImage, GenericImageView, RgbImage};
use tracing::debug;

pub use encode::{decode_png_data_url, encode_png, encode_png_data_url};
pub use postprocess::{
    argmax_channels, argmax_classes, class_percentages, colorize, overlay, ClassMap,
    ClassPercentages, OVERLAY_ALPHA,
};
pub use preprocess::{decode_image, normalize, preprocess, MEAN, STD};

use crate::errors::{Result, SegError};
use crate::palette::ClassPalette;
use crate::traits::SegmentationModel;

/// Everything derived from one prediction. Dropped once the response is built.
#[derive(Debug, Clone)]
pub struct PredictionResult {
    pub original: DynamicImage,
    pub class_map: ClassMap,
    pub mask: RgbImage,
    pub overlay: RgbImage,
    pub class_percentages: ClassPercentages,
}

impl PredictionResult {
    /// `[width, height]` of the uploaded image.
    pub fn original_size(&self) -> [u32; 2] {
        let (width, height) = self.original.dimensions();
        [width, height]
    }

    /// `[width, height]` the class map was computed at.
    pub fn prediction_size(&self) -> [u32; 2] {
        let (height, width) = self.class_map.dim();
        [width as u32, height as u32]
    }
}

/// Runs one image through the model and decodes the logits.
pub fn run<M>(model: &M, palette: &ClassPalette, original: DynamicImage) -> Result<PredictionResult>
where
    M: SegmentationModel + ?Sized,
{
    if model.num_classes() != palette.len() {
        return Err(SegError::inference(
            "class palette check",
            format!(
                "model has {} classes, palette has {}",
                model.num_classes(),
                palette.len()
            ),
        ));
    }

    let (width, height) = original.dimensions();
    if width == 0 || height == 0 {
        return Err(SegError::invalid_input("Image has zero width or height"));
    }

    let input = preprocess(&original, model.image_size());
    let logits = model.forward(input.view())?;
    debug!(shape = ?logits.shape(), "forward pass finished");

    let class_map = argmax_classes(logits.view(), palette.len())?;
    let mask = colorize(&class_map, palette)?;
    let class_percentages = class_percentages(&class_map, palette);
    let overlay = overlay(&original.to_rgb8(), &mask)?;

    Ok(PredictionResult {
        original,
        class_map,
        mask,
        overlay,
        class_percentages,
    })
}
