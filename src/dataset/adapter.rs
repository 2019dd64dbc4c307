use std::path::{Path, PathBuf};

use image::{imageops, imageops::FilterType, GrayImage, RgbImage};
use ndarray::prelude::*;
use rand::Rng;
use tracing::info;

use crate::dataset::augment::Augmentation;
use crate::dataset::validate::{pair_stems, IMAGE_EXTENSION, MASK_EXTENSION};
use crate::errors::{Result, SegError};
use crate::palette::ClassPalette;
use crate::pipeline::preprocess::normalize;

/// One training sample at model resolution.
#[derive(Debug, Clone)]
pub struct Sample {
    /// `(3, H, W)`, normalized like inference inputs.
    pub image: Array3<f32>,
    /// `(H, W)` class indices.
    pub mask: Array2<u8>,
}

/// Image/mask pairs of one split, decoded on demand.
#[derive(Debug, Clone)]
pub struct LandCoverDataset {
    pairs: Vec<(PathBuf, PathBuf)>,
    palette: ClassPalette,
    image_size: u32,
    augmentation: Option<Augmentation>,
}

impl LandCoverDataset {
    /// Keeps every `*.jpg` in `images_dir` that has a same-stem `*.png` mask.
    pub fn open(
        images_dir: &Path,
        masks_dir: &Path,
        palette: ClassPalette,
        image_size: u32,
    ) -> Result<Self> {
        let report = pair_stems(images_dir, masks_dir)?;
        let pairs: Vec<_> = report
            .paired
            .iter()
            .map(|stem| {
                (
                    images_dir.join(format!("{stem}.{IMAGE_EXTENSION}")),
                    masks_dir.join(format!("{stem}.{MASK_EXTENSION}")),
                )
            })
            .collect();
        info!(
            "found {} valid image-mask pairs in {}",
            pairs.len(),
            images_dir.display()
        );

        Ok(Self {
            pairs,
            palette,
            image_size,
            augmentation: None,
        })
    }

    pub fn with_augmentation(mut self, augmentation: Augmentation) -> Self {
        self.augmentation = Some(augmentation);
        self
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[(PathBuf, PathBuf)] {
        &self.pairs
    }

    pub fn palette(&self) -> &ClassPalette {
        &self.palette
    }

    pub const fn image_size(&self) -> u32 {
        self.image_size
    }

    pub fn get<R: Rng + ?Sized>(&self, index: usize, rng: &mut R) -> Result<Sample> {
        let (image_path, mask_path) = self.pairs.get(index).ok_or_else(|| SegError::Dataset {
            reason: format!("sample index {index} out of range ({} samples)", self.len()),
        })?;

        let image = open_rgb(image_path)?;
        let mask = open_rgb(mask_path)?;
        let labels = rgb_to_class_indices(&mask, &self.palette);

        let size = self.image_size;
        let image = imageops::resize(&image, size, size, FilterType::Triangle);
        let labels = imageops::resize(&labels, size, size, FilterType::Nearest);

        let (image, labels) = match &self.augmentation {
            Some(augmentation) => augmentation.apply(image, labels, rng),
            None => (image, labels),
        };

        let (width, height) = labels.dimensions();
        let mask = Array2::from_shape_vec((height as usize, width as usize), labels.into_raw())
            .map_err(|e| SegError::Dataset {
                reason: format!("label map for {}: {e}", mask_path.display()),
            })?;

        Ok(Sample {
            image: normalize(&image),
            mask,
        })
    }
}

fn open_rgb(path: &Path) -> Result<RgbImage> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|e| SegError::Dataset {
            reason: format!("failed to open {}: {e}", path.display()),
        })
}

/// Maps mask colors to class indices. Colors outside the palette become class 0.
pub fn rgb_to_class_indices(mask: &RgbImage, palette: &ClassPalette) -> GrayImage {
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        let color = mask.get_pixel(x, y).0;
        let index = palette.index_of_color(color).unwrap_or(0);
        image::Luma([index as u8])
    })
}
