//! Dataset tooling: pre-training validation, the image/mask adapter and the
//! batch loader feeding the training loop.

pub mod adapter;
pub mod augment;
pub mod loader;
pub mod validate;

pub use adapter::{rgb_to_class_indices, LandCoverDataset, Sample};
pub use augment::Augmentation;
pub use loader::{collate, plan_batches, DataLoader, InMemoryBatches};
pub use validate::{
    ensure_palette_colors, ensure_same_size, pair_stems, subset_dirs, validate_subset, PairReport,
    ValidationSummary,
};

use std::path::Path;

use ndarray::prelude::*;
use tracing::info;

use crate::errors::Result;
use crate::palette::ClassPalette;

/// Dataset split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Subset {
    Train,
    Val,
}

impl Subset {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Val => "val",
        }
    }
}

impl std::fmt::Display for Subset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sample indices of one batch and the augmentation seed for each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    pub indices: Vec<usize>,
    pub seeds: Vec<u64>,
}

/// Collated training batch.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `(B, 3, H, W)`
    pub images: Array4<f32>,
    /// `(B, H, W)` class indices
    pub masks: Array3<i64>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.images.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Validates both splits under `root` and opens them for training.
///
/// The class CSV only has to agree with the built-in palette on colors; the
/// datasets, and so every checkpoint trained from them, use
/// [`ClassPalette::default`] so `serve` can load the result.
pub fn open_training_splits(
    root: &Path,
    class_csv: &Path,
    image_size: u32,
    augmentation: Option<Augmentation>,
) -> Result<(LandCoverDataset, LandCoverDataset)> {
    let palette = ClassPalette::default();
    for subset in [Subset::Train, Subset::Val] {
        let summary = validate_subset(root, class_csv, subset)?;
        ensure_palette_colors(&summary.palette, &palette)?;
    }

    let open = |subset: Subset| {
        let (images, masks) = subset_dirs(root, subset);
        LandCoverDataset::open(&images, &masks, palette.clone(), image_size)
    };
    let mut train = open(Subset::Train)?;
    if let Some(augmentation) = augmentation {
        train = train.with_augmentation(augmentation);
    }
    let val = open(Subset::Val)?;
    info!(
        train = train.len(),
        val = val.len(),
        "opened dataset splits from {}",
        root.display()
    );
    Ok((train, val))
}
