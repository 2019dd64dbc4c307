use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::dataset::Subset;
use crate::errors::{Result, SegError};
use crate::palette::ClassPalette;

pub const IMAGE_EXTENSION: &str = "jpg";
pub const MASK_EXTENSION: &str = "png";

/// How many unmatched stems are echoed in warnings.
const MAX_LISTED: usize = 10;

/// Outcome of matching image stems against mask stems.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairReport {
    pub paired: Vec<String>,
    pub missing_masks: Vec<String>,
    pub missing_images: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ValidationSummary {
    pub palette: ClassPalette,
    pub subset: Subset,
    pub pairs: usize,
    pub missing_masks: usize,
    pub missing_images: usize,
}

/// `<root>/<subset>_image` and `<root>/<subset>_mask`.
pub fn subset_dirs(root: &Path, subset: Subset) -> (PathBuf, PathBuf) {
    (
        root.join(format!("{}_image", subset.as_str())),
        root.join(format!("{}_mask", subset.as_str())),
    )
}

fn collect_stems(dir: &Path, extension: &str) -> Result<BTreeSet<String>> {
    let mut stems = BTreeSet::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| SegError::Dataset {
            reason: format!("failed to list {}: {e}", dir.display()),
        })?;
        let path = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == extension);
        if let (true, Some(stem)) = (matches, path.file_stem().and_then(|s| s.to_str())) {
            stems.insert(stem.to_string());
        }
    }
    Ok(stems)
}

/// Matches `*.jpg` images with `*.png` masks by file stem. Output is sorted.
pub fn pair_stems(images_dir: &Path, masks_dir: &Path) -> Result<PairReport> {
    let image_stems = collect_stems(images_dir, IMAGE_EXTENSION)?;
    let mask_stems = collect_stems(masks_dir, MASK_EXTENSION)?;

    Ok(PairReport {
        paired: image_stems.intersection(&mask_stems).cloned().collect(),
        missing_masks: image_stems.difference(&mask_stems).cloned().collect(),
        missing_images: mask_stems.difference(&image_stems).cloned().collect(),
    })
}

fn dimensions(path: &Path) -> Result<(u32, u32)> {
    image::image_dimensions(path).map_err(|e| SegError::Dataset {
        reason: format!("failed to read {}: {e}", path.display()),
    })
}

/// Fails with [`SegError::SizeMismatch`] naming both files when the image and
/// mask dimensions differ.
pub fn ensure_same_size(image_path: &Path, mask_path: &Path) -> Result<()> {
    let image_size = dimensions(image_path)?;
    let mask_size = dimensions(mask_path)?;
    if image_size != mask_size {
        return Err(SegError::SizeMismatch {
            image: image_path.file_name().map(PathBuf::from).unwrap_or_default(),
            image_size,
            mask: mask_path.file_name().map(PathBuf::from).unwrap_or_default(),
            mask_size,
        });
    }
    Ok(())
}

/// The class CSV must list the palette's colors in the palette's order.
/// Names are not compared.
pub fn ensure_palette_colors(csv_palette: &ClassPalette, palette: &ClassPalette) -> Result<()> {
    let colors = |p: &ClassPalette| p.classes().iter().map(|c| c.color).collect::<Vec<_>>();
    let (found, expected) = (colors(csv_palette), colors(palette));
    if found != expected {
        return Err(SegError::Dataset {
            reason: format!(
                "class map colors {found:?} do not match the model palette {expected:?} ({:?})",
                palette.names()
            ),
        });
    }
    Ok(())
}

/// Full pre-training check of one subset. Any problem other than unpaired
/// files is fatal.
pub fn validate_subset(
    root: &Path,
    class_csv: &Path,
    subset: Subset,
) -> Result<ValidationSummary> {
    let class_csv_path = if class_csv.is_absolute() {
        class_csv.to_path_buf()
    } else {
        root.join(class_csv)
    };
    let (images_dir, masks_dir) = subset_dirs(root, subset);

    if !class_csv_path.exists() {
        return Err(SegError::Dataset {
            reason: format!("Class map not found: {}", class_csv_path.display()),
        });
    }
    if !images_dir.is_dir() || !masks_dir.is_dir() {
        return Err(SegError::Dataset {
            reason: format!(
                "Missing subset dirs: {} or {}",
                images_dir.display(),
                masks_dir.display()
            ),
        });
    }

    let palette = ClassPalette::from_csv(&class_csv_path)?;
    info!(
        classes = palette.len(),
        "loaded class map from {}",
        class_csv_path.display()
    );

    let report = pair_stems(&images_dir, &masks_dir)?;
    if !report.missing_masks.is_empty() {
        warn!(
            "{} images without masks (showing up to {MAX_LISTED}): {:?}",
            report.missing_masks.len(),
            &report.missing_masks[..report.missing_masks.len().min(MAX_LISTED)]
        );
    }
    if !report.missing_images.is_empty() {
        warn!(
            "{} masks without images (showing up to {MAX_LISTED}): {:?}",
            report.missing_images.len(),
            &report.missing_images[..report.missing_images.len().min(MAX_LISTED)]
        );
    }
    info!("found {} paired samples in {}", report.paired.len(), subset.as_str());

    report.paired.par_iter().try_for_each(|stem| {
        ensure_same_size(
            &images_dir.join(format!("{stem}.{IMAGE_EXTENSION}")),
            &masks_dir.join(format!("{stem}.{MASK_EXTENSION}")),
        )
    })?;

    Ok(ValidationSummary {
        palette,
        subset,
        pairs: report.paired.len(),
        missing_masks: report.missing_masks.len(),
        missing_images: report.missing_images.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::palette::LandCoverClass;
    use image::{Rgb, RgbImage};
    use std::fs;
    use tempfile::TempDir;

    fn write_rgb(path: &Path, width: u32, height: u32) {
        RgbImage::from_pixel(width, height, Rgb([0, 255, 0]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn test_pair_stems() -> Result<()> {
        let dir = TempDir::new()?;
        let (images, masks) = subset_dirs(dir.path(), Subset::Train);
        fs::create_dir_all(&images)?;
        fs::create_dir_all(&masks)?;

        for stem in ["a", "b", "c"] {
            fs::write(images.join(format!("{stem}.jpg")), b"")?;
        }
        for stem in ["b", "c", "d"] {
            fs::write(masks.join(format!("{stem}.png")), b"")?;
        }
        fs::write(images.join("notes.txt"), b"")?;

        let report = pair_stems(&images, &masks)?;
        assert_eq!(report.paired, vec!["b", "c"]);
        assert_eq!(report.missing_masks, vec!["a"]);
        assert_eq!(report.missing_images, vec!["d"]);
        Ok(())
    }

    #[test]
    fn test_size_mismatch_names_both_files() -> Result<()> {
        let dir = TempDir::new()?;
        let image = dir.path().join("tile_7.jpg");
        let mask = dir.path().join("tile_7.png");
        write_rgb(&image, 64, 64);
        write_rgb(&mask, 32, 64);

        let err = ensure_same_size(&image, &mask).unwrap_err();
        match &err {
            SegError::SizeMismatch {
                image_size,
                mask_size,
                ..
            } => {
                assert_eq!(*image_size, (64, 64));
                assert_eq!(*mask_size, (32, 64));
            }
            other => panic!("unexpected error: {other}"),
        }
        let message = err.to_string();
        assert!(message.contains("tile_7.jpg") && message.contains("tile_7.png"));
        Ok(())
    }

    #[test]
    fn test_validate_subset_requires_class_csv_and_dirs() -> Result<()> {
        let dir = TempDir::new()?;
        let csv = Path::new("class_dict_seg.csv");

        let err = validate_subset(dir.path(), csv, Subset::Val).unwrap_err();
        assert!(err.to_string().contains("Class map not found"));

        fs::write(dir.path().join(csv), "name,r,g,b\nforest,0,255,0\n")?;
        let err = validate_subset(dir.path(), csv, Subset::Val).unwrap_err();
        assert!(err.to_string().contains("Missing subset dirs"));
        Ok(())
    }

    #[test]
    fn test_palette_colors_must_match_in_order() {
        let palette = ClassPalette::default();
        let unnamed = ClassPalette::new(
            palette
                .classes()
                .iter()
                .enumerate()
                .map(|(i, c)| LandCoverClass::new(format!("class_{i}"), c.color))
                .collect(),
        )
        .unwrap();
        assert!(ensure_palette_colors(&unnamed, &palette).is_ok());

        let mut reordered = palette.classes().to_vec();
        reordered.swap(0, 2);
        let reordered = ClassPalette::new(reordered).unwrap();
        let err = ensure_palette_colors(&reordered, &palette).unwrap_err();
        assert!(matches!(err, SegError::Dataset { .. }));

        let fewer = ClassPalette::new(palette.classes()[..3].to_vec()).unwrap();
        assert!(ensure_palette_colors(&fewer, &palette).is_err());
    }

    #[test]
    fn test_validate_subset_success() -> Result<()> {
        let dir = TempDir::new()?;
        fs::write(
            dir.path().join("class_dict_seg.csv"),
            "name,r,g,b\nurban,0,255,255\nforest,0,255,0\n",
        )?;
        let (images, masks) = subset_dirs(dir.path(), Subset::Train);
        fs::create_dir_all(&images)?;
        fs::create_dir_all(&masks)?;
        for stem in ["x", "y"] {
            write_rgb(&images.join(format!("{stem}.jpg")), 40, 30);
            write_rgb(&masks.join(format!("{stem}.png")), 40, 30);
        }
        write_rgb(&masks.join("orphan.png"), 40, 30);

        let summary = validate_subset(dir.path(), Path::new("class_dict_seg.csv"), Subset::Train)?;
        assert_eq!(summary.pairs, 2);
        assert_eq!(summary.missing_images, 1);
        assert_eq!(summary.palette.len(), 2);
        Ok(())
    }
}
