use image::{imageops, imageops::FilterType, GrayImage, Luma, Rgb, RgbImage};
use imageproc::map::map_colors;
use ndarray::prelude::*;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::errors::{Result, SegError};
use crate::imageops_ai;
use crate::palette::ClassPalette;

/// Weight of the class-color mask in the overlay composite.
pub const OVERLAY_ALPHA: f32 = 0.6;

/// Per-pixel class indices at model resolution, `(height, width)`.
pub type ClassMap = Array2<u8>;

/// Arg-max over the channel axis of a single `(classes, H, W)` score volume.
/// Ties resolve to the lowest class index.
pub fn argmax_channels(scores: ArrayView3<f32>) -> ClassMap {
    let (classes, height, width) = scores.dim();
    Array2::from_shape_fn((height, width), |(y, x)| {
        let mut best = 0;
        let mut best_score = scores[[0, y, x]];
        for class in 1..classes {
            let score = scores[[class, y, x]];
            if score > best_score {
                best = class;
                best_score = score;
            }
        }
        best as u8
    })
}

/// Decodes `(1, classes, H, W)` logits into a class map.
pub fn argmax_classes(logits: ArrayView4<f32>, num_classes: usize) -> Result<ClassMap> {
    let (batch, classes, height, width) = logits.dim();
    if batch != 1 {
        return Err(SegError::inference(
            "logit decoding",
            format!("expected batch size 1, got {batch}"),
        ));
    }
    if classes != num_classes {
        return Err(SegError::inference(
            "logit decoding",
            format!("model produced {classes} channels, palette has {num_classes} classes"),
        ));
    }
    if height == 0 || width == 0 {
        return Err(SegError::inference("logit decoding", "empty logits"));
    }
    Ok(argmax_channels(logits.index_axis(Axis(0), 0)))
}

fn class_map_image(class_map: &ClassMap) -> Result<GrayImage> {
    let (height, width) = class_map.dim();
    GrayImage::from_raw(
        width as u32,
        height as u32,
        class_map.iter().copied().collect(),
    )
    .ok_or_else(|| SegError::inference("mask rendering", "class map buffer size mismatch"))
}

/// Paints every pixel with its class color.
pub fn colorize(class_map: &ClassMap, palette: &ClassPalette) -> Result<RgbImage> {
    let indices = class_map_image(class_map)?;
    Ok(map_colors(&indices, |Luma([index])| {
        palette
            .color_of(usize::from(index))
            .unwrap_or(Rgb([0, 0, 0]))
    }))
}

/// Ordered class name → share of pixels in percent, rounded to 2 decimals.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassPercentages(Vec<(String, f64)>);

impl ClassPercentages {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, p)| *p)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(n, p)| (n.as_str(), *p))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.0.iter().map(|(_, p)| p).sum()
    }
}

impl Serialize for ClassPercentages {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, percentage) in &self.0 {
            map.serialize_entry(name, percentage)?;
        }
        map.end()
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `100 * count(class) / total` for every palette class, in palette order.
pub fn class_percentages(class_map: &ClassMap, palette: &ClassPalette) -> ClassPercentages {
    let mut counts = vec![0usize; palette.len()];
    for &index in class_map {
        if let Some(count) = counts.get_mut(usize::from(index)) {
            *count += 1;
        }
    }

    let total = class_map.len().max(1) as f64;
    ClassPercentages(
        palette
            .classes()
            .iter()
            .zip(counts)
            .map(|(class, count)| (class.name.clone(), round2(count as f64 * 100.0 / total)))
            .collect(),
    )
}

/// Blends the mask (resized with nearest neighbour) over the original image.
pub fn overlay(original: &RgbImage, mask: &RgbImage) -> Result<RgbImage> {
    let (width, height) = original.dimensions();
    let resized = if mask.dimensions() == (width, height) {
        mask.clone()
    } else {
        imageops::resize(mask, width, height, FilterType::Nearest)
    };
    imageops_ai::blend(original, &resized, OVERLAY_ALPHA)
        .map_err(|e| SegError::inference("overlay composition", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn one_hot(class_map: &Array2<usize>, classes: usize) -> Array4<f32> {
        let (h, w) = class_map.dim();
        Array4::from_shape_fn((1, classes, h, w), |(_, c, y, x)| {
            if class_map[[y, x]] == c {
                4.0
            } else {
                -1.0
            }
        })
    }

    #[test]
    fn test_argmax_picks_highest_and_breaks_ties_low() -> Result<()> {
        let mut logits = Array4::<f32>::zeros((1, 3, 1, 3));
        logits[[0, 2, 0, 0]] = 1.0;
        logits[[0, 1, 0, 1]] = 0.5;
        logits[[0, 2, 0, 1]] = 0.5;
        // pixel (0, 2) is a three-way tie at 0.0

        let map = argmax_classes(logits.view(), 3)?;
        assert_eq!(map, array![[2u8, 1, 0]]);
        Ok(())
    }

    #[test]
    fn test_argmax_rejects_wrong_channel_count() {
        let logits = Array4::<f32>::zeros((1, 4, 2, 2));
        assert!(argmax_classes(logits.view(), 5).is_err());

        let batched = Array4::<f32>::zeros((2, 5, 2, 2));
        assert!(argmax_classes(batched.view(), 5).is_err());
    }

    #[test]
    fn test_colorize_uses_only_palette_colors() -> Result<()> {
        let palette = ClassPalette::default();
        let expected = Array2::from_shape_fn((16, 16), |(y, x)| (y * 16 + x) % palette.len());
        let map = argmax_classes(one_hot(&expected, palette.len()).view(), palette.len())?;

        let mask = colorize(&map, &palette)?;
        assert_eq!(mask.dimensions(), (16, 16));

        for (x, y, pixel) in mask.enumerate_pixels() {
            let class = expected[[y as usize, x as usize]];
            assert_eq!(Some(*pixel), palette.color_of(class));
        }

        let palette_colors: HashSet<[u8; 3]> =
            palette.classes().iter().map(|c| c.color).collect();
        assert!(mask.pixels().all(|p| palette_colors.contains(&p.0)));
        Ok(())
    }

    #[test]
    fn test_percentages_sum_to_hundred() {
        let palette = ClassPalette::default();
        // 3 x 3 map gives thirds, which do not round cleanly
        let map = array![[0u8, 1, 2], [0, 1, 2], [0, 1, 2]];

        let percentages = class_percentages(&map, &palette);
        assert_eq!(percentages.len(), 5);
        assert_eq!(percentages.get("urban"), Some(33.33));
        assert_eq!(percentages.get("water"), Some(33.33));
        assert_eq!(percentages.get("forest"), Some(33.33));
        assert_eq!(percentages.get("road"), Some(0.0));
        assert!((percentages.total() - 100.0).abs() <= 0.05);
        assert!(percentages.iter().all(|(_, p)| (0.0..=100.0).contains(&p)));
    }

    #[test]
    fn test_percentages_serialize_in_palette_order() {
        let palette = ClassPalette::default();
        let map = Array2::<u8>::from_elem((4, 4), 2);
        let json = serde_json::to_string(&class_percentages(&map, &palette)).unwrap();
        assert_eq!(
            json,
            r#"{"urban":0.0,"water":0.0,"forest":100.0,"agriculture":0.0,"road":0.0}"#
        );
    }

    #[test]
    fn test_overlay_matches_original_size() -> Result<()> {
        let original = RgbImage::from_pixel(300, 170, Rgb([100, 100, 100]));
        let mask = RgbImage::from_pixel(256, 256, Rgb([0, 255, 0]));

        let composite = overlay(&original, &mask)?;
        assert_eq!(composite.dimensions(), (300, 170));
        assert!(composite.pixels().all(|p| *p == Rgb([40, 193, 40])));
        Ok(())
    }

    #[test]
    fn test_overlay_keeps_label_edges_sharp() -> Result<()> {
        let original = RgbImage::new(4, 4);
        let mut mask = RgbImage::from_pixel(2, 2, Rgb([0, 0, 255]));
        mask.put_pixel(1, 0, Rgb([255, 0, 255]));

        let composite = overlay(&original, &mask)?;
        // nearest neighbour: no mixed colors at the boundary
        let blues = composite.pixels().filter(|p| **p == Rgb([0, 0, 153])).count();
        let magentas = composite.pixels().filter(|p| **p == Rgb([153, 0, 153])).count();
        assert_eq!(blues + magentas, 16);
        assert_eq!(magentas, 4);
        Ok(())
    }
}
