use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::errors::{Result, SegError};
use crate::palette::ClassPalette;
use crate::pipeline::preprocess::denormalize;
use crate::traits::{SegmentationModel, StepOutput, TrainableModel};
use ndarray::prelude::*;

/// Mock segmentation model for tests.
///
/// Scores each pixel by its nearest palette color after undoing the input
/// normalization, so solid-color inputs decode to a single known class.
#[derive(Debug)]
pub struct MockSegmentationModel {
    colors: Vec<[u8; 3]>,
    fail: bool,
    calls: AtomicUsize,
}

impl MockSegmentationModel {
    pub fn new(palette: &ClassPalette) -> Self {
        Self {
            colors: palette.classes().iter().map(|c| c.color).collect(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_classes(num_classes: usize) -> Self {
        Self {
            colors: (0..num_classes).map(|i| [(i * 40) as u8, 0, 0]).collect(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Every forward pass fails with an inference error.
    pub fn failing(palette: &ClassPalette) -> Self {
        Self {
            fail: true,
            ..Self::new(palette)
        }
    }

    pub fn forward_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn nearest(&self, rgb: [u8; 3]) -> usize {
        self.colors
            .iter()
            .enumerate()
            .min_by_key(|(_, color)| {
                color
                    .iter()
                    .zip(rgb)
                    .map(|(&a, b)| (i32::from(a) - i32::from(b)).pow(2))
                    .sum::<i32>()
            })
            .map(|(index, _)| index)
            .unwrap_or(0)
    }
}

impl SegmentationModel for MockSegmentationModel {
    fn forward(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SegError::inference("forward pass", "mock failure"));
        }

        let (batch, channels, height, width) = tensor.dim();
        if channels != 3 {
            return Err(SegError::inference(
                "forward pass",
                format!("expected 3 input channels, got {channels}"),
            ));
        }

        let mut logits = Array4::<f32>::zeros((batch, self.colors.len(), height, width));
        for b in 0..batch {
            for y in 0..height {
                for x in 0..width {
                    let rgb = [0, 1, 2].map(|c| denormalize(tensor[[b, c, y, x]], c));
                    logits[[b, self.nearest(rgb), y, x]] = 1.0;
                }
            }
        }
        Ok(logits)
    }

    fn num_classes(&self) -> usize {
        self.colors.len()
    }
}

/// テスト用の学習バックエンド
///
/// Validation losses are scripted per epoch; training logits always predict
/// class 0 and validation logits reproduce the targets.
#[derive(Debug, Default)]
pub struct MockTrainableModel {
    pub num_classes: usize,
    pub val_losses: Vec<f32>,
    pub val_batches_per_epoch: usize,
    pub learning_rates: Vec<f32>,
    pub current_lr: f32,
    pub saved: Vec<PathBuf>,
    eval_calls: usize,
}

impl MockTrainableModel {
    pub fn new(num_classes: usize, val_losses: Vec<f32>, val_batches_per_epoch: usize) -> Self {
        Self {
            num_classes,
            val_losses,
            val_batches_per_epoch: val_batches_per_epoch.max(1),
            ..Self::default()
        }
    }

    fn logits_for(&self, masks: ArrayView3<i64>, follow_targets: bool) -> Array4<f32> {
        let (batch, height, width) = masks.dim();
        Array4::from_shape_fn((batch, self.num_classes, height, width), |(b, c, y, x)| {
            let target = if follow_targets { masks[[b, y, x]] as usize } else { 0 };
            if c == target {
                1.0
            } else {
                0.0
            }
        })
    }
}

impl TrainableModel for MockTrainableModel {
    fn train_step(
        &mut self,
        _images: ArrayView4<f32>,
        masks: ArrayView3<i64>,
    ) -> Result<StepOutput> {
        Ok(StepOutput {
            loss: 1.0,
            logits: self.logits_for(masks, false),
        })
    }

    fn eval_step(
        &mut self,
        _images: ArrayView4<f32>,
        masks: ArrayView3<i64>,
    ) -> Result<StepOutput> {
        let epoch = self.eval_calls / self.val_batches_per_epoch;
        self.eval_calls += 1;
        let loss = self
            .val_losses
            .get(epoch)
            .or(self.val_losses.last())
            .copied()
            .unwrap_or(1.0);
        Ok(StepOutput {
            loss,
            logits: self.logits_for(masks, true),
        })
    }

    fn learning_rate(&self) -> f32 {
        self.current_lr
    }

    fn set_learning_rate(&mut self, learning_rate: f32) -> Result<()> {
        self.current_lr = learning_rate;
        self.learning_rates.push(learning_rate);
        Ok(())
    }

    fn save_checkpoint(&mut self, path: &Path) -> Result<()> {
        fs::write(path, b"mock checkpoint")
            .map_err(|e| SegError::file_system(path, "checkpoint write", e))?;
        self.saved.push(path.to_path_buf());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::preprocess::preprocess;
    use image::{DynamicImage, Rgb, RgbImage};

    #[test]
    fn test_mock_model_maps_colors_to_classes() -> Result<()> {
        let palette = ClassPalette::default();
        let mock = MockSegmentationModel::new(&palette);
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 10, Rgb([250, 250, 5])));

        let logits = mock.forward(preprocess(&img, 32).view())?;
        assert_eq!(logits.shape(), &[1, 5, 32, 32]);

        let agriculture = palette.index_of("agriculture").unwrap();
        assert!(logits
            .index_axis(Axis(1), agriculture)
            .iter()
            .all(|&v| v == 1.0));
        assert_eq!(mock.forward_calls(), 1);
        Ok(())
    }

    #[test]
    fn test_failing_mock() {
        let mock = MockSegmentationModel::failing(&ClassPalette::default());
        let input = Array4::<f32>::zeros((1, 3, 4, 4));
        assert!(mock.forward(input.view()).is_err());
    }

    #[test]
    fn test_mock_trainer_scripts_losses() -> Result<()> {
        let mut mock = MockTrainableModel::new(2, vec![0.9, 0.5], 1);
        let images = Array4::<f32>::zeros((1, 3, 2, 2));
        let masks = Array3::<i64>::ones((1, 2, 2));

        assert_eq!(mock.eval_step(images.view(), masks.view())?.loss, 0.9);
        assert_eq!(mock.eval_step(images.view(), masks.view())?.loss, 0.5);
        // past the script the last value repeats
        assert_eq!(mock.eval_step(images.view(), masks.view())?.loss, 0.5);
        Ok(())
    }
}
