use image::{imageops, GrayImage, Rgb, RgbImage};
use rand::Rng;

/// Geometric and photometric augmentation for training samples. Geometric
/// transforms are applied to the image and its label map together.
#[derive(Debug, Clone, PartialEq)]
pub struct Augmentation {
    pub horizontal_flip: f64,
    pub vertical_flip: f64,
    pub rotate90: f64,
    pub brightness_contrast: f64,
    /// Maximum relative brightness shift.
    pub brightness_limit: f32,
    /// Maximum relative contrast change.
    pub contrast_limit: f32,
}

impl Default for Augmentation {
    fn default() -> Self {
        Self {
            horizontal_flip: 0.5,
            vertical_flip: 0.5,
            rotate90: 0.5,
            brightness_contrast: 0.2,
            brightness_limit: 0.2,
            contrast_limit: 0.2,
        }
    }
}

impl Augmentation {
    pub fn apply<R: Rng + ?Sized>(
        &self,
        mut image: RgbImage,
        mut labels: GrayImage,
        rng: &mut R,
    ) -> (RgbImage, GrayImage) {
        if rng.gen_bool(self.horizontal_flip) {
            imageops::flip_horizontal_in_place(&mut image);
            imageops::flip_horizontal_in_place(&mut labels);
        }
        if rng.gen_bool(self.vertical_flip) {
            imageops::flip_vertical_in_place(&mut image);
            imageops::flip_vertical_in_place(&mut labels);
        }
        if rng.gen_bool(self.rotate90) {
            (image, labels) = match rng.gen_range(0..4) {
                1 => (imageops::rotate90(&image), imageops::rotate90(&labels)),
                2 => (imageops::rotate180(&image), imageops::rotate180(&labels)),
                3 => (imageops::rotate270(&image), imageops::rotate270(&labels)),
                _ => (image, labels),
            };
        }
        if rng.gen_bool(self.brightness_contrast) {
            let alpha = 1.0 + rng.gen_range(-self.contrast_limit..=self.contrast_limit);
            let beta = rng.gen_range(-self.brightness_limit..=self.brightness_limit) * 255.0;
            adjust_brightness_contrast(&mut image, alpha, beta);
        }
        (image, labels)
    }
}

/// `v * alpha + beta`, saturated to `0..=255`.
pub fn adjust_brightness_contrast(image: &mut RgbImage, alpha: f32, beta: f32) {
    for Rgb(channels) in image.pixels_mut() {
        for channel in channels.iter_mut() {
            *channel = (f32::from(*channel) * alpha + beta).round().clamp(0.0, 255.0) as u8;
        }
    }
}
