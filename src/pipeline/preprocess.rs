use image::{imageops, imageops::FilterType, DynamicImage, RgbImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;

use crate::errors::{Result, SegError};

/// ImageNet channel statistics the encoder was pretrained with.
pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Decodes an uploaded file, sniffing the format from its content.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(SegError::invalid_input("Uploaded file is empty"));
    }
    image::load_from_memory(bytes).map_err(|source| SegError::ImageDecode { source })
}

/// Resizes to `image_size`² (bilinear) and normalizes into a `(1, 3, H, W)` tensor.
///
/// Grayscale inputs are expanded and alpha channels dropped before resizing.
pub fn preprocess(image: &DynamicImage, image_size: u32) -> Array4<f32> {
    let rgb = image.to_rgb8();
    let resized = imageops::resize(&rgb, image_size, image_size, FilterType::Triangle);
    normalize(&resized).insert_axis(Axis(0))
}

/// `(v / 255 - mean) / std` per channel, channel-first.
pub fn normalize(image: &RgbImage) -> Array3<f32> {
    let mut tensor = image.as_ndarray3().mapv(|v| f32::from(v) / 255.0);
    for (channel, mut plane) in tensor.axis_iter_mut(Axis(0)).enumerate() {
        let (mean, std) = (MEAN[channel], STD[channel]);
        plane.mapv_inplace(|v| (v - mean) / std);
    }
    tensor
}

/// Inverse of [`normalize`] for a single channel value, back to `0..=255`.
pub fn denormalize(value: f32, channel: usize) -> u8 {
    let v = (value * STD[channel] + MEAN[channel]) * 255.0;
    v.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, Rgba, RgbaImage};
    use std::io::Cursor;

    #[test]
    fn test_tensor_shape() {
        let img = DynamicImage::new_rgb8(300, 120);
        let tensor = preprocess(&img, 256);
        assert_eq!(tensor.shape(), &[1, 3, 256, 256]);
    }

    #[test]
    fn test_normalization_values() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([255, 0, 128])));
        let tensor = preprocess(&img, 4);

        let expected_r = (1.0 - MEAN[0]) / STD[0];
        let expected_g = (0.0 - MEAN[1]) / STD[1];
        let expected_b = (128.0 / 255.0 - MEAN[2]) / STD[2];

        assert!(tensor.index_axis(Axis(1), 0).iter().all(|v| (v - expected_r).abs() < 1e-5));
        assert!(tensor.index_axis(Axis(1), 1).iter().all(|v| (v - expected_g).abs() < 1e-5));
        assert!(tensor.index_axis(Axis(1), 2).iter().all(|v| (v - expected_b).abs() < 1e-5));
    }

    #[test]
    fn test_grayscale_and_rgba_are_coerced() {
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(10, 10, Luma([200])));
        let tensor = preprocess(&gray, 16);
        assert_eq!(tensor.shape(), &[1, 3, 16, 16]);
        for channel in 0..3 {
            let value = tensor[[0, channel, 5, 5]];
            assert_eq!(denormalize(value, channel), 200);
        }

        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([0, 255, 0, 10])));
        let tensor = preprocess(&rgba, 16);
        assert_eq!(denormalize(tensor[[0, 1, 0, 0]], 1), 255);
        assert_eq!(denormalize(tensor[[0, 0, 0, 0]], 0), 0);
    }

    #[test]
    fn test_decode_png_and_garbage() -> Result<()> {
        let img = DynamicImage::new_rgb8(5, 7);
        let mut bytes = Cursor::new(Vec::new());
        img.write_to(&mut bytes, image::ImageFormat::Png)
            .map_err(|source| SegError::ImageDecode { source })?;

        let decoded = decode_image(bytes.get_ref())?;
        assert_eq!((decoded.width(), decoded.height()), (5, 7));

        assert!(matches!(
            decode_image(b"definitely not an image"),
            Err(SegError::ImageDecode { .. })
        ));
        assert!(matches!(
            decode_image(&[]),
            Err(SegError::InvalidInput { .. })
        ));
        Ok(())
    }
}
