use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat};

use crate::errors::{Result, SegError};

const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// PNG-encodes an image. Float images are converted to 8-bit RGBA first since
/// PNG has no float sample type.
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let converted;
    let image = match image {
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
            converted = DynamicImage::ImageRgba8(image.to_rgba8());
            &converted
        }
        other => other,
    };

    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| SegError::inference("png encoding", e))?;
    Ok(buffer.into_inner())
}

/// `data:image/png;base64,<...>` for embedding in JSON.
pub fn encode_png_data_url(image: &DynamicImage) -> Result<String> {
    let png = encode_png(image)?;
    Ok(format!("{PNG_DATA_URL_PREFIX}{}", STANDARD.encode(png)))
}

/// Inverse of [`encode_png_data_url`].
pub fn decode_png_data_url(data_url: &str) -> Result<DynamicImage> {
    let payload = data_url
        .strip_prefix(PNG_DATA_URL_PREFIX)
        .ok_or_else(|| SegError::invalid_input("not a PNG data URL"))?;
    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| SegError::invalid_input(format!("invalid base64 payload: {e}")))?;
    image::load_from_memory_with_format(&bytes, ImageFormat::Png)
        .map_err(|source| SegError::ImageDecode { source })
}
