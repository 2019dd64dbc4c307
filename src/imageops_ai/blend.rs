use anyhow::{anyhow, ensure, Result};
use image::{GenericImageView, ImageBuffer, Pixel, Primitive, Rgb};
use num_traits::AsPrimitive;

use crate::imageops_ai::{get_max_value, is_floating_point};

/// Weighted sum of two RGB images: `base * (1 - alpha) + top * alpha`,
/// rounded and saturated to the subpixel range.
pub fn blend<I, T, S>(base: &I, top: &T, alpha: f32) -> Result<ImageBuffer<Rgb<S>, Vec<S>>>
where
    I: GenericImageView<Pixel = Rgb<S>>,
    T: GenericImageView<Pixel = Rgb<S>>,
    Rgb<S>: Pixel<Subpixel = S>,
    S: Primitive + AsPrimitive<f32> + 'static,
    f32: AsPrimitive<S>,
{
    ensure!(
        base.dimensions() == top.dimensions(),
        "Image and overlay dimensions do not match"
    );
    ensure!(
        (0.0..=1.0).contains(&alpha),
        "Blend weight must be within [0, 1]"
    );

    let max: f32 = get_max_value::<S>().as_();
    let round = !is_floating_point::<S>();
    let beta = 1.0 - alpha;

    let processed_pixels = base
        .pixels()
        .zip(top.pixels())
        .flat_map(|(base_pixel, top_pixel)| {
            let Rgb(base_channels) = base_pixel.2;
            let Rgb(top_channels) = top_pixel.2;
            base_channels
                .into_iter()
                .zip(top_channels)
                .map(|(b, t)| {
                    let value = b.as_() * beta + t.as_() * alpha;
                    let value = if round { value.round() } else { value };
                    value.clamp(0.0, max).as_()
                })
                .collect::<Vec<S>>()
        })
        .collect::<Vec<S>>();

    ImageBuffer::from_raw(base.width(), base.height(), processed_pixels)
        .ok_or_else(|| anyhow!("Failed to create ImageBuffer from blended pixels"))
}
