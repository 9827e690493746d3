//! Page-image operations: resizing, grayscale, histogram normalisation and
//! JPEG encoding.

use fast_image_resize::images::Image as FirImage;
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView, GrayImage, ImageBuffer, Rgb};

use crate::error::{DocsiftError, Result};

/// Decode an image buffer into a [`DynamicImage`].
pub fn decode(data: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(data).map_err(|e| DocsiftError::image_processing(format!("failed to decode image: {e}")))
}

/// Probe the pixel dimensions of an encoded image without keeping the
/// decoded pixels around.
pub fn dimensions(data: &[u8]) -> Result<(u32, u32)> {
    Ok(decode(data)?.dimensions())
}

/// Encode an image as JPEG at the given quality.
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    image
        .write_with_encoder(encoder)
        .map_err(|e| DocsiftError::image_processing(format!("JPEG encode failed: {e}")))?;
    Ok(buffer)
}

/// Clamp an image to a maximum width, preserving aspect ratio.
///
/// Images at or below `max_width` are returned unchanged. Rendered pages
/// only ever shrink here, so the resize is always a Lanczos3 convolution
/// (the downscale filter); there is no upscale path.
pub fn clamp_width(image: DynamicImage, max_width: u32) -> Result<DynamicImage> {
    let (width, height) = image.dimensions();
    if max_width == 0 || width <= max_width {
        return Ok(image);
    }
    let new_height = ((height as f64 * max_width as f64) / width as f64).round().max(1.0) as u32;

    let rgb_image = image.to_rgb8();

    let src_image = FirImage::from_vec_u8(width, height, rgb_image.into_raw(), PixelType::U8x3)
        .map_err(|e| DocsiftError::image_processing(format!("failed to wrap page pixels for resize: {e:?}")))?;
    let mut dst_image = FirImage::new(max_width, new_height, PixelType::U8x3);

    let mut resizer = Resizer::new();
    resizer
        .resize(
            &src_image,
            &mut dst_image,
            &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Lanczos3)),
        )
        .map_err(|e| DocsiftError::image_processing(format!("width clamp resize failed: {e:?}")))?;

    let clamped = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(max_width, new_height, dst_image.into_vec())
        .ok_or_else(|| DocsiftError::image_processing("resized page buffer has the wrong length".to_string()))?;
    Ok(DynamicImage::ImageRgb8(clamped))
}

/// Convert to 8-bit grayscale.
pub fn to_grayscale(image: &DynamicImage) -> DynamicImage {
    DynamicImage::ImageLuma8(image.to_luma8())
}

/// Histogram-stretch a grayscale image to the full 0..255 range.
///
/// Flat images (single intensity) are returned unchanged.
pub fn normalize_histogram(image: &DynamicImage) -> DynamicImage {
    let gray: GrayImage = image.to_luma8();

    let mut min = u8::MAX;
    let mut max = u8::MIN;
    for pixel in gray.pixels() {
        min = min.min(pixel[0]);
        max = max.max(pixel[0]);
    }
    if min >= max {
        return DynamicImage::ImageLuma8(gray);
    }

    let range = (max - min) as f32;
    let stretched = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let value = gray.get_pixel(x, y)[0];
        let scaled = ((value - min) as f32 / range * 255.0).round() as u8;
        image::Luma([scaled])
    });
    DynamicImage::ImageLuma8(stretched)
}

/// Crop a horizontal strip `[y, y + height)` out of a page image.
///
/// # Errors
///
/// [`DocsiftError::ImageProcessing`] when the strip falls outside the page.
pub fn crop_strip(image: &DynamicImage, y: u32, height: u32) -> Result<DynamicImage> {
    let (page_width, page_height) = image.dimensions();
    if height == 0 || y >= page_height {
        return Err(DocsiftError::image_processing(format!(
            "strip at y={y} height={height} is outside a {page_width}x{page_height} page"
        )));
    }
    let clamped_height = height.min(page_height - y);
    Ok(image.crop_imm(0, y, page_width, clamped_height))
}
