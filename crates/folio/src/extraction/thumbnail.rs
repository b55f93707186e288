use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use super::ExtractionError;

pub enum ThumbnailSource {
    /// Embedded DCT image bytes.
    Jpeg(Vec<u8>),
    /// Page geometry only; drawn as an empty page.
    Blank { page_width: f64, page_height: f64 },
}

pub struct RenderedThumbnail {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Largest size with the source's aspect ratio that fits inside the box.
pub fn fit_within(src_width: f64, src_height: f64, max_width: u32, max_height: u32) -> (u32, u32) {
    if src_width <= 0.0 || src_height <= 0.0 {
        return (max_width.max(1), max_height.max(1));
    }
    let scale = (max_width as f64 / src_width).min(max_height as f64 / src_height);
    let width = (src_width * scale).round().clamp(1.0, max_width as f64) as u32;
    let height = (src_height * scale).round().clamp(1.0, max_height as f64) as u32;
    (width, height)
}

pub fn render_thumbnail(
    source: &ThumbnailSource,
    max_width: u32,
    max_height: u32,
) -> Result<RenderedThumbnail, ExtractionError> {
    if max_width == 0 || max_height == 0 {
        return Err(ExtractionError::Thumbnail(format!(
            "invalid thumbnail box {}x{}",
            max_width, max_height
        )));
    }

    let image = match source {
        ThumbnailSource::Jpeg(bytes) => {
            let decoded = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
                .map_err(|e| ExtractionError::Thumbnail(format!("embedded image: {}", e)))?;
            decoded.thumbnail(max_width, max_height)
        }
        ThumbnailSource::Blank {
            page_width,
            page_height,
        } => {
            let (w, h) = fit_within(*page_width, *page_height, max_width, max_height);
            DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([255, 255, 255])))
        }
    };

    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| ExtractionError::Thumbnail(e.to_string()))?;

    Ok(RenderedThumbnail {
        png,
        width: image.width(),
        height: image.height(),
    })
}
