use image::imageops::FilterType;
use image::ImageFormat;
use std::io::Cursor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("Image is empty")]
    Empty,
    #[error("Image could not be processed: {0}")]
    Image(#[from] image::ImageError),
}

/// Image codec collaborator: decode arbitrary icon bytes, produce a square
/// thumbnail.
pub trait Thumbnailer: Send + Sync {
    /// A `size`×`size` image cropped to fill (aspect preserved), encoded as PNG.
    fn thumbnail(&self, bytes: &[u8], size: u32) -> Result<Vec<u8>, ThumbnailError>;
}

/// [`Thumbnailer`] backed by the `image` crate. Reads PNG, JPEG, GIF, ICO
/// and WebP.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageThumbnailer;

impl Thumbnailer for ImageThumbnailer {
    fn thumbnail(&self, bytes: &[u8], size: u32) -> Result<Vec<u8>, ThumbnailError> {
        if bytes.is_empty() || size == 0 {
            return Err(ThumbnailError::Empty);
        }

        let decoded = image::load_from_memory(bytes)?;
        let thumb = decoded.resize_to_fill(size, size, FilterType::Lanczos3);

        let mut out = Cursor::new(Vec::new());
        thumb.write_to(&mut out, ImageFormat::Png)?;
        Ok(out.into_inner())
    }
}

#[cfg(test)]
pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            image::Rgb([255, 0, 0])
        } else {
            image::Rgb([0, 0, 255])
        }
    });
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}
