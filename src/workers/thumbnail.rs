//! Image decoding and JPEG thumbnail rendering.

use std::io::Cursor;

use bytes::Bytes;
use image::{ImageFormat, Rgb, RgbImage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Thumbnail task failed: {0}")]
    Task(String),
}

/// Render `data` as a JPEG that fits inside a `size` x `size` box, keeping
/// the aspect ratio. Decoding runs on the blocking pool.
pub async fn generate(data: Bytes, size: u32) -> Result<Bytes, ThumbnailError> {
    tokio::task::spawn_blocking(move || render(&data, size))
        .await
        .map_err(|e| ThumbnailError::Task(e.to_string()))?
}

fn render(data: &[u8], size: u32) -> Result<Bytes, ThumbnailError> {
    let image = image::load_from_memory(data)?;
    let thumbnail = image.thumbnail(size, size).to_rgb8();

    let mut out = Cursor::new(Vec::new());
    thumbnail.write_to(&mut out, ImageFormat::Jpeg)?;
    Ok(Bytes::from(out.into_inner()))
}

/// The neutral grey square served for files that have no thumbnail.
pub fn placeholder(size: u32) -> Result<Bytes, ThumbnailError> {
    let image = RgbImage::from_pixel(size, size, Rgb([0xd9, 0xd9, 0xd9]));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png)?;
    Ok(Bytes::from(out.into_inner()))
}
