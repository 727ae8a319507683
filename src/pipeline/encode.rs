//! Image encoding: `DynamicImage` → PNG file on disk.
//!
//! Every image artifact (thumbnail, screenshot, PCB preview) is normalised to
//! PNG before it reaches the renderer, so the renderer only has to decode one
//! format. PNG is lossless, which keeps pixel-art thumbnails crisp on the
//! thermal printer.

use image::DynamicImage;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// Encode an image as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded {}x{} image → {} bytes PNG", img.width(), img.height(), buf.len());
    Ok(buf)
}

/// Encode an image as PNG and write it to `path`.
pub fn write_png(img: &DynamicImage, path: &Path) -> Result<(), crate::error::ArtifactError> {
    let bytes = encode_png(img)?;
    std::fs::write(path, bytes)?;
    Ok(())
}
