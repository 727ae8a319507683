//! QR-code generation for receipt links.

use crate::error::ArtifactError;
use image::{DynamicImage, Luma};
use qrcode::QrCode;
use std::path::Path;

/// Minimum edge length of a generated code, in pixels.
const MIN_EDGE_PX: u32 = 240;

/// Encode `target` as a QR code image.
///
/// Deterministic: the same target always yields the same pixels.
pub fn qr_image(target: &str) -> Result<DynamicImage, ArtifactError> {
    if target.trim().is_empty() {
        return Err(ArtifactError::EmptyTarget);
    }
    let code = QrCode::new(target.as_bytes()).map_err(|e| ArtifactError::Qr(e.to_string()))?;
    let img = code
        .render::<Luma<u8>>()
        .min_dimensions(MIN_EDGE_PX, MIN_EDGE_PX)
        .quiet_zone(true)
        .build();
    Ok(DynamicImage::ImageLuma8(img))
}

/// Encode `target` and write the PNG to `path`.
pub fn write_qr_png(target: &str, path: &Path) -> Result<(), ArtifactError> {
    let img = qr_image(target)?;
    img.save_with_format(path, image::ImageFormat::Png)?;
    Ok(())
}
