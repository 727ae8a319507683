//! Thumbnail decoding: service payload → PNG on disk.
//!
//! The thumbnail service answers in one of two shapes:
//!
//! ```json
//! { "kind": "png", "data": "<base64 PNG>" }
//! { "kind": "raw", "data": "<base64 RGBA>", "width": 160, "height": 128 }
//! ```
//!
//! Raw payloads carry no header, so the declared dimensions are the only way
//! to rebuild the bitmap. Both shapes end up as the same PNG artifact.

use crate::error::ArtifactError;
use crate::pipeline::encode::write_png;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, RgbaImage};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// File name of the thumbnail inside a record's work directory.
pub const THUMBNAIL_FILE: &str = "thumbnail.png";

/// Wire format of the thumbnail endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailPayload {
    pub kind: String,
    pub data: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// A thumbnail after transport decoding, before it becomes a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThumbnailImage {
    /// A self-describing encoded image (PNG, JPEG).
    Encoded(Vec<u8>),
    /// Headerless 8-bit RGBA pixels.
    Raw {
        width: u32,
        height: u32,
        rgba: Vec<u8>,
    },
}

impl ThumbnailPayload {
    /// Decode the base64 body and classify it by `kind`.
    ///
    /// Any kind other than an encoded image format is treated as raw RGBA and
    /// must declare its dimensions.
    pub fn decode(self) -> Result<ThumbnailImage, ArtifactError> {
        let bytes = STANDARD
            .decode(self.data.trim())
            .map_err(|e| ArtifactError::Payload(format!("invalid base64: {e}")))?;

        match self.kind.to_ascii_lowercase().as_str() {
            "png" | "jpeg" | "jpg" => Ok(ThumbnailImage::Encoded(bytes)),
            _ => match (self.width, self.height) {
                (Some(width), Some(height)) => Ok(ThumbnailImage::Raw {
                    width,
                    height,
                    rgba: bytes,
                }),
                _ => Err(ArtifactError::Payload(format!(
                    "kind '{}' requires width and height",
                    self.kind
                ))),
            },
        }
    }
}

impl ThumbnailImage {
    /// Rebuild the bitmap.
    pub fn into_image(self) -> Result<DynamicImage, ArtifactError> {
        match self {
            ThumbnailImage::Encoded(bytes) => Ok(image::load_from_memory(&bytes)?),
            ThumbnailImage::Raw {
                width,
                height,
                rgba,
            } => {
                let expected = width as usize * height as usize * 4;
                let actual = rgba.len();
                RgbaImage::from_raw(width, height, rgba)
                    .map(DynamicImage::ImageRgba8)
                    .ok_or(ArtifactError::RawSizeMismatch {
                        width,
                        height,
                        expected,
                        actual,
                    })
            }
        }
    }
}

/// Decode a thumbnail and write it as PNG to `path`.
pub fn save_thumbnail(thumbnail: ThumbnailImage, path: &Path) -> Result<(), ArtifactError> {
    let img = thumbnail.into_image()?;
    debug!("Saving {}x{} thumbnail to {}", img.width(), img.height(), path.display());
    write_png(&img, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::encode::encode_png;
    use image::Rgba;

    fn checkerboard() -> RgbaImage {
        RgbaImage::from_fn(4, 3, |x, y| {
            if (x + y) % 2 == 0 {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        })
    }

    #[test]
    fn both_payload_shapes_produce_the_same_png() {
        let dir = tempfile::tempdir().unwrap();
        let source = checkerboard();

        let encoded = ThumbnailPayload {
            kind: "png".into(),
            data: STANDARD.encode(encode_png(&DynamicImage::ImageRgba8(source.clone())).unwrap()),
            width: None,
            height: None,
        };
        let raw = ThumbnailPayload {
            kind: "raw".into(),
            data: STANDARD.encode(source.as_raw()),
            width: Some(4),
            height: Some(3),
        };

        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        save_thumbnail(encoded.decode().unwrap(), &a).unwrap();
        save_thumbnail(raw.decode().unwrap(), &b).unwrap();

        let a = image::open(&a).unwrap().to_rgba8();
        let b = image::open(&b).unwrap().to_rgba8();
        assert_eq!((a.width(), a.height()), (4, 3));
        assert_eq!(a, b);
        assert_eq!(a, source);
    }

    #[test]
    fn raw_without_dimensions_is_rejected() {
        let payload = ThumbnailPayload {
            kind: "raw".into(),
            data: STANDARD.encode([0u8; 16]),
            width: None,
            height: Some(2),
        };
        assert!(matches!(payload.decode(), Err(ArtifactError::Payload(_))));
    }

    #[test]
    fn raw_with_wrong_length_is_rejected() {
        let img = ThumbnailImage::Raw {
            width: 2,
            height: 2,
            rgba: vec![0; 15],
        };
        assert!(matches!(
            img.into_image(),
            Err(ArtifactError::RawSizeMismatch { expected: 16, actual: 15, .. })
        ));
    }

    #[test]
    fn bad_base64_is_rejected() {
        let payload = ThumbnailPayload {
            kind: "png".into(),
            data: "not base64!!".into(),
            width: None,
            height: None,
        };
        assert!(payload.decode().is_err());
    }

    #[test]
    fn payload_deserialises_from_service_json() {
        let p: ThumbnailPayload =
            serde_json::from_str(r#"{"kind":"raw","data":"AAAA","width":1,"height":1}"#).unwrap();
        assert_eq!(p.width, Some(1));
        let p: ThumbnailPayload = serde_json::from_str(r#"{"kind":"png","data":""}"#).unwrap();
        assert_eq!(p.height, None);
    }
}
