//! Image processor - normalizes uploads and re-renders rotations
//!
//! Every output is a baseline JPEG without metadata: orientation is baked
//! into the pixels, width is capped, and quality is fixed by configuration.
//!
//! CPU-bound work runs under `spawn_blocking`.

use super::TransformError;
use crate::error::Result;
use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageOutputFormat};
use std::io::Cursor;
use std::sync::Arc;
use tracing::debug;

/// Extra clockwise rotation applied after orientation normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    /// Accepts any multiple of 90, negative values turning counter-clockwise.
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        if degrees % 90 != 0 {
            return None;
        }
        match degrees.rem_euclid(360) {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Cw90),
            180 => Some(Rotation::Cw180),
            270 => Some(Rotation::Cw270),
            _ => None,
        }
    }

    fn apply(self, img: DynamicImage) -> DynamicImage {
        match self {
            Rotation::None => img,
            Rotation::Cw90 => img.rotate90(),
            Rotation::Cw180 => img.rotate180(),
            Rotation::Cw270 => img.rotate270(),
        }
    }
}

/// Parameters of a single transform run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformParams {
    pub normalize_orientation: bool,
    /// Downscale to this width, keeping aspect ratio. Never upscales.
    pub max_width: Option<u32>,
    pub rotation: Rotation,
    /// JPEG quality (1-100)
    pub quality: u8,
}

/// Encoded output
#[derive(Debug)]
pub struct Transformed {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

/// Run the pipeline on raw bytes.
pub fn transform(
    original: &[u8],
    params: &TransformParams,
) -> std::result::Result<Transformed, TransformError> {
    let mut img =
        image::load_from_memory(original).map_err(|e| TransformError::Decode(e.to_string()))?;

    let (orig_w, orig_h) = img.dimensions();
    debug!(
        original_width = orig_w,
        original_height = orig_h,
        size = original.len(),
        "Transforming image"
    );

    if params.normalize_orientation {
        if let Some(tag) = exif_orientation(original) {
            img = upright(img, tag);
        }
    }

    if let Some(max_width) = params.max_width {
        let (w, h) = img.dimensions();
        if w > max_width && max_width > 0 {
            let new_h = ((h as f64) * (max_width as f64) / (w as f64)).round().max(1.0) as u32;
            img = img.resize_exact(max_width, new_h, FilterType::Triangle);
        }
    }

    img = params.rotation.apply(img);

    let (width, height) = img.dimensions();
    let data = encode_jpeg(&img, params.quality)?;

    debug!(width, height, size = data.len(), "Image transformed");

    Ok(Transformed {
        data,
        width,
        height,
    })
}

/// EXIF orientation tag (0x0112) of the primary image, if any.
fn exif_orientation(data: &[u8]) -> Option<u32> {
    let exif = exif::Reader::new()
        .read_from_container(&mut Cursor::new(data))
        .ok()?;
    exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?
        .value
        .get_uint(0)
}

/// Bake an EXIF orientation into the pixels. Tags 5 and 7 are the mirrored
/// variants of 6 and 8; unknown tags leave the image as stored.
fn upright(img: DynamicImage, tag: u32) -> DynamicImage {
    match tag {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Encode as JPEG. Alpha is dropped since JPEG cannot carry it.
fn encode_jpeg(img: &DynamicImage, quality: u8) -> std::result::Result<Bytes, TransformError> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Jpeg(quality))
        .map_err(|e| TransformError::Encode(e.to_string()))?;
    Ok(Bytes::from(buf))
}

/// Configuration for upload normalization
#[derive(Clone, Debug)]
pub struct TransformConfig {
    pub max_width: u32,
    pub quality: u8,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            max_width: 1080,
            quality: 75,
        }
    }
}

/// Image processor
pub struct ImageProcessor {
    config: TransformConfig,
}

impl ImageProcessor {
    pub fn new(config: TransformConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(TransformConfig::default())
    }

    /// Parameters for a fresh upload: upright, width-capped.
    pub fn upload_params(&self) -> TransformParams {
        TransformParams {
            normalize_orientation: true,
            max_width: Some(self.config.max_width),
            rotation: Rotation::None,
            quality: self.config.quality,
        }
    }

    /// Parameters for re-rendering a stored image with an extra rotation.
    pub fn rotation_params(&self, rotation: Rotation) -> TransformParams {
        TransformParams {
            normalize_orientation: true,
            max_width: None,
            rotation,
            quality: self.config.quality,
        }
    }

    /// Run `transform` on the blocking thread pool.
    pub async fn run(self: Arc<Self>, original: Bytes, params: TransformParams) -> Result<Transformed> {
        let transformed =
            tokio::task::spawn_blocking(move || transform(&original, &params)).await??;
        Ok(transformed)
    }
}
