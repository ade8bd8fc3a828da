//! Image transform pipeline
//!
//! Decoding, orientation normalization, resizing, rotation and re-encoding.
//! All functions here are pure; [`ImageProcessor`] moves them onto the
//! blocking thread pool.

mod processor;

pub use processor::{
    transform, ImageProcessor, Rotation, TransformConfig, TransformParams, Transformed,
};

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("failed to encode image: {0}")]
    Encode(String),
}
