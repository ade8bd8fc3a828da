/// Asset Service Library
///
/// Manages project image assets across a remote blob store and a relational
/// index, keeping the two consistent through create, rotate, delete, reorder
/// and cover selection.
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{AppError, Result};
