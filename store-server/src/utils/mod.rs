//! Shared utilities: error envelope and logging

pub mod error;
pub mod logger;

pub use error::{ok, AppError, AppResponse};
