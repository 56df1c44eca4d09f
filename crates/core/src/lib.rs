//! Mentor Core Library
//!
//! Foundational utilities shared by every Mentor crate:
//! - Error handling (`AppError`, `AppResult`)
//! - Logging infrastructure
//! - Process-wide configuration

pub mod config;
pub mod error;
pub mod logging;

pub use config::AppConfig;
pub use error::{AppError, AppResult};
