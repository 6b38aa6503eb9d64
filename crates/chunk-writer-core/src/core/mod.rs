//! Core application components
//!
//! This module contains configuration and logging shared by every other
//! module in the crate.

/// Client-side configuration (block size, default timeouts).
pub mod config;

/// Logging macros (`log_info!`, `log_warn!`, ...).
pub mod logging;

// Re-export commonly used items
pub use config::Config;
