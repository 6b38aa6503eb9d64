//! Configuration for the chunk write pipeline
//!
//! This module handles the small set of operator-tunable knobs the client
//! side of the pipeline needs: the system block size, and the default
//! timeouts handed to `ChunkWriter::init` / `finish` when the upper layer
//! doesn't supply its own.

use serde::{Deserialize, Serialize};

/// Main configuration structure for the chunk write pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Write-path configuration.
    pub write: WriteConfig,
}

/// Write-path configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteConfig {
    /// Block size `B`, in bytes. Fixed at 64 KiB for interoperability with
    /// the storage servers unless overridden for testing.
    pub block_size: u32,

    /// Default timeout (ms) for `ChunkWriter::init` (chain connect + lock).
    pub init_timeout_ms: u32,

    /// Default timeout (ms) for `ChunkWriter::finish` (drain + unlock).
    pub finish_timeout_ms: u32,

    /// Default timeout (ms) for a single `processOperations` call.
    pub poll_timeout_ms: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            write: WriteConfig::default(),
        }
    }
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            block_size: crate::constants::BLOCK_SIZE as u32,
            init_timeout_ms: 5_000,
            finish_timeout_ms: 10_000,
            poll_timeout_ms: 100,
        }
    }
}

/// Load configuration from a TOML file.
pub fn load_config(path: &str) -> Result<Config, Box<dyn std::error::Error>> {
    let config_str = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&config_str)?;
    Ok(config)
}

/// Load configuration from a file, falling back to defaults when no path is
/// given or the file can't be read/parsed.
pub fn load_config_or_default(path: Option<&str>) -> Config {
    match path {
        Some(path) => match load_config(path) {
            Ok(config) => {
                tracing::info!("Loaded configuration from: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("Failed to load config from {}: {}. Using defaults.", path, e);
                Config::default()
            }
        },
        None => {
            tracing::info!("No config file specified, using defaults");
            Config::default()
        }
    }
}
