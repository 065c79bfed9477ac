//! Engine configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Top-level engine configuration, loadable from TOML.
///
/// Every field has a sensible default, so a config file only needs to name
/// what it changes:
///
/// ```toml
/// sample_rate = 44100
/// read_size = 1024
/// pool_capacity = 32
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of audio channels for the output graph.
    pub channels: u8,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Frames gathered per hardware poll.
    pub read_size: u32,
    /// Maximum simultaneously active files in the context's pool.
    pub pool_capacity: usize,
    /// Latency adapter fill buffer size in bytes.
    pub adapter_input_size: usize,
    /// Latency adapter drain size in bytes.
    pub adapter_output_size: usize,
    /// Output device name; the default device when unset.
    pub device: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            channels: 2,
            sample_rate: 48000,
            read_size: 512,
            pool_capacity: 16,
            // One fill per four polls at the default read size:
            // 512 frames * 2 channels * 4 bytes = 4096-byte drains.
            adapter_input_size: 16384,
            adapter_output_size: 4096,
            device: None,
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Save this configuration as TOML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
