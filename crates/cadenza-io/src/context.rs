//! The engine context.
//!
//! Everything that would otherwise be process-global state lives here as
//! an explicitly constructed value: the shared file pool and the engine
//! configuration. Subsystem entry points take the context by reference;
//! there are no hidden statics anywhere in the engine, and shutdown is
//! just dropping the context.

use std::sync::Arc;

use crate::{EngineConfig, FilePool, FillFn, LatencyAdapter, OutputNode, Result};

/// Explicitly owned engine context: configuration plus the shared file
/// pool.
///
/// Typically created once at startup by the application object and passed
/// down to whatever opens files or builds graph endpoints.
#[derive(Debug)]
pub struct AudioContext {
    config: EngineConfig,
    pool: FilePool,
}

impl AudioContext {
    /// Create a context from the given configuration.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let pool = FilePool::with_capacity(config.pool_capacity)?;
        tracing::info!(
            channels = config.channels,
            sample_rate = config.sample_rate,
            read_size = config.read_size,
            pool_capacity = config.pool_capacity,
            "audio context created"
        );
        Ok(Self { config, pool })
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The shared file pool.
    pub fn pool(&self) -> &FilePool {
        &self.pool
    }

    /// Create an output node sized from the configuration.
    pub fn create_output(&self) -> Arc<OutputNode> {
        Arc::new(OutputNode::new(
            self.config.channels,
            self.config.sample_rate,
            self.config.read_size,
        ))
    }

    /// Create a latency adapter sized from the configuration.
    pub fn create_latency_adapter(&self, callback: Option<FillFn>) -> Result<LatencyAdapter> {
        LatencyAdapter::new(
            self.config.adapter_input_size,
            self.config.adapter_output_size,
            callback,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_wires_config_through() {
        let config = EngineConfig {
            pool_capacity: 3,
            channels: 1,
            ..EngineConfig::default()
        };
        let ctx = AudioContext::new(config).unwrap();
        assert_eq!(ctx.pool().capacity(), 3);

        let output = ctx.create_output();
        assert_eq!(cadenza_graph::AudioNode::channels(&*output), 1);
    }

    #[test]
    fn test_context_rejects_zero_pool() {
        let config = EngineConfig {
            pool_capacity: 0,
            ..EngineConfig::default()
        };
        assert!(AudioContext::new(config).is_err());
    }

    #[test]
    fn test_context_builds_adapter() {
        let ctx = AudioContext::new(EngineConfig::default()).unwrap();
        let adapter = ctx.create_latency_adapter(None).unwrap();
        assert!(adapter.is_paused());
        assert_eq!(adapter.input_size(), 16384);
    }
}
