//! I/O layer for the cadenza audio engine.
//!
//! This crate provides everything that touches the operating system:
//!
//! - **File pool**: [`FilePool`] bounds the number of concurrently held OS
//!   file handles while allowing any number of logically open
//!   [`PooledFile`]s, paging handles in and out with a clock-LRU policy
//! - **Latency adapter**: [`LatencyAdapter`] decouples an asynchronously
//!   filled buffer from fixed-size hardware polls without ever blocking
//!   the polling thread
//! - **Output node**: [`OutputNode`] and [`OutputStream`] bridge the audio
//!   graph to a cpal output device
//! - **WAV streaming**: [`WavSource`] decodes a WAV file through the pool
//!   as a graph node
//! - **Configuration**: [`EngineConfig`] (TOML) and [`AudioContext`], the
//!   explicitly constructed engine context
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use cadenza_io::{AudioContext, EngineConfig, OutputStream, WavSource};
//! use cadenza_graph::ReverbNode;
//! use std::sync::Arc;
//!
//! # fn main() -> cadenza_io::Result<()> {
//! let ctx = AudioContext::new(EngineConfig::default())?;
//!
//! let source = Arc::new(WavSource::open(&ctx, "music.wav")?);
//! let reverb = Arc::new(ReverbNode::new(2, 48000));
//! reverb.set_tail(2.0);
//! reverb.attach(source)?;
//!
//! let output = ctx.create_output();
//! output.attach(reverb)?;
//! let _stream = OutputStream::open(Arc::clone(&output), None)?;
//! # Ok(())
//! # }
//! ```

mod config;
mod context;
mod file_pool;
mod latency;
mod output;
mod wav_source;

pub use config::EngineConfig;
pub use context::AudioContext;
pub use file_pool::{FilePool, OpenMode, PooledFile};
pub use latency::{FillFn, LatencyAdapter};
pub use output::{
    DeviceInfo, OutputNode, OutputStream, default_output_device, list_output_devices,
};
pub use wav_source::WavSource;

/// Error type for engine I/O operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// WAV decode error.
    #[error("WAV file error: {0}")]
    Wav(#[from] hound::Error),

    /// Audio stream setup or runtime error.
    #[error("audio stream error: {0}")]
    Stream(String),

    /// No audio device available on the system.
    #[error("no audio device available")]
    NoDevice,

    /// The requested audio device was not found.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// The device negotiated a sample format this crate cannot feed.
    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// File pools require a non-zero capacity.
    #[error("file pool capacity must be non-zero")]
    BadCapacity,

    /// The pool is at capacity and every active file is in use.
    #[error("file pool has no evictable files")]
    PoolExhausted,

    /// The pool (or this file) has been shut down.
    #[error("file pool has been shut down")]
    PoolClosed,

    /// A file open mode string could not be parsed.
    #[error("invalid open mode: {0:?}")]
    InvalidMode(String),

    /// Latency adapters only add latency; they cannot invent throughput.
    #[error("latency adapter requires input ({input}) >= output ({output})")]
    SizeMismatch {
        /// Requested input (fill) buffer size in bytes.
        input: usize,
        /// Requested output (drain) size in bytes.
        output: usize,
    },

    /// The adapter's background thread is gone.
    #[error("latency adapter thread stopped")]
    AdapterStopped,

    /// Graph composition error (channel or rate mismatch).
    #[error(transparent)]
    Graph(#[from] cadenza_graph::GraphError),

    /// Configuration file could not be parsed.
    #[error("configuration error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration could not be serialized.
    #[error("configuration error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    /// Standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for engine I/O operations.
pub type Result<T> = std::result::Result<T, Error>;
