//! Cadenza graph - the pull-based audio node layer.
//!
//! An audio graph is a tree of streaming transforms over interleaved f32
//! PCM, rooted at a hardware output. Every node implements [`AudioNode`]:
//! a pull-based `read` that always advances, a completion signal, and a set
//! of optional operations a composite node delegates to its single input.
//!
//! # Threading model
//!
//! The graph is always touched by exactly two threads: the control (main)
//! thread and the audio callback thread. Coordination is lock-minimized and
//! fail-fast rather than blocking:
//!
//! - nodes are `Arc`-shared and use interior mutability, so every trait
//!   method takes `&self`;
//! - the single-input reference of a composite node lives in an
//!   [`InputSlot`], swapped atomically so the audio thread observes either
//!   the old or the new input in full, never a torn update;
//! - parameters cross threads as lock-free atomic scalars (see
//!   [`AtomicF32`]) with a dirty flag drained at the next `read`;
//! - the only mutex on the audio path guards in-memory filter state for a
//!   duration bounded by the DSP work itself.
//!
//! Each node has exactly one concurrent reader (the graph is a tree), so no
//! node needs read-versus-read synchronization, only read-versus-parameter.

pub mod node;
pub mod param;
pub mod reverb;

pub use node::{AudioNode, GraphError, InputSlot, NodeCore, SharedNode};
pub use param::AtomicF32;
pub use reverb::ReverbNode;

// The settings struct crosses the dsp/graph boundary; re-export it so graph
// users can configure a reverb without naming the dsp crate.
pub use cadenza_dsp::ReverbSettings;
