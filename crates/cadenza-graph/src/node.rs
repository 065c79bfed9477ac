//! The audio node contract and graph composition helpers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use arc_swap::ArcSwapOption;

use crate::param::AtomicF32;

/// A shared, dynamically typed audio node.
pub type SharedNode = Arc<dyn AudioNode>;

/// Errors from graph composition operations.
///
/// Attachment preconditions are programmer errors: they are checked with a
/// debug assertion and surface as an error value in release builds, never
/// silently fixed up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// The input node's channel count does not match the host node.
    #[error("input has {found} channels, host expects {expected}")]
    ChannelMismatch {
        /// Channel count of the host node.
        expected: u8,
        /// Channel count of the offered input.
        found: u8,
    },
    /// The input node's sample rate does not match the host node.
    #[error("input runs at {found} Hz, host expects {expected} Hz")]
    RateMismatch {
        /// Sample rate of the host node.
        expected: u32,
        /// Sample rate of the offered input.
        found: u32,
    },
}

/// The pull contract every node in the audio graph satisfies.
///
/// Nodes are `Arc`-shared between the control thread and the audio thread,
/// so all methods take `&self` and rely on interior mutability. The graph
/// is a tree: each node has at most one downstream reader, and `read` calls
/// on a given node are strictly sequential.
///
/// Buffers are channel-interleaved 32-bit float samples, row-major by
/// frame. A frame is one sample instant across all channels.
pub trait AudioNode: Send + Sync {
    /// The number of audio channels.
    fn channels(&self) -> u8;

    /// The sample rate in Hz.
    fn rate(&self) -> u32;

    /// The typical number of frames requested per `read`.
    ///
    /// Nodes with internal buffers use this to size them ahead of time. The
    /// value propagates down the graph at attach time and is assumed never
    /// to change while the engine is running.
    fn read_size(&self) -> u32;

    /// Set the typical read size, propagating it to any input.
    fn set_read_size(&self, frames: u32);

    /// Read up to `frames` frames into `buffer`.
    ///
    /// AUDIO THREAD ONLY. The buffer must hold at least
    /// `frames * channels` samples. Always advances the read position;
    /// reading again returns different data. Returns the number of frames
    /// actually read, which may be less than requested near the end of a
    /// stream. Errors do not propagate out of the audio path; they degrade
    /// to silence.
    fn read(&self, buffer: &mut [f32], frames: u32) -> u32;

    /// Whether this node will never produce data again.
    ///
    /// A node is typically completed once it returns 0 frames from `read`.
    /// Infinite-running sources may report `true` early as a shutdown
    /// request, slightly before data is technically exhausted.
    fn completed(&self) -> bool;

    /// Pause this node, making it produce silence.
    ///
    /// Returns `true` if the node was running. Takes effect at the next
    /// render pass on the audio thread.
    fn pause(&self) -> bool;

    /// Resume a previously paused node.
    ///
    /// Returns `true` if the node was paused.
    fn resume(&self) -> bool;

    /// Whether this node is currently paused.
    fn is_paused(&self) -> bool;

    /// Mark the current read position.
    ///
    /// DELEGATED: composites forward this to their input; `false` means
    /// there is no input or the input does not support marking.
    fn mark(&self) -> bool {
        false
    }

    /// Clear the current mark.
    ///
    /// DELEGATED: composites forward this to their input.
    fn unmark(&self) -> bool {
        false
    }

    /// Reset the read position to the mark (or stream start, node
    /// depending).
    ///
    /// DELEGATED: composites forward this to their input.
    fn reset(&self) -> bool {
        false
    }

    /// Advance the read position without reading data.
    ///
    /// DELEGATED: returns the frames actually advanced, or `None` when
    /// unsupported.
    fn advance(&self, frames: u32) -> Option<u64> {
        let _ = frames;
        None
    }

    /// The current frame position, where supported.
    fn position(&self) -> Option<u64> {
        None
    }

    /// Move the read position to the given frame.
    ///
    /// DELEGATED: returns the new position, or `None` when unsupported.
    fn set_position(&self, frames: u64) -> Option<u64> {
        let _ = frames;
        None
    }

    /// Elapsed time in seconds, where supported.
    fn elapsed(&self) -> Option<f64> {
        None
    }

    /// Move the read position to an elapsed time in seconds.
    fn set_elapsed(&self, seconds: f64) -> Option<f64> {
        let _ = seconds;
        None
    }

    /// Remaining time in seconds, where supported.
    fn remaining(&self) -> Option<f64> {
        None
    }

    /// Limit the remaining play time in seconds.
    ///
    /// Where supported, the node reports completion after this much more
    /// audio. May or may not move the read head.
    fn set_remaining(&self, seconds: f64) -> Option<f64> {
        let _ = seconds;
        None
    }
}

/// The bookkeeping every concrete node carries: format, read size, pause
/// state and node gain.
///
/// Channel count and sample rate are fixed at construction; the rest are
/// atomics so both threads can touch them without locking.
#[derive(Debug)]
pub struct NodeCore {
    channels: u8,
    rate: u32,
    read_size: AtomicU32,
    paused: AtomicBool,
    gain: AtomicF32,
}

impl NodeCore {
    /// Create the shared state for a node with the given format.
    pub fn new(channels: u8, rate: u32, read_size: u32) -> Self {
        Self {
            channels,
            rate,
            read_size: AtomicU32::new(read_size),
            paused: AtomicBool::new(false),
            gain: AtomicF32::new(1.0),
        }
    }

    /// The number of audio channels.
    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// The sample rate in Hz.
    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// The typical read size in frames.
    pub fn read_size(&self) -> u32 {
        self.read_size.load(Ordering::Relaxed)
    }

    /// Store a new read size.
    pub fn set_read_size(&self, frames: u32) {
        self.read_size.store(frames, Ordering::Relaxed);
    }

    /// Whether the node is paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Pause the node. Returns `true` if it was running.
    pub fn pause(&self) -> bool {
        !self.paused.swap(true, Ordering::Relaxed)
    }

    /// Resume the node. Returns `true` if it was paused.
    pub fn resume(&self) -> bool {
        self.paused.swap(false, Ordering::Relaxed)
    }

    /// The node gain applied to produced audio.
    pub fn gain(&self) -> f32 {
        self.gain.load()
    }

    /// Set the node gain.
    pub fn set_gain(&self, gain: f32) {
        self.gain.store(gain);
    }
}

/// The atomically swappable single-input reference of a composite node.
///
/// Attachment validates that the graph stays homogeneous in channel layout
/// and sample rate along any path. The swap itself is a single atomic
/// pointer exchange, so a concurrent `read` on the audio thread sees either
/// the old input or the new one in full.
///
/// `arc-swap` cannot hold fat `Arc<dyn Trait>` pointers directly, so the
/// slot stores one extra `Arc` of indirection around the shared node.
pub struct InputSlot {
    channels: u8,
    rate: u32,
    slot: ArcSwapOption<SharedNode>,
}

impl InputSlot {
    /// Create an empty slot for a host with the given format.
    pub fn new(channels: u8, rate: u32) -> Self {
        Self {
            channels,
            rate,
            slot: ArcSwapOption::const_empty(),
        }
    }

    /// Attach an input, replacing any current one.
    ///
    /// Fails when the input's channel count or sample rate disagree with
    /// the host; the current input reference is left unchanged in that
    /// case.
    pub fn attach(&self, node: SharedNode) -> Result<(), GraphError> {
        if node.channels() != self.channels {
            debug_assert!(
                false,
                "input node has wrong number of channels: {} vs {}",
                node.channels(),
                self.channels
            );
            return Err(GraphError::ChannelMismatch {
                expected: self.channels,
                found: node.channels(),
            });
        }
        if node.rate() != self.rate {
            debug_assert!(
                false,
                "input node has wrong sample rate: {} vs {}",
                node.rate(),
                self.rate
            );
            return Err(GraphError::RateMismatch {
                expected: self.rate,
                found: node.rate(),
            });
        }

        self.slot.store(Some(Arc::new(node)));
        tracing::debug!(channels = self.channels, rate = self.rate, "input attached");
        Ok(())
    }

    /// Detach the current input, returning it if there was one.
    pub fn detach(&self) -> Option<SharedNode> {
        let detached = self.slot.swap(None).map(|node| SharedNode::clone(&node));
        if detached.is_some() {
            tracing::debug!("input detached");
        }
        detached
    }

    /// Snapshot the current input reference.
    pub fn get(&self) -> Option<SharedNode> {
        self.slot.load_full().map(|node| SharedNode::clone(&node))
    }

    /// Whether an input is currently attached.
    pub fn is_attached(&self) -> bool {
        self.slot.load().is_some()
    }

    /// Run `f` against the current input without cloning the reference.
    ///
    /// Returns `None` when the slot is empty. This is the audio-thread
    /// accessor: a single atomic load, no reference-count churn.
    pub fn with<R>(&self, f: impl FnOnce(&dyn AudioNode) -> R) -> Option<R> {
        let guard = self.slot.load();
        guard.as_ref().map(|node| f(&***node))
    }
}

impl std::fmt::Debug for InputSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputSlot")
            .field("channels", &self.channels)
            .field("rate", &self.rate)
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Minimal nodes shared by the crate's unit tests.

    use super::*;
    use std::sync::atomic::AtomicU64;

    /// Produces a constant value for a fixed number of frames, then
    /// reports completion.
    pub struct FiniteSource {
        core: NodeCore,
        value: f32,
        remaining: AtomicU64,
    }

    impl FiniteSource {
        pub fn new(channels: u8, rate: u32, value: f32, total_frames: u64) -> Self {
            Self {
                core: NodeCore::new(channels, rate, 512),
                value,
                remaining: AtomicU64::new(total_frames),
            }
        }
    }

    impl AudioNode for FiniteSource {
        fn channels(&self) -> u8 {
            self.core.channels()
        }
        fn rate(&self) -> u32 {
            self.core.rate()
        }
        fn read_size(&self) -> u32 {
            self.core.read_size()
        }
        fn set_read_size(&self, frames: u32) {
            self.core.set_read_size(frames);
        }

        fn read(&self, buffer: &mut [f32], frames: u32) -> u32 {
            let left = self.remaining.load(Ordering::Relaxed);
            let take = u64::from(frames).min(left) as u32;
            let samples = take as usize * usize::from(self.core.channels());
            buffer[..samples].fill(self.value);
            self.remaining.store(left - u64::from(take), Ordering::Relaxed);
            take
        }

        fn completed(&self) -> bool {
            self.remaining.load(Ordering::Relaxed) == 0
        }

        fn pause(&self) -> bool {
            self.core.pause()
        }
        fn resume(&self) -> bool {
            self.core.resume()
        }
        fn is_paused(&self) -> bool {
            self.core.is_paused()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FiniteSource;
    use super::*;

    #[test]
    fn test_attach_rejects_channel_mismatch() {
        let slot = InputSlot::new(2, 48000);
        let mono: SharedNode = Arc::new(FiniteSource::new(1, 48000, 0.5, 100));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            slot.attach(mono)
        }));
        // Debug builds assert; release builds return the error. Either way
        // the slot must be left unchanged.
        if let Ok(outcome) = result {
            assert_eq!(
                outcome,
                Err(GraphError::ChannelMismatch {
                    expected: 2,
                    found: 1
                })
            );
        }
        assert!(!slot.is_attached());
    }

    #[test]
    fn test_attach_rejects_rate_mismatch() {
        let slot = InputSlot::new(2, 48000);
        let wrong: SharedNode = Arc::new(FiniteSource::new(2, 44100, 0.5, 100));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            slot.attach(wrong)
        }));
        if let Ok(outcome) = result {
            assert_eq!(
                outcome,
                Err(GraphError::RateMismatch {
                    expected: 48000,
                    found: 44100
                })
            );
        }
        assert!(!slot.is_attached());
    }

    #[test]
    fn test_attach_detach_round_trip() {
        let slot = InputSlot::new(2, 48000);
        let node: SharedNode = Arc::new(FiniteSource::new(2, 48000, 0.5, 100));

        slot.attach(Arc::clone(&node)).unwrap();
        assert!(slot.is_attached());

        let detached = slot.detach().expect("input should be attached");
        assert!(Arc::ptr_eq(&detached, &node));
        assert!(!slot.is_attached());
        assert!(slot.detach().is_none());
    }

    #[test]
    fn test_with_reads_through_slot() {
        let slot = InputSlot::new(1, 48000);
        assert!(slot.with(|_| ()).is_none());

        let node: SharedNode = Arc::new(FiniteSource::new(1, 48000, 0.25, 64));
        slot.attach(node).unwrap();

        let mut buffer = [0.0f32; 16];
        let read = slot.with(|n| n.read(&mut buffer, 16)).unwrap();
        assert_eq!(read, 16);
        assert!(buffer.iter().all(|&s| s == 0.25));
    }

    #[test]
    fn test_node_core_pause_resume() {
        let core = NodeCore::new(2, 48000, 512);
        assert!(!core.is_paused());
        assert!(core.pause());
        assert!(!core.pause());
        assert!(core.is_paused());
        assert!(core.resume());
        assert!(!core.resume());
    }

    #[test]
    fn test_finite_source_exhaustion() {
        let source = FiniteSource::new(2, 48000, 1.0, 24);
        let mut buffer = [0.0f32; 64];

        assert_eq!(source.read(&mut buffer, 16), 16);
        assert!(!source.completed());
        assert_eq!(source.read(&mut buffer, 16), 8);
        assert!(source.completed());
        assert_eq!(source.read(&mut buffer, 16), 0);
    }
}
