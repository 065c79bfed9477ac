//! Algorithmic reverb node.
//!
//! Wraps the [`ReverbBank`] from `cadenza-dsp` in the graph's concurrency
//! envelope: lock-free parameter setters on the control thread, a dirty
//! flag drained once per `read` on the audio thread, and a tail fade-out
//! that lets the echo ring past the end of the input.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use cadenza_dsp::{ReverbBank, ReverbSettings, ramp_gain, scale};

use crate::node::{AudioNode, GraphError, InputSlot, NodeCore, SharedNode};
use crate::param::AtomicF32;

/// Filter state owned by the audio thread, behind the node's mutex.
struct ReverbState {
    bank: ReverbBank,
    /// Configured tail length in frames; 0 means no tail.
    outmark: u64,
    /// Frames of tail still to produce once the input runs dry.
    fadeout: u64,
}

/// An audio node applying Freeverb-style reverb to its input stream.
///
/// Parameter setters write atomic scalars and raise a dirty flag; they
/// never block on the audio thread. The `read` path snapshots all
/// parameters at most once per call and pushes them into the filter bank,
/// so a burst of writes between two reads collapses into a single
/// coefficient recomputation.
///
/// # Tail fade-out
///
/// A reverb is technically complete when its input completes, but that cuts
/// long echoes dead. With a tail configured via
/// [`set_tail`](Self::set_tail), the node keeps feeding silence through the
/// filter once the input runs dry, ramping the output linearly to zero over
/// the tail duration, and only then reports [`completed`](AudioNode::completed).
/// Do not configure a tail on sounds meant to loop seamlessly.
pub struct ReverbNode {
    core: NodeCore,
    input: InputSlot,
    wet: AtomicF32,
    dry: AtomicF32,
    room_size: AtomicF32,
    damping: AtomicF32,
    width: AtomicF32,
    input_gain: AtomicF32,
    dirty: AtomicBool,
    outdone: AtomicBool,
    state: Mutex<ReverbState>,
}

impl ReverbNode {
    /// Create a reverb node with default Freeverb settings.
    pub fn new(channels: u8, rate: u32) -> Self {
        Self::with_settings(channels, rate, &ReverbSettings::default())
    }

    /// Create a reverb node with the given initial settings.
    pub fn with_settings(channels: u8, rate: u32, settings: &ReverbSettings) -> Self {
        Self {
            core: NodeCore::new(channels, rate, 512),
            input: InputSlot::new(channels, rate),
            wet: AtomicF32::new(settings.wet),
            dry: AtomicF32::new(settings.dry),
            room_size: AtomicF32::new(settings.room_size),
            damping: AtomicF32::new(settings.damping),
            width: AtomicF32::new(settings.width),
            input_gain: AtomicF32::new(settings.input_gain),
            dirty: AtomicBool::new(false),
            outdone: AtomicBool::new(false),
            state: Mutex::new(ReverbState {
                bank: ReverbBank::new(settings, rate, channels),
                outmark: 0,
                fadeout: 0,
            }),
        }
    }

    /// Attach the node whose stream gets reverberated.
    pub fn attach(&self, node: SharedNode) -> Result<(), GraphError> {
        self.input.attach(std::sync::Arc::clone(&node))?;
        if node.read_size() != self.core.read_size() {
            node.set_read_size(self.core.read_size());
        }
        Ok(())
    }

    /// Detach the current input, clearing the filter tail.
    pub fn detach(&self) -> Option<SharedNode> {
        let detached = self.input.detach();
        if let Ok(mut state) = self.state.lock() {
            state.bank.reset();
        }
        detached
    }

    /// Snapshot the current input reference.
    pub fn get_input(&self) -> Option<SharedNode> {
        self.input.get()
    }

    /// Clear all filter state without touching parameters.
    pub fn clear(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.bank.reset();
        }
    }

    /// Set the room size (0 to 1). Lock-free.
    pub fn set_room_size(&self, value: f32) {
        self.room_size.store(value);
        self.dirty.store(true, Ordering::Relaxed);
    }

    /// The current room size.
    pub fn room_size(&self) -> f32 {
        self.room_size.load()
    }

    /// Set the damping (0 to 1). Lock-free.
    pub fn set_damp(&self, value: f32) {
        self.damping.store(value);
        self.dirty.store(true, Ordering::Relaxed);
    }

    /// The current damping.
    pub fn damp(&self) -> f32 {
        self.damping.load()
    }

    /// Set the wet mix level (0 to 1). Lock-free.
    pub fn set_wet(&self, value: f32) {
        self.wet.store(value);
        self.dirty.store(true, Ordering::Relaxed);
    }

    /// The current wet mix level.
    pub fn wet(&self) -> f32 {
        self.wet.load()
    }

    /// Set the dry mix level (0 to 1). Lock-free.
    pub fn set_dry(&self, value: f32) {
        self.dry.store(value);
        self.dirty.store(true, Ordering::Relaxed);
    }

    /// The current dry mix level.
    pub fn dry(&self) -> f32 {
        self.dry.load()
    }

    /// Set the stereo width of the wet mix (0 to 1). Lock-free.
    pub fn set_width(&self, value: f32) {
        self.width.store(value);
        self.dirty.store(true, Ordering::Relaxed);
    }

    /// The current stereo width.
    pub fn width(&self) -> f32 {
        self.width.load()
    }

    /// Set the gain applied to the downmixed filter input. Lock-free.
    pub fn set_input_gain(&self, value: f32) {
        self.input_gain.store(value);
        self.dirty.store(true, Ordering::Relaxed);
    }

    /// The current filter input gain.
    pub fn input_gain(&self) -> f32 {
        self.input_gain.load()
    }

    /// Set the node gain applied to produced audio. Lock-free.
    pub fn set_gain(&self, gain: f32) {
        self.core.set_gain(gain);
    }

    /// The node gain.
    pub fn gain(&self) -> f32 {
        self.core.gain()
    }

    /// Configure the fade-out tail, in seconds.
    ///
    /// A zero (or negative) duration disables the tail: the node then
    /// completes the instant its input does. Resets any fade already in
    /// progress.
    pub fn set_tail(&self, seconds: f64) {
        if let Ok(mut state) = self.state.lock() {
            state.outmark = (seconds.max(0.0) * f64::from(self.core.rate())) as u64;
            state.fadeout = 0;
            self.outdone.store(false, Ordering::Relaxed);
        }
    }

    /// The configured fade-out tail in seconds.
    pub fn tail(&self) -> f64 {
        self.state
            .lock()
            .map(|state| state.outmark as f64 / f64::from(self.core.rate()))
            .unwrap_or(0.0)
    }

    /// One settings snapshot from the atomic parameters.
    fn snapshot(&self) -> ReverbSettings {
        ReverbSettings {
            wet: self.wet.load(),
            dry: self.dry.load(),
            room_size: self.room_size.load(),
            damping: self.damping.load(),
            width: self.width.load(),
            input_gain: self.input_gain.load(),
        }
    }

    #[cfg(test)]
    fn bank_revisions(&self) -> u64 {
        self.state.lock().map(|s| s.bank.revisions()).unwrap_or(0)
    }
}

impl AudioNode for ReverbNode {
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
        if self.core.read_size() != frames {
            self.core.set_read_size(frames);
            if let Some(input) = self.input.get() {
                input.set_read_size(frames);
            }
        }
    }

    fn read(&self, buffer: &mut [f32], frames: u32) -> u32 {
        let channels = usize::from(self.core.channels());
        let Ok(mut state) = self.state.lock() else {
            buffer[..frames as usize * channels].fill(0.0);
            return frames;
        };

        if self.dirty.swap(false, Ordering::Relaxed) {
            let settings = self.snapshot();
            state.bank.update(&settings);
        }

        let input = self.input.get();
        let gain = self.core.gain();

        if input.is_none() || self.core.is_paused() {
            buffer[..frames as usize * channels].fill(0.0);
            return frames;
        }

        if state.fadeout > 0 {
            // FADING: feed silence through the filter and ramp the tail.
            let take = u64::from(frames).min(state.fadeout) as u32;
            let samples = take as usize * channels;
            buffer[..samples].fill(0.0);

            let start = state.fadeout as f32 / state.outmark as f32;
            let end = (state.fadeout - u64::from(take)) as f32 / state.outmark as f32;
            state.fadeout -= u64::from(take);
            self.outdone.store(state.fadeout == 0, Ordering::Relaxed);

            state.bank.process(&mut buffer[..samples], take as usize);
            ramp_gain(&mut buffer[..samples], channels, start, end);
            if gain != 1.0 {
                scale(&mut buffer[..samples], gain);
            }
            return take;
        }

        if self.outdone.load(Ordering::Relaxed) {
            return 0;
        }

        // STREAMING: pull from the input, then check for exhaustion.
        let Some(input) = input else {
            return 0;
        };
        let mut actual = input.read(buffer, frames);
        let fade_from = actual;

        if actual < frames || input.completed() {
            if state.outmark > 0 {
                // Append up to a full request of silence so the tail can
                // start ringing inside this same read.
                let remain =
                    u64::from(frames - actual).min(state.outmark) as u32;
                let offset = actual as usize * channels;
                buffer[offset..offset + remain as usize * channels].fill(0.0);
                actual += remain;
                state.fadeout = state.outmark - u64::from(remain);
                self.outdone.store(state.fadeout == 0, Ordering::Relaxed);
            } else {
                self.outdone.store(true, Ordering::Relaxed);
            }
        }

        let samples = actual as usize * channels;
        state.bank.process(&mut buffer[..samples], actual as usize);

        if fade_from < actual {
            // Ramp the appended tail frames; data pulled from the input
            // stays at full level.
            let tail = (actual - fade_from) as usize * channels;
            let start = (state.fadeout + u64::from(actual - fade_from)) as f32
                / state.outmark as f32;
            let end = state.fadeout as f32 / state.outmark as f32;
            ramp_gain(&mut buffer[samples - tail..samples], channels, start, end);
        }
        if gain != 1.0 {
            scale(&mut buffer[..samples], gain);
        }
        actual
    }

    fn completed(&self) -> bool {
        match self.input.get() {
            Some(input) => input.completed() && self.outdone.load(Ordering::Relaxed),
            None => true,
        }
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

    fn mark(&self) -> bool {
        self.input.with(|input| input.mark()).unwrap_or(false)
    }

    fn unmark(&self) -> bool {
        self.input.with(|input| input.unmark()).unwrap_or(false)
    }

    fn reset(&self) -> bool {
        if let Ok(mut state) = self.state.lock() {
            state.fadeout = 0;
        }
        self.outdone.store(false, Ordering::Relaxed);
        self.input.with(|input| input.reset()).unwrap_or(false)
    }

    fn advance(&self, frames: u32) -> Option<u64> {
        self.input.with(|input| input.advance(frames)).flatten()
    }

    fn position(&self) -> Option<u64> {
        self.input.with(|input| input.position()).flatten()
    }

    fn set_position(&self, frames: u64) -> Option<u64> {
        self.input.with(|input| input.set_position(frames)).flatten()
    }

    fn elapsed(&self) -> Option<f64> {
        self.input.with(|input| input.elapsed()).flatten()
    }

    fn set_elapsed(&self, seconds: f64) -> Option<f64> {
        self.input.with(|input| input.set_elapsed(seconds)).flatten()
    }

    fn remaining(&self) -> Option<f64> {
        // The tail extends whatever the input reports.
        let tail = self.tail();
        self.input
            .with(|input| input.remaining())
            .flatten()
            .map(|secs| secs + tail)
    }

    fn set_remaining(&self, seconds: f64) -> Option<f64> {
        let tail = self.tail();
        self.input
            .with(|input| input.set_remaining(seconds - tail))
            .flatten()
    }
}

impl std::fmt::Debug for ReverbNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReverbNode")
            .field("channels", &self.core.channels())
            .field("rate", &self.core.rate())
            .field("settings", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::testing::FiniteSource;
    use std::sync::Arc;

    fn reverb_with_source(total_frames: u64, tail_secs: f64) -> ReverbNode {
        let reverb = ReverbNode::new(2, 48000);
        reverb.set_tail(tail_secs);
        let source: SharedNode = Arc::new(FiniteSource::new(2, 48000, 0.5, total_frames));
        reverb.attach(source).unwrap();
        reverb
    }

    #[test]
    fn test_dirty_flag_coalesces_updates() {
        let reverb = reverb_with_source(10_000, 0.0);
        let mut buffer = vec![0.0f32; 2 * 256];

        reverb.read(&mut buffer, 256);
        let baseline = reverb.bank_revisions();

        // Five writes between two reads must cost one recomputation.
        reverb.set_wet(0.1);
        reverb.set_wet(0.2);
        reverb.set_wet(0.3);
        reverb.set_wet(0.4);
        reverb.set_wet(0.5);
        reverb.read(&mut buffer, 256);
        assert_eq!(reverb.bank_revisions(), baseline + 1);

        // A read with no parameter writes recomputes nothing.
        reverb.read(&mut buffer, 256);
        assert_eq!(reverb.bank_revisions(), baseline + 1);
    }

    #[test]
    fn test_no_tail_completes_with_input() {
        let reverb = reverb_with_source(100, 0.0);
        let mut buffer = vec![0.0f32; 2 * 256];

        assert!(!reverb.completed());
        let read = reverb.read(&mut buffer, 256);
        assert_eq!(read, 100);
        // Same-call completion: no extra silence frames are produced.
        assert!(reverb.completed());
        assert_eq!(reverb.read(&mut buffer, 256), 0);
    }

    #[test]
    fn test_tail_state_machine() {
        // 480-frame tail at 48 kHz = 10 ms.
        let reverb = reverb_with_source(100, 0.01);
        let mut buffer = vec![0.0f32; 2 * 256];

        // First read: 100 input frames + 156 appended tail frames.
        let read = reverb.read(&mut buffer, 256);
        assert_eq!(read, 256);
        assert!(!reverb.completed());

        // 480 - 156 = 324 tail frames left: one full read, one partial.
        assert_eq!(reverb.read(&mut buffer, 256), 256);
        assert!(!reverb.completed());
        assert_eq!(reverb.read(&mut buffer, 256), 68);
        assert!(reverb.completed());
        assert_eq!(reverb.read(&mut buffer, 256), 0);
    }

    #[test]
    fn test_tail_cumulative_silence_matches_outmark() {
        let reverb = reverb_with_source(100, 0.01);
        let mut buffer = vec![0.0f32; 2 * 64];

        let mut produced = 0u64;
        for _ in 0..1000 {
            let read = reverb.read(&mut buffer, 64);
            if read == 0 {
                break;
            }
            produced += u64::from(read);
        }
        // 100 input frames plus exactly the 480-frame tail.
        assert_eq!(produced, 580);
    }

    #[test]
    fn test_tail_single_frame() {
        // outmark of 1 frame: the whole tail fits the transition read.
        let reverb = reverb_with_source(10, 1.5 / 48000.0);
        let mut buffer = vec![0.0f32; 2 * 64];

        let read = reverb.read(&mut buffer, 64);
        assert_eq!(read, 11);
        assert!(reverb.completed());
    }

    #[test]
    fn test_tail_two_frames_across_reads() {
        // outmark of 2 with a request that consumes the input exactly:
        // the whole tail spills into the following read.
        let reverb = reverb_with_source(64, 2.5 / 48000.0);
        let mut buffer = vec![0.0f32; 2 * 64];

        assert_eq!(reverb.read(&mut buffer, 64), 64);
        let second = reverb.read(&mut buffer, 64);
        assert_eq!(second, 2);
        assert!(reverb.completed());
    }

    #[test]
    fn test_detached_reverb_is_silent_and_complete(){
        let reverb = ReverbNode::new(2, 48000);
        let mut buffer = vec![1.0f32; 2 * 32];

        assert_eq!(reverb.read(&mut buffer, 32), 32);
        assert!(buffer.iter().all(|&s| s == 0.0));
        assert!(reverb.completed());
    }

    #[test]
    fn test_paused_reverb_produces_silence() {
        let reverb = reverb_with_source(10_000, 0.0);
        let mut buffer = vec![1.0f32; 2 * 32];

        reverb.pause();
        assert_eq!(reverb.read(&mut buffer, 32), 32);
        assert!(buffer.iter().all(|&s| s == 0.0));

        reverb.resume();
        reverb.set_dry(0.5);
        reverb.set_wet(0.0);
        reverb.read(&mut buffer, 32);
        assert!(buffer.iter().any(|&s| s != 0.0));
    }

    #[test]
    fn test_attach_mismatch_leaves_input_unchanged() {
        let reverb = reverb_with_source(1000, 0.0);
        let before = reverb.get_input().unwrap();

        let wrong: SharedNode = Arc::new(FiniteSource::new(1, 48000, 0.5, 10));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            reverb.attach(wrong)
        }));
        if let Ok(outcome) = result {
            assert!(outcome.is_err());
        }

        let after = reverb.get_input().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_set_tail_while_fading_restarts() {
        let reverb = reverb_with_source(10, 0.01);
        let mut buffer = vec![0.0f32; 2 * 64];

        // Enter the fade.
        reverb.read(&mut buffer, 64);
        assert!(!reverb.completed());

        // Reconfiguring the tail cancels the fade in progress.
        reverb.set_tail(0.0);
        // The input is exhausted and no tail remains.
        reverb.read(&mut buffer, 64);
        assert!(reverb.completed());
    }
}
