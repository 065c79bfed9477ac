//! Streaming WAV source node.
//!
//! Decodes a WAV file incrementally through the file pool, so any number
//! of sources can be open at once while the pool bounds the OS handles
//! under them. The decoder sees an ordinary `Read + Seek`; paging is
//! invisible to it.

use std::io::BufReader;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use cadenza_graph::{AudioNode, NodeCore};
use hound::{SampleFormat, WavReader};

use crate::{AudioContext, Error, Result};

/// How to turn the file's samples into f32.
#[derive(Debug, Clone, Copy)]
enum SampleKind {
    Float,
    Int { scale: f32 },
}

/// Decoder state behind the node's mutex.
struct SourceState {
    reader: WavReader<BufReader<crate::PooledFile>>,
    /// Current frame position.
    position: u64,
    /// Marked frame for [`AudioNode::reset`]; stream start when unset.
    mark: Option<u64>,
}

/// An audio node streaming interleaved f32 frames from a WAV file.
///
/// Reading is pull-based and incremental; a `read` decodes only as many
/// frames as requested. A decode error mid-stream degrades to end of
/// stream (a short read followed by completion), matching the rest of the
/// audio path's silence-over-failure policy.
pub struct WavSource {
    core: NodeCore,
    kind: SampleKind,
    total_frames: u64,
    done: AtomicBool,
    state: Mutex<SourceState>,
}

impl WavSource {
    /// Open a WAV file through the context's file pool.
    pub fn open(ctx: &AudioContext, path: impl AsRef<Path>) -> Result<Self> {
        let file = ctx.pool().open(path.as_ref(), "rb")?;
        let reader = WavReader::new(BufReader::new(file))?;
        let spec = reader.spec();

        if spec.channels == 0 || spec.channels > u16::from(u8::MAX) {
            return Err(Error::UnsupportedFormat(format!(
                "{} channels",
                spec.channels
            )));
        }
        let kind = match spec.sample_format {
            SampleFormat::Float => SampleKind::Float,
            SampleFormat::Int => SampleKind::Int {
                scale: 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32,
            },
        };
        let total_frames = u64::from(reader.duration());

        tracing::debug!(
            path = %path.as_ref().display(),
            channels = spec.channels,
            sample_rate = spec.sample_rate,
            bits = spec.bits_per_sample,
            frames = total_frames,
            "wav source opened"
        );

        Ok(Self {
            core: NodeCore::new(spec.channels as u8, spec.sample_rate, 512),
            kind,
            total_frames,
            done: AtomicBool::new(total_frames == 0),
            state: Mutex::new(SourceState {
                reader,
                position: 0,
                mark: None,
            }),
        })
    }

    /// Total length of the stream in frames.
    pub fn frames(&self) -> u64 {
        self.total_frames
    }

    /// Total duration of the stream in seconds.
    pub fn duration(&self) -> f64 {
        self.total_frames as f64 / f64::from(self.core.rate())
    }

    /// Seek to an absolute frame, updating position and completion.
    fn seek_locked(&self, state: &mut SourceState, frame: u64) -> Result<()> {
        let frame = frame.min(self.total_frames);
        state.reader.seek(frame as u32)?;
        state.position = frame;
        self.done.store(frame >= self.total_frames, Ordering::Relaxed);
        Ok(())
    }
}

impl AudioNode for WavSource {
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
        let channels = usize::from(self.core.channels());
        let wanted = frames as usize * channels;

        if self.core.is_paused() {
            buffer[..wanted].fill(0.0);
            return frames;
        }
        let Ok(mut state) = self.state.lock() else {
            buffer[..wanted].fill(0.0);
            return frames;
        };

        let mut written = 0usize;
        match self.kind {
            SampleKind::Float => {
                for sample in state.reader.samples::<f32>() {
                    let Ok(sample) = sample else { break };
                    buffer[written] = sample;
                    written += 1;
                    if written == wanted {
                        break;
                    }
                }
            }
            SampleKind::Int { scale } => {
                for sample in state.reader.samples::<i32>() {
                    let Ok(sample) = sample else { break };
                    buffer[written] = sample as f32 * scale;
                    written += 1;
                    if written == wanted {
                        break;
                    }
                }
            }
        }

        let got = (written / channels) as u32;
        state.position += u64::from(got);
        if got < frames || state.position >= self.total_frames {
            self.done.store(true, Ordering::Relaxed);
        }
        got
    }

    fn completed(&self) -> bool {
        self.done.load(Ordering::Relaxed)
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
        match self.state.lock() {
            Ok(mut state) => {
                state.mark = Some(state.position);
                true
            }
            Err(_) => false,
        }
    }

    fn unmark(&self) -> bool {
        match self.state.lock() {
            Ok(mut state) => {
                state.mark = None;
                true
            }
            Err(_) => false,
        }
    }

    fn reset(&self) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        let target = state.mark.unwrap_or(0);
        self.seek_locked(&mut state, target).is_ok()
    }

    fn advance(&self, frames: u32) -> Option<u64> {
        let Ok(mut state) = self.state.lock() else {
            return None;
        };
        let from = state.position;
        let target = from.saturating_add(u64::from(frames));
        self.seek_locked(&mut state, target).ok()?;
        Some(state.position - from)
    }

    fn position(&self) -> Option<u64> {
        self.state.lock().ok().map(|state| state.position)
    }

    fn set_position(&self, frames: u64) -> Option<u64> {
        let Ok(mut state) = self.state.lock() else {
            return None;
        };
        self.seek_locked(&mut state, frames).ok()?;
        Some(state.position)
    }

    fn elapsed(&self) -> Option<f64> {
        self.position()
            .map(|frames| frames as f64 / f64::from(self.core.rate()))
    }

    fn set_elapsed(&self, seconds: f64) -> Option<f64> {
        let frame = (seconds.max(0.0) * f64::from(self.core.rate())) as u64;
        self.set_position(frame)
            .map(|frames| frames as f64 / f64::from(self.core.rate()))
    }

    fn remaining(&self) -> Option<f64> {
        self.position().map(|frames| {
            (self.total_frames - frames) as f64 / f64::from(self.core.rate())
        })
    }

    fn set_remaining(&self, seconds: f64) -> Option<f64> {
        let keep = (seconds.max(0.0) * f64::from(self.core.rate())) as u64;
        let target = self.total_frames.saturating_sub(keep);
        self.set_position(target).map(|frames| {
            (self.total_frames - frames) as f64 / f64::from(self.core.rate())
        })
    }
}

impl std::fmt::Debug for WavSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavSource")
            .field("channels", &self.core.channels())
            .field("rate", &self.core.rate())
            .field("frames", &self.total_frames)
            .finish()
    }
}
