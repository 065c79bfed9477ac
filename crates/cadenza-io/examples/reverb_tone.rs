//! Play a short sine tone through the reverb into the default output
//! device.
//!
//! ```sh
//! cargo run -p cadenza-io --example reverb_tone
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cadenza_graph::{AudioNode, NodeCore, ReverbNode, SharedNode};
use cadenza_io::{AudioContext, EngineConfig, OutputStream};

/// A minimal sine source node.
struct SineSource {
    core: NodeCore,
    frequency: f32,
    frame: AtomicU64,
    total_frames: u64,
}

impl SineSource {
    fn new(channels: u8, rate: u32, frequency: f32, seconds: f64) -> Self {
        Self {
            core: NodeCore::new(channels, rate, 512),
            frequency,
            frame: AtomicU64::new(0),
            total_frames: (seconds * f64::from(rate)) as u64,
        }
    }
}

impl AudioNode for SineSource {
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
        let start = self.frame.load(Ordering::Relaxed);
        let take = u64::from(frames).min(self.total_frames.saturating_sub(start)) as u32;

        let step = std::f32::consts::TAU * self.frequency / self.core.rate() as f32;
        for i in 0..take as usize {
            let sample = 0.2 * ((start + i as u64) as f32 * step).sin();
            for ch in 0..channels {
                buffer[i * channels + ch] = sample;
            }
        }
        self.frame.store(start + u64::from(take), Ordering::Relaxed);
        take
    }

    fn completed(&self) -> bool {
        self.frame.load(Ordering::Relaxed) >= self.total_frames
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

fn main() -> cadenza_io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let ctx = AudioContext::new(EngineConfig::default())?;
    let config = ctx.config();

    let source: SharedNode = Arc::new(SineSource::new(
        config.channels,
        config.sample_rate,
        440.0,
        1.5,
    ));

    let reverb = Arc::new(ReverbNode::new(config.channels, config.sample_rate));
    reverb.set_tail(2.0);
    reverb.set_wet(0.5);
    reverb.set_dry(0.4);
    reverb.set_room_size(0.8);
    reverb.attach(source)?;

    let output = ctx.create_output();
    output.attach(Arc::clone(&reverb) as SharedNode)?;

    let stream = match OutputStream::open(Arc::clone(&output), config.device.as_deref()) {
        Ok(stream) => stream,
        Err(err) => {
            eprintln!("no playable output device: {err}");
            return Ok(());
        }
    };
    println!("playing on '{}'", stream.device());

    // Tone plus reverb tail.
    while !reverb.completed() {
        std::thread::sleep(std::time::Duration::from_millis(100));
    }
    println!(
        "done (last callback took {} us)",
        output.overhead_micros()
    );
    Ok(())
}
