//! Audio output: the terminal graph node and its cpal device stream.
//!
//! [`OutputNode`] is the single point where the audio callback thread and
//! the control thread touch the same data. It follows a fail-fast,
//! never-block policy: when the graph is momentarily unavailable (an
//! attach in flight, destructive surgery under [`OutputNode::lock`]), the
//! render pass writes silence and tries again next callback. Stopping the
//! hardware instead would pop audibly; the engine prefers wrong-but-smooth
//! over correct-but-glitchy.
//!
//! [`OutputStream`] owns the cpal stream feeding a device from a node.
//! Sample-format conversion is resolved once at stream construction into a
//! plain function pointer writing through a pre-allocated scratch buffer;
//! nothing is resolved or allocated per callback.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use cadenza_graph::{AudioNode, InputSlot, NodeCore, SharedNode};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, SampleFormat};

use crate::{Error, Result};

/// Extract a device's display name.
fn device_name(device: &Device) -> std::result::Result<String, cpal::DeviceNameError> {
    device.description().map(|d| d.name().to_string())
}

/// Information about an output device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Human-readable device name.
    pub name: String,
    /// Default sample rate in Hz.
    pub default_sample_rate: u32,
}

/// List all available output devices.
pub fn list_output_devices() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    if let Ok(outputs) = host.output_devices() {
        for device in outputs {
            if let Ok(name) = device_name(&device) {
                let default_sample_rate = device
                    .default_output_config()
                    .map(|c| c.sample_rate())
                    .unwrap_or(48000);
                devices.push(DeviceInfo {
                    name,
                    default_sample_rate,
                });
            }
        }
    }

    Ok(devices)
}

/// Get the default output device, if any.
pub fn default_output_device() -> Result<Option<DeviceInfo>> {
    let host = cpal::default_host();
    Ok(host.default_output_device().and_then(|d| {
        device_name(&d).ok().map(|name| DeviceInfo {
            name,
            default_sample_rate: d
                .default_output_config()
                .map(|c| c.sample_rate())
                .unwrap_or(48000),
        })
    }))
}

/// Find an output device by index, exact name, or case-insensitive partial
/// name. `None` selects the default device.
fn find_output_device(host: &Host, name_or_index: Option<&str>) -> Result<Device> {
    let Some(search) = name_or_index else {
        return host.default_output_device().ok_or(Error::NoDevice);
    };

    let devices: Vec<_> = host
        .output_devices()
        .map_err(|e| Error::Stream(e.to_string()))?
        .collect();

    if let Ok(index) = search.parse::<usize>() {
        return devices.get(index).cloned().ok_or_else(|| {
            Error::DeviceNotFound(format!(
                "output device index {} (only {} devices available)",
                index,
                devices.len()
            ))
        });
    }

    for device in &devices {
        if device_name(device).is_ok_and(|n| n == search) {
            return Ok(device.clone());
        }
    }

    let search_lower = search.to_lowercase();
    for device in &devices {
        if device_name(device).is_ok_and(|n| n.to_lowercase().contains(&search_lower)) {
            return Ok(device.clone());
        }
    }

    Err(Error::DeviceNotFound(format!(
        "no output device matching '{}'",
        search
    )))
}

/// The terminal node of an audio graph, bridging it to a hardware device.
///
/// State shared across the two threads is confined to atomics (`active`,
/// `paused`, the overhead diagnostic) and the atomically swapped input
/// reference; the only lock is the render guard, and the audio thread only
/// ever `try_lock`s it.
pub struct OutputNode {
    core: NodeCore,
    input: InputSlot,
    /// Whether hardware is currently polling this node.
    active: AtomicBool,
    /// Wall-clock micros spent in the last render pass. Diagnostic only.
    overhead: AtomicU64,
    /// Held by [`lock`](Self::lock) during destructive graph surgery; the
    /// render pass skips itself (silence) while it is taken.
    render_lock: Mutex<()>,
}

impl OutputNode {
    /// Create an output node with the given format.
    ///
    /// The read size is the number of frames gathered per poll. Smaller
    /// values tax the CPU; larger ones add lag. 512 frames at stereo
    /// 48 kHz is about 11 ms, a good fit for a 60 fps frame budget, though
    /// weaker devices may need 1024.
    pub fn new(channels: u8, rate: u32, read_size: u32) -> Self {
        Self {
            core: NodeCore::new(channels, rate, read_size),
            input: InputSlot::new(channels, rate),
            active: AtomicBool::new(false),
            overhead: AtomicU64::new(0),
            render_lock: Mutex::new(()),
        }
    }

    /// Attach an audio graph to this output.
    ///
    /// Fails when the terminal node's channel count or sample rate do not
    /// match this device node; the current input is left unchanged. The
    /// node's read size is propagated down the new subgraph.
    pub fn attach(&self, node: SharedNode) -> Result<()> {
        self.input.attach(Arc::clone(&node))?;
        if node.read_size() != self.core.read_size() {
            node.set_read_size(self.core.read_size());
        }
        Ok(())
    }

    /// Detach the audio graph, returning its terminal node.
    pub fn detach(&self) -> Option<SharedNode> {
        self.input.detach()
    }

    /// Snapshot the attached input.
    pub fn get_input(&self) -> Option<SharedNode> {
        self.input.get()
    }

    /// Set whether hardware is polling this node. Managed by
    /// [`OutputStream`]; distinct from the user-facing pause flag.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    /// Whether hardware is currently polling this node.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Wall-clock microseconds spent rendering the last audio callback.
    /// Diagnostic.
    pub fn overhead_micros(&self) -> u64 {
        self.overhead.load(Ordering::Relaxed)
    }

    /// Lock out the render pass for destructive graph surgery.
    ///
    /// While the returned guard lives, callbacks write silence instead of
    /// touching the graph, so arbitrary restructuring is safe. Blocks
    /// until any render pass in flight finishes. Dropping the guard
    /// unlocks.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        match self.render_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Render one hardware callback's worth of interleaved f32 audio.
    ///
    /// AUDIO THREAD ONLY. Fail-fast: if the node is locked for surgery the
    /// buffer is zeroed and the pass skipped.
    pub fn render(&self, data: &mut [f32]) {
        let Ok(_guard) = self.render_lock.try_lock() else {
            data.fill(0.0);
            return;
        };
        let channels = usize::from(self.core.channels());
        let frames = (data.len() / channels) as u32;
        self.read(data, frames);
    }
}

impl AudioNode for OutputNode {
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
        let start = Instant::now();
        let channels = usize::from(self.core.channels());

        let take = if self.core.is_paused() {
            0
        } else {
            self.input
                .with(|input| input.read(buffer, frames))
                .unwrap_or(0)
        };

        // The buck stops here: fill any shortfall with silence.
        if take < frames {
            buffer[take as usize * channels..frames as usize * channels].fill(0.0);
        }

        self.overhead
            .store(start.elapsed().as_micros() as u64, Ordering::Relaxed);
        frames
    }

    fn completed(&self) -> bool {
        self.input.with(|input| input.completed()).unwrap_or(true)
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
        self.input.with(|input| input.remaining()).flatten()
    }

    fn set_remaining(&self, seconds: f64) -> Option<f64> {
        self.input
            .with(|input| input.set_remaining(seconds))
            .flatten()
    }
}

impl std::fmt::Debug for OutputNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputNode")
            .field("channels", &self.core.channels())
            .field("rate", &self.core.rate())
            .field("read_size", &self.core.read_size())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Convert float samples to signed 16-bit PCM with saturation.
fn float_to_i16(input: &[f32], output: &mut [i16]) {
    for (src, dst) in input.iter().zip(output.iter_mut()) {
        let sample = *src;
        *dst = if sample >= 1.0 {
            i16::MAX
        } else if sample <= -1.0 {
            i16::MIN
        } else {
            (sample * 32767.0) as i16
        };
    }
}

/// Convert float samples to unsigned 16-bit PCM with saturation.
fn float_to_u16(input: &[f32], output: &mut [u16]) {
    for (src, dst) in input.iter().zip(output.iter_mut()) {
        let sample = *src;
        *dst = if sample >= 1.0 {
            u16::MAX
        } else if sample <= -1.0 {
            0
        } else {
            ((sample + 1.0) * 32767.0) as u16
        };
    }
}

/// Render through a scratch buffer and convert into the device format.
///
/// The scratch buffer and the converter are fixed when the stream is
/// built; the callback only chunks, renders and converts.
fn render_converted<T>(
    node: &OutputNode,
    scratch: &mut [f32],
    output: &mut [T],
    convert: fn(&[f32], &mut [T]),
) {
    let channels = usize::from(node.channels()).max(1);
    let mut done = 0usize;
    while done < output.len() {
        let mut chunk = scratch.len().min(output.len() - done);
        chunk = (chunk / channels) * channels;
        if chunk == 0 {
            break;
        }
        node.render(&mut scratch[..chunk]);
        convert(&scratch[..chunk], &mut output[done..done + chunk]);
        done += chunk;
    }
}

fn stream_error(err: cpal::StreamError) {
    tracing::warn!("output stream error: {err}");
}

/// Build a cpal stream feeding the device from the node, resolving the
/// sample-format conversion once.
fn build_stream(node: &Arc<OutputNode>, device: Option<&str>) -> Result<(cpal::Stream, String)> {
    let host = cpal::default_host();
    let device = find_output_device(&host, device)?;
    let name = device_name(&device).unwrap_or_else(|_| "(unknown)".to_owned());

    let supported = device
        .default_output_config()
        .map_err(|e| Error::Stream(e.to_string()))?;
    let sample_format = supported.sample_format();

    let stream_config = cpal::StreamConfig {
        channels: u16::from(node.channels()),
        sample_rate: node.rate(),
        buffer_size: cpal::BufferSize::Fixed(node.read_size()),
    };

    let scratch_len = node.read_size() as usize * usize::from(node.channels());
    let stream = match sample_format {
        SampleFormat::F32 => {
            let node = Arc::clone(node);
            device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    node.render(data);
                },
                stream_error,
                None,
            )
        }
        SampleFormat::I16 => {
            let node = Arc::clone(node);
            let mut scratch = vec![0.0f32; scratch_len];
            device.build_output_stream(
                &stream_config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    render_converted(&node, &mut scratch, data, float_to_i16);
                },
                stream_error,
                None,
            )
        }
        SampleFormat::U16 => {
            let node = Arc::clone(node);
            let mut scratch = vec![0.0f32; scratch_len];
            device.build_output_stream(
                &stream_config,
                move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                    render_converted(&node, &mut scratch, data, float_to_u16);
                },
                stream_error,
                None,
            )
        }
        other => return Err(Error::UnsupportedFormat(format!("{other:?}"))),
    }
    .map_err(|e| Error::Stream(e.to_string()))?;

    Ok((stream, name))
}

/// A live cpal output stream driven by an [`OutputNode`].
///
/// Owns the platform stream; dropping it stops playback. Stays on the
/// control thread (platform stream handles are not `Send`).
pub struct OutputStream {
    node: Arc<OutputNode>,
    stream: cpal::Stream,
    device_name: String,
}

impl OutputStream {
    /// Open a stream on the given device (default device when `None`) and
    /// start playback.
    pub fn open(node: Arc<OutputNode>, device: Option<&str>) -> Result<Self> {
        let (stream, device_name) = build_stream(&node, device)?;
        stream.play().map_err(|e| Error::Stream(e.to_string()))?;
        node.set_active(true);
        tracing::info!(
            device = %device_name,
            channels = node.channels(),
            sample_rate = node.rate(),
            read_size = node.read_size(),
            "output stream started"
        );
        Ok(Self {
            node,
            stream,
            device_name,
        })
    }

    /// The node feeding this stream.
    pub fn node(&self) -> &Arc<OutputNode> {
        &self.node
    }

    /// The name of the device currently being fed.
    pub fn device(&self) -> &str {
        &self.device_name
    }

    /// Suspend hardware polling.
    pub fn pause(&self) -> Result<()> {
        self.stream
            .pause()
            .map_err(|e| Error::Stream(e.to_string()))?;
        self.node.set_active(false);
        Ok(())
    }

    /// Resume hardware polling.
    pub fn play(&self) -> Result<()> {
        self.stream
            .play()
            .map_err(|e| Error::Stream(e.to_string()))?;
        self.node.set_active(true);
        Ok(())
    }

    /// Close and reopen the underlying device, e.g. on a default-device
    /// change.
    ///
    /// The replacement stream is confirmed live before the old one is torn
    /// down, and the attached input subgraph is untouched across the swap.
    pub fn reboot(&mut self, device: Option<&str>) -> Result<()> {
        let (stream, device_name) = build_stream(&self.node, device)?;
        stream.play().map_err(|e| Error::Stream(e.to_string()))?;
        tracing::info!(old = %self.device_name, new = %device_name, "output device rebooted");
        // Assignment drops the previous stream only now, after the new
        // device is confirmed.
        self.stream = stream;
        self.device_name = device_name;
        Ok(())
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        self.node.set_active(false);
    }
}
