//! Latency adapter: a double buffer bridging asynchronous production and
//! fixed-size hardware polls.
//!
//! Exceeding the audio callback's time budget does not cause a slowdown,
//! it causes silence. The adapter buys expensive producers (convolution,
//! disk-backed decoding) a larger time budget by filling a bigger backing
//! buffer on its own thread, at the price of added latency on that branch
//! of the graph only.
//!
//! The polling side never blocks: if the background fill has not finished,
//! [`poll`](LatencyAdapter::poll) delivers whatever the front buffer still
//! holds, which may be nothing. The original semaphore handoff is kept as
//! a pair of bounded(1) channels: `try_send` posts a token only when none
//! is pending, `try_recv` is the non-blocking take, `recv` the blocking
//! one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::{Error, Result};

/// Callback filling the back buffer. Receives the free tail of the buffer
/// and returns how many bytes it produced.
pub type FillFn = Box<dyn FnMut(&mut [u8]) -> usize + Send>;

/// Producer-side state: the back buffer and the fill callback, guarded by
/// one mutex so pushed data and callback fills cannot interleave.
struct BackBuffer {
    data: Vec<u8>,
    avail: usize,
    callback: Option<FillFn>,
}

struct AdapterShared {
    input_size: usize,
    back: Mutex<BackBuffer>,
    /// Signals the background thread to run one fill.
    push_tx: Sender<()>,
    push_rx: Receiver<()>,
    /// Signals the consumer that a fill has completed.
    poll_tx: Sender<()>,
    poll_rx: Receiver<()>,
    paused: AtomicBool,
    /// Cleared to make the background thread exit.
    active: AtomicBool,
}

impl AdapterShared {
    /// One fill pass, run on the background thread.
    ///
    /// Without a callback this just signals readiness; pushed data is
    /// already in place. With one, the callback tops up the free tail of
    /// the back buffer under the mutex. This is where the thread may block
    /// on disk or network for as long as it likes.
    fn fill(&self) {
        {
            let Ok(mut back) = self.back.lock() else {
                return;
            };
            let BackBuffer {
                data,
                avail,
                callback,
            } = &mut *back;
            if let Some(callback) = callback
                && *avail < data.len()
            {
                let filled = callback(&mut data[*avail..]);
                *avail = (*avail + filled).min(data.len());
            }
        }
        let _ = self.poll_tx.try_send(());
    }
}

/// Double buffer decoupling an asynchronously filled input from fixed-size
/// output polls.
///
/// Sizes are in bytes; the adapter is format-agnostic plumbing, not a
/// sample-typed node. `input_size` must be at least `output_size`: the
/// adapter trades latency for burst capacity, it cannot invent throughput.
///
/// The adapter starts **paused**; call [`pause`](Self::pause) with `false`
/// once the callback is ready to produce data.
pub struct LatencyAdapter {
    output_size: usize,
    /// Consumer-side front buffer. Owned directly (not behind the shared
    /// mutex) so draining never contends with a fill in flight.
    front: Vec<u8>,
    front_avail: usize,
    front_offset: usize,
    shared: Arc<AdapterShared>,
    thread: Option<JoinHandle<()>>,
}

impl LatencyAdapter {
    /// Create an adapter with the given buffer sizes and optional fill
    /// callback.
    ///
    /// With no callback, data is supplied with [`push`](Self::push)
    /// instead; a push rate below `output_size` bytes per poll will make
    /// polls run dry and deliver silence upstream.
    pub fn new(input_size: usize, output_size: usize, callback: Option<FillFn>) -> Result<Self> {
        if input_size < output_size {
            return Err(Error::SizeMismatch {
                input: input_size,
                output: output_size,
            });
        }

        let (push_tx, push_rx) = bounded(1);
        let (poll_tx, poll_rx) = bounded(1);
        // One fill permit is in flight from the start.
        let _ = push_tx.try_send(());

        let shared = Arc::new(AdapterShared {
            input_size,
            back: Mutex::new(BackBuffer {
                data: vec![0; input_size],
                avail: 0,
                callback,
            }),
            push_tx,
            push_rx,
            poll_tx,
            poll_rx,
            paused: AtomicBool::new(true),
            active: AtomicBool::new(true),
        });

        let worker = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("latency-adapter".into())
            .spawn(move || {
                while worker.push_rx.recv().is_ok() {
                    if !worker.active.load(Ordering::Acquire) {
                        break;
                    }
                    worker.fill();
                }
            })?;

        tracing::debug!(input_size, output_size, "latency adapter started");
        Ok(Self {
            output_size,
            front: vec![0; input_size],
            front_avail: 0,
            front_offset: 0,
            shared,
            thread: Some(thread),
        })
    }

    /// The fill (input) buffer size in bytes.
    pub fn input_size(&self) -> usize {
        self.shared.input_size
    }

    /// The drain (output) size in bytes.
    pub fn output_size(&self) -> usize {
        self.output_size
    }

    /// Whether the adapter is paused.
    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Relaxed)
    }

    /// Pull up to `output.len()` bytes of delayed data.
    ///
    /// Never blocks on the fill side: when the front buffer runs short and
    /// no completed fill is ready to swap in, this returns however many
    /// bytes could be delivered, possibly zero. Callers on the audio
    /// thread zero-pad the shortfall.
    pub fn poll(&mut self, output: &mut [u8]) -> Result<usize> {
        if output.len() > self.front_avail - self.front_offset {
            self.swap_buffers()?;
        }

        let amt = output.len().min(self.front_avail - self.front_offset);
        output[..amt].copy_from_slice(&self.front[self.front_offset..self.front_offset + amt]);
        self.front_offset += amt;
        Ok(amt)
    }

    /// Swap the refilled back buffer in behind the front buffer.
    ///
    /// Requires a completed fill (non-blocking check); without one the
    /// front buffer is left as is. With leftover unread front data, that
    /// data is compacted to the start and topped up from the back buffer
    /// so no byte is lost or reordered; a fully drained front just trades
    /// places with the back buffer.
    fn swap_buffers(&mut self) -> Result<bool> {
        match self.shared.poll_rx.try_recv() {
            Ok(()) => {}
            Err(crossbeam_channel::TryRecvError::Empty) => return Ok(false),
            Err(crossbeam_channel::TryRecvError::Disconnected) => {
                return Err(Error::AdapterStopped);
            }
        }

        {
            let mut back = self
                .shared
                .back
                .lock()
                .map_err(|_| Error::AdapterStopped)?;
            let input_size = self.shared.input_size;

            if self.front_offset != self.front_avail {
                self.front.copy_within(self.front_offset..self.front_avail, 0);
                self.front_avail -= self.front_offset;
                self.front_offset = 0;

                let rem = input_size - self.front_avail;
                if back.avail >= rem {
                    self.front[self.front_avail..self.front_avail + rem]
                        .copy_from_slice(&back.data[..rem]);
                    back.data.copy_within(rem..input_size, 0);
                    self.front_avail += rem;
                    back.avail -= rem;
                    let avail = back.avail;
                    back.data[avail..].fill(0);
                } else {
                    let avail = back.avail;
                    self.front[self.front_avail..self.front_avail + avail]
                        .copy_from_slice(&back.data[..avail]);
                    self.front_avail += avail;
                    self.front[self.front_avail..].fill(0);
                    back.avail = 0;
                    back.data.fill(0);
                }
            } else {
                std::mem::swap(&mut self.front, &mut back.data);
                self.front_offset = 0;
                self.front_avail = back.avail;
                back.avail = 0;
                back.data.fill(0);
            }
        }

        if !self.shared.paused.load(Ordering::Relaxed) {
            let _ = self.shared.push_tx.try_send(());
        }
        Ok(true)
    }

    /// Push data directly into the back buffer.
    ///
    /// The supplementary producer path, mainly for adapters without a fill
    /// callback. Never blocks: returns `Ok(0)` when the back buffer is
    /// busy (a callback fill is in flight), otherwise the number of bytes
    /// accepted, bounded by the free space.
    pub fn push(&self, input: &[u8]) -> Result<usize> {
        let mut back = match self.shared.back.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Ok(0),
            Err(TryLockError::Poisoned(_)) => return Err(Error::AdapterStopped),
        };

        let amt = (self.shared.input_size - back.avail).min(input.len());
        let offset = back.avail;
        back.data[offset..offset + amt].copy_from_slice(&input[..amt]);
        back.avail += amt;
        Ok(amt)
    }

    /// Pause or resume the background fill.
    ///
    /// Pausing blocks until any fill in flight has completed, then holds
    /// the thread quiescent; this is the documented safe point for
    /// mutating state captured by the fill callback. Resuming re-arms the
    /// fill permit.
    pub fn pause(&mut self, pause_on: bool) {
        if self.shared.paused.load(Ordering::Relaxed) == pause_on {
            return;
        }
        self.shared.paused.store(pause_on, Ordering::Relaxed);
        if pause_on {
            let _ = self.shared.poll_rx.recv();
        } else {
            let _ = self.shared.push_tx.try_send(());
        }
    }

    /// Empty and zero both buffers, returning the adapter to its paused
    /// starting state.
    pub fn reset(&mut self) {
        self.pause(true);
        if let Ok(mut back) = self.shared.back.lock() {
            back.data.fill(0);
            back.avail = 0;
        }
        self.front.fill(0);
        self.front_avail = 0;
        self.front_offset = 0;
    }

    /// Block until the background thread has a completed fill ready.
    ///
    /// Does nothing when the adapter is paused or a fill is already ready.
    /// Returns whether this call actually waited.
    pub fn block_until_filled(&self) -> bool {
        if !self.shared.paused.load(Ordering::Relaxed) && self.shared.poll_rx.is_empty() {
            if self.shared.poll_rx.recv().is_ok() {
                let _ = self.shared.poll_tx.try_send(());
            }
            return true;
        }
        false
    }
}

impl Drop for LatencyAdapter {
    fn drop(&mut self) {
        // Teardown order matters: signal, wake, join, then free.
        self.shared.active.store(false, Ordering::Release);
        let _ = self.shared.push_tx.try_send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl std::fmt::Debug for LatencyAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatencyAdapter")
            .field("input_size", &self.shared.input_size)
            .field("output_size", &self.output_size)
            .field("paused", &self.is_paused())
            .finish()
    }
}
