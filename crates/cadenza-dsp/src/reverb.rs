//! Freeverb-style algorithmic reverb bank.
//!
//! A Schroeder reverberator after the public-domain Freeverb design:
//! 8 parallel comb filters into 4 series allpass filters, run as two
//! stacks whose delay lines are offset by a fixed stereo spread. The bank
//! operates on interleaved multi-channel audio and carries no concurrency
//! state of its own; the graph layer decides when it is reconfigured.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::{AllpassFilter, CombFilter};

/// Number of parallel comb filters per stack.
const NUM_COMBS: usize = 8;
/// Number of series allpass filters per stack.
const NUM_ALLPASSES: usize = 4;
/// Scaling factor on the wet (reverb) signal.
const SCALE_WET: f32 = 3.0;
/// Scaling factor on the dry signal.
const SCALE_DRY: f32 = 2.0;
/// Scaling factor on user-facing damping.
const SCALE_DAMP: f32 = 0.4;
/// Scaling factor on user-facing room size.
const SCALE_ROOM: f32 = 0.28;
/// Zero offset for user-facing room size.
const OFFSET_ROOM: f32 = 0.7;
/// Delay offset between the two stacks, in samples at the reference rate.
const STEREO_SPREAD: usize = 23;

// Tunings by Jezar at Dreampoint, assuming a 44.1 kHz sample rate. They are
// mutually prime to avoid resonances and get rescaled for other rates.
const COMB_TUNING: [usize; NUM_COMBS] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_TUNING: [usize; NUM_ALLPASSES] = [556, 441, 341, 225];

/// Reference sample rate for the tuning constants.
const REFERENCE_RATE: f32 = 44100.0;

/// Scale a delay length from the reference rate to the target rate.
fn scale_to_rate(samples: usize, target_rate: f32) -> usize {
    (libm::roundf(samples as f32 * target_rate / REFERENCE_RATE) as usize).max(1)
}

/// User-facing reverb parameters.
///
/// All values are nominally in 0..1; `input_gain` is the attenuation applied
/// to the mono downmix feeding the filter banks. Defaults match the original
/// Freeverb listening values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverbSettings {
    /// Wet (reverberated) output level.
    pub wet: f32,
    /// Dry (unprocessed) passthrough level.
    pub dry: f32,
    /// Apparent room size; larger rooms decay more slowly.
    pub room_size: f32,
    /// High-frequency absorption; 0 is bright, 1 is dark.
    pub damping: f32,
    /// Stereo width of the wet mix; 0 collapses to mono.
    pub width: f32,
    /// Gain applied to the downmixed filter input.
    pub input_gain: f32,
}

impl Default for ReverbSettings {
    fn default() -> Self {
        Self {
            wet: 1.0 / SCALE_WET,
            dry: 0.0,
            room_size: 0.5,
            damping: 0.5,
            width: 1.0,
            input_gain: 0.015,
        }
    }
}

/// Freeverb comb/allpass bank over interleaved multi-channel audio.
///
/// The bank downmixes its input to mono, runs it through two filter stacks
/// (the second offset by [`STEREO_SPREAD`] samples), and mixes the two wet
/// signals back across the output channels: even channels get (wet1, wet2),
/// odd channels get (wet2, wet1). A mono bank simply takes the even mix.
///
/// Reconfiguration happens only through [`update`](Self::update); `process`
/// never recomputes coefficients.
#[derive(Debug)]
pub struct ReverbBank {
    channels: usize,
    combs_l: Vec<CombFilter>,
    combs_r: Vec<CombFilter>,
    allpasses_l: Vec<AllpassFilter>,
    allpasses_r: Vec<AllpassFilter>,
    input_gain: f32,
    wet1: f32,
    wet2: f32,
    dry: f32,
    width: f32,
    revisions: u64,
}

impl ReverbBank {
    /// Create a bank for the given sample rate and channel count, applying
    /// the provided settings.
    pub fn new(settings: &ReverbSettings, sample_rate: u32, channels: u8) -> Self {
        let rate = sample_rate as f32;
        let combs_l = COMB_TUNING
            .iter()
            .map(|&t| CombFilter::new(scale_to_rate(t, rate)))
            .collect();
        let combs_r = COMB_TUNING
            .iter()
            .map(|&t| CombFilter::new(scale_to_rate(t + STEREO_SPREAD, rate)))
            .collect();
        let allpasses_l = ALLPASS_TUNING
            .iter()
            .map(|&t| AllpassFilter::new(scale_to_rate(t, rate)))
            .collect();
        let allpasses_r = ALLPASS_TUNING
            .iter()
            .map(|&t| AllpassFilter::new(scale_to_rate(t + STEREO_SPREAD, rate)))
            .collect();

        let mut bank = Self {
            channels: usize::from(channels).max(1),
            combs_l,
            combs_r,
            allpasses_l,
            allpasses_r,
            input_gain: 0.0,
            wet1: 0.0,
            wet2: 0.0,
            dry: 0.0,
            width: 0.0,
            revisions: 0,
        };
        bank.update(settings);
        bank.revisions = 0;
        bank
    }

    /// Recompute derived coefficients from a settings snapshot.
    pub fn update(&mut self, settings: &ReverbSettings) {
        let wet = settings.wet * SCALE_WET;
        self.dry = settings.dry * SCALE_DRY;
        self.width = settings.width;
        self.input_gain = settings.input_gain;
        self.wet1 = wet * (self.width / 2.0 + 0.5);
        self.wet2 = wet * ((1.0 - self.width) / 2.0);

        let feedback = settings.room_size * SCALE_ROOM + OFFSET_ROOM;
        let damp = settings.damping * SCALE_DAMP;
        for comb in self.combs_l.iter_mut().chain(self.combs_r.iter_mut()) {
            comb.set_feedback(feedback);
            comb.set_damp(damp);
        }
        self.revisions += 1;
    }

    /// Number of times [`update`](Self::update) has been applied since
    /// construction. Diagnostic, used to observe parameter coalescing.
    pub fn revisions(&self) -> u64 {
        self.revisions
    }

    /// Channel count this bank was built for.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Process `frames` interleaved frames in place.
    ///
    /// The buffer must hold at least `frames * channels` samples; anything
    /// beyond that is left untouched.
    pub fn process(&mut self, buffer: &mut [f32], frames: usize) {
        debug_assert!(buffer.len() >= frames * self.channels);

        for frame in buffer[..frames * self.channels].chunks_exact_mut(self.channels) {
            // Mono downmix feeds both stacks.
            let mut mono = 0.0f32;
            for &sample in frame.iter() {
                mono += sample;
            }
            mono = mono * self.input_gain / self.channels as f32;

            let mut out_l = 0.0f32;
            let mut out_r = 0.0f32;
            for comb in &mut self.combs_l {
                out_l += comb.process(mono);
            }
            for comb in &mut self.combs_r {
                out_r += comb.process(mono);
            }
            for allpass in &mut self.allpasses_l {
                out_l = allpass.process(out_l);
            }
            for allpass in &mut self.allpasses_r {
                out_r = allpass.process(out_r);
            }

            for (ch, sample) in frame.iter_mut().enumerate() {
                let wet = if ch % 2 == 0 {
                    out_l * self.wet1 + out_r * self.wet2
                } else {
                    out_l * self.wet2 + out_r * self.wet1
                };
                *sample = wet + *sample * self.dry;
            }
        }
    }

    /// Clear all filter state without touching parameters.
    pub fn reset(&mut self) {
        for comb in self.combs_l.iter_mut().chain(self.combs_r.iter_mut()) {
            comb.clear();
        }
        for allpass in self
            .allpasses_l
            .iter_mut()
            .chain(self.allpasses_r.iter_mut())
        {
            allpass.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulse(channels: usize, frames: usize) -> Vec<f32> {
        let mut buffer = vec![0.0f32; channels * frames];
        for sample in buffer.iter_mut().take(channels) {
            *sample = 1.0;
        }
        buffer
    }

    #[test]
    fn test_reverb_tail_persists() {
        let mut bank = ReverbBank::new(&ReverbSettings::default(), 48000, 2);

        let mut buffer = impulse(2, 4800);
        bank.process(&mut buffer, 4800);

        // Freeverb pre-delay through the comb tunings is ~25 ms at 48 kHz;
        // after that the tail should be audible.
        let tail_energy: f32 = buffer[2400..].iter().map(|x| x * x).sum();
        assert!(tail_energy > 1e-8, "tail should ring, got {}", tail_energy);
        for &sample in &buffer {
            assert!(sample.is_finite());
        }
    }

    #[test]
    fn test_reverb_dry_passthrough() {
        let settings = ReverbSettings {
            wet: 0.0,
            dry: 0.5,
            ..ReverbSettings::default()
        };
        let mut bank = ReverbBank::new(&settings, 48000, 2);

        let mut buffer = vec![0.25f32; 2 * 64];
        bank.process(&mut buffer, 64);

        // dry is scaled by 2, so 0.5 dry passes the input unchanged.
        for &sample in &buffer {
            assert!((sample - 0.25).abs() < 1e-6);
        }
    }

    #[test]
    fn test_reverb_reset_clears_tail() {
        let mut bank = ReverbBank::new(&ReverbSettings::default(), 48000, 2);

        let mut buffer = impulse(2, 2048);
        bank.process(&mut buffer, 2048);

        bank.reset();

        let mut silence = vec![0.0f32; 2 * 2048];
        bank.process(&mut silence, 2048);
        for &sample in &silence {
            assert!(sample.abs() < 1e-10, "reset should clear state");
        }
    }

    #[test]
    fn test_reverb_width_collapses_to_mono() {
        let settings = ReverbSettings {
            width: 0.0,
            ..ReverbSettings::default()
        };
        let mut bank = ReverbBank::new(&settings, 48000, 2);

        let mut buffer = impulse(2, 4096);
        bank.process(&mut buffer, 4096);

        // With zero width, wet1 == wet2 and both channels carry the same mix.
        for frame in buffer.chunks_exact(2) {
            assert!((frame[0] - frame[1]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_reverb_mono_channel_count() {
        let mut bank = ReverbBank::new(&ReverbSettings::default(), 44100, 1);
        let mut buffer = impulse(1, 2048);
        bank.process(&mut buffer, 2048);
        for &sample in &buffer {
            assert!(sample.is_finite());
        }
    }

    #[test]
    fn test_revisions_counts_updates() {
        let mut bank = ReverbBank::new(&ReverbSettings::default(), 48000, 2);
        assert_eq!(bank.revisions(), 0);

        bank.update(&ReverbSettings::default());
        bank.update(&ReverbSettings {
            room_size: 0.9,
            ..ReverbSettings::default()
        });
        assert_eq!(bank.revisions(), 2);
    }

    #[test]
    fn test_partial_frame_processing_leaves_rest() {
        let mut bank = ReverbBank::new(&ReverbSettings::default(), 48000, 2);
        let mut buffer = vec![0.5f32; 2 * 16];
        bank.process(&mut buffer, 8);
        // Frames past the requested count are untouched.
        for &sample in &buffer[16..] {
            assert_eq!(sample, 0.5);
        }
    }
}
