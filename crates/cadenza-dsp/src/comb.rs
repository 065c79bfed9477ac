//! Comb filter for reverb algorithms.
//!
//! A feedback comb filter with damping (one-pole lowpass in the feedback
//! path). Essential building block for Schroeder and Freeverb-style reverbs.

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

use crate::flush_denormal;

/// Comb filter with feedback and damping.
///
/// The feedback path includes a one-pole lowpass filter for high-frequency
/// damping, simulating the absorption of high frequencies in real acoustic
/// spaces. The delay length is fixed at construction.
///
/// # Example
///
/// ```rust
/// use cadenza_dsp::CombFilter;
///
/// let mut comb = CombFilter::new(1116);
/// comb.set_feedback(0.84);
/// comb.set_damp(0.2);
///
/// let output = comb.process(1.0);
/// ```
#[derive(Debug, Clone)]
pub struct CombFilter {
    buffer: Vec<f32>,
    index: usize,
    feedback: f32,
    damp1: f32,
    damp2: f32,
    filterstore: f32,
}

impl CombFilter {
    /// Create a new comb filter with the given delay length in samples.
    pub fn new(delay_samples: usize) -> Self {
        Self {
            buffer: vec![0.0; delay_samples.max(1)],
            index: 0,
            feedback: 0.5,
            damp1: 0.5,
            damp2: 0.5,
            filterstore: 0.0,
        }
    }

    /// Set the feedback amount (0.0 to ~0.98).
    ///
    /// Higher values create longer decay times. Values above 0.98 may cause
    /// instability.
    #[inline]
    pub fn set_feedback(&mut self, feedback: f32) {
        self.feedback = feedback.clamp(0.0, 0.99);
    }

    /// Get the current feedback value.
    #[inline]
    pub fn feedback(&self) -> f32 {
        self.feedback
    }

    /// Set the damping amount (0.0 to 1.0).
    ///
    /// - 0.0 = no damping (bright)
    /// - 1.0 = full damping (dark/muffled)
    #[inline]
    pub fn set_damp(&mut self, damp: f32) {
        self.damp1 = damp.clamp(0.0, 1.0);
        self.damp2 = 1.0 - self.damp1;
    }

    /// Get the current damping value.
    #[inline]
    pub fn damp(&self) -> f32 {
        self.damp1
    }

    /// Process a single sample through the comb filter.
    ///
    /// The output is the delayed signal, which is fed back through a
    /// one-pole lowpass and summed with the input into the delay line.
    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let output = self.buffer[self.index];

        // filterstore = output * (1 - damp) + filterstore * damp
        self.filterstore = flush_denormal(output * self.damp2 + self.filterstore * self.damp1);

        self.buffer[self.index] = input + self.filterstore * self.feedback;
        self.index += 1;
        if self.index == self.buffer.len() {
            self.index = 0;
        }

        output
    }

    /// Clear the comb filter state.
    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.filterstore = 0.0;
    }

    /// Get the delay length in samples.
    pub fn delay_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comb_echo_timing() {
        let mut comb = CombFilter::new(100);
        comb.set_feedback(0.5);
        comb.set_damp(0.2);

        // First output comes from the empty delay line.
        let first = comb.process(1.0);
        assert_eq!(first, 0.0);

        for _ in 0..99 {
            assert_eq!(comb.process(0.0), 0.0);
        }

        // The impulse reappears exactly one delay length later.
        let echo = comb.process(0.0);
        assert!(echo.abs() > 0.1, "should have an echo, got {}", echo);
    }

    #[test]
    fn test_comb_feedback_decay() {
        let mut comb = CombFilter::new(10);
        comb.set_feedback(0.8);
        comb.set_damp(0.0);

        comb.process(1.0);

        let mut last_peak = 0.0f32;
        for _ in 0..100 {
            let out = comb.process(0.0);
            if out.abs() > 0.01 {
                if last_peak > 0.0 {
                    assert!(out.abs() <= last_peak + 0.01, "echoes should decay");
                }
                last_peak = out.abs();
            }
        }
    }

    #[test]
    fn test_comb_clear() {
        let mut comb = CombFilter::new(10);
        for _ in 0..20 {
            comb.process(1.0);
        }

        comb.clear();

        for _ in 0..20 {
            let out = comb.process(0.0);
            assert!(out.abs() < 1e-10, "should be silent after clear");
        }
    }

    #[test]
    fn test_comb_damping_reduces_energy() {
        let mut bright = CombFilter::new(20);
        bright.set_feedback(0.8);
        bright.set_damp(0.0);

        let mut dark = CombFilter::new(20);
        dark.set_feedback(0.8);
        dark.set_damp(0.8);

        bright.process(1.0);
        dark.process(1.0);

        let mut bright_sum = 0.0f32;
        let mut dark_sum = 0.0f32;
        for _ in 0..200 {
            bright_sum += bright.process(0.0).abs();
            dark_sum += dark.process(0.0).abs();
        }

        assert!(dark_sum < bright_sum, "damped output should carry less energy");
    }

    #[test]
    fn test_no_denormals_after_silence() {
        let mut comb = CombFilter::new(100);
        comb.set_feedback(0.9);
        comb.set_damp(0.3);

        for _ in 0..1000 {
            comb.process(0.5);
        }

        // A decaying tail must not enter IEEE 754 subnormal range, which
        // degrades CPU performance badly on most architectures.
        for i in 0..100_000 {
            let out = comb.process(0.0);
            assert!(
                out == 0.0 || out.abs() > f32::MIN_POSITIVE,
                "denormal detected at sample {}: {:.2e}",
                i,
                out
            );
        }
    }
}
