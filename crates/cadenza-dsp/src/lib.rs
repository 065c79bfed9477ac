//! Cadenza DSP - filter primitives for the cadenza audio graph
//!
//! This crate provides the DSP building blocks consumed by the audio graph
//! layer, designed for real-time processing with zero allocation in the
//! audio path once constructed.
//!
//! # Contents
//!
//! - [`CombFilter`] - feedback comb filter with one-pole damping
//! - [`AllpassFilter`] - Schroeder allpass for diffusion
//! - [`ReverbBank`] - Freeverb-style comb/allpass bank over interleaved
//!   multi-channel audio, reconfigured through [`ReverbSettings`]
//! - Vector helpers: [`ramp_gain`], [`scale`], [`flush_denormal`]
//!
//! # no_std Support
//!
//! This crate is `no_std` compatible for embedded targets. Disable the
//! default `std` feature:
//!
//! ```toml
//! [dependencies]
//! cadenza-dsp = { version = "0.1", default-features = false }
//! ```
//!
//! # Design Principles
//!
//! - **Real-time safe**: no allocations in processing paths
//! - **No dependency on std**: math via `libm`
//! - **Single-writer state**: the structures here are plain mutable values;
//!   concurrency control belongs to the graph layer that owns them

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod allpass;
pub mod comb;
pub mod math;
pub mod reverb;

pub use allpass::AllpassFilter;
pub use comb::CombFilter;
pub use math::{flush_denormal, ramp_gain, scale};
pub use reverb::{ReverbBank, ReverbSettings};
