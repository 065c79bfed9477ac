//! Lock-free parameter scalars.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// An `f32` that can be written from the control thread and read from the
/// audio thread without locking.
///
/// Stored as the bit pattern in an [`AtomicU32`]; all accesses are relaxed,
/// which is sufficient for independent parameter scalars. Cross-parameter
/// consistency, where it matters, comes from the owner's dirty-flag
/// snapshotting, not from ordering here.
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    /// Create a new atomic float.
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    /// Read the current value.
    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Write a new value.
    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl fmt::Debug for AtomicF32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicF32").field(&self.load()).finish()
    }
}

impl From<f32> for AtomicF32 {
    fn from(value: f32) -> Self {
        Self::new(value)
    }
}
