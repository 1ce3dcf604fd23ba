//! Gain-stage taps read by the visualizer.

use std::sync::atomic::{AtomicU32, Ordering};

/// A passthrough gain stage that remembers the level of the last block it saw.
///
/// Values are stored as `f32` bits so the audio threads never take a lock.
#[derive(Debug)]
pub struct LevelTap {
    gain: AtomicU32,
    level: AtomicU32,
}

impl Default for LevelTap {
    fn default() -> Self {
        Self::new()
    }
}

impl LevelTap {
    pub fn new() -> Self {
        Self {
            gain: AtomicU32::new(1.0f32.to_bits()),
            level: AtomicU32::new(0.0f32.to_bits()),
        }
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }

    pub fn set_gain(&self, gain: f32) {
        let gain = if gain.is_finite() { gain.max(0.0) } else { 1.0 };
        self.gain.store(gain.to_bits(), Ordering::Relaxed);
    }

    /// RMS level of the most recent block, after gain.
    pub fn level(&self) -> f32 {
        f32::from_bits(self.level.load(Ordering::Relaxed))
    }

    /// Measure a block without touching it (side branch off the signal path).
    pub fn observe(&self, samples: &[f32]) {
        let level = rms(samples) * self.gain();
        self.level.store(level.to_bits(), Ordering::Relaxed);
    }

    /// Scale a block in place, then measure it (in the signal path).
    pub fn apply(&self, samples: &mut [f32]) {
        let gain = self.gain();
        if gain != 1.0 {
            samples.iter_mut().for_each(|s| *s *= gain);
        }
        self.level.store(rms(samples).to_bits(), Ordering::Relaxed);
    }
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
