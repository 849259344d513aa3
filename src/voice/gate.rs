//! RMS energy gate
//!
//! Cheap pre-filter that decides whether a frame is loud enough to be worth
//! handing to the VAD classifier.

use super::Frame;

/// Classifies frames as loud enough to check, or not
#[derive(Debug, Clone, Copy)]
pub struct EnergyGate {
    threshold: f32,
}

impl EnergyGate {
    /// Create a gate passing frames whose RMS is at least `threshold`
    #[must_use]
    pub const fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Configured RMS threshold
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Whether `frame` clears the threshold
    #[must_use]
    pub fn passes(&self, frame: &Frame) -> bool {
        calculate_rms(frame.samples()) >= self.threshold
    }
}

/// RMS energy of PCM samples normalized to [-1, 1]
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let normalized = f64::from(s) / 32768.0;
            normalized * normalized
        })
        .sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}
