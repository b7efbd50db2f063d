//! Voice activity detection
//!
//! Energy-based per-frame classifier: a frame has voice when its mean
//! absolute amplitude exceeds the threshold. The detector is stateless;
//! endpointing hysteresis (silence timers, hangover) lives in the session
//! state machine.

use crate::audio::mean_abs_amplitude;

/// Baseline threshold on the i16 amplitude scale, matching a sensitivity
/// of 0.5.
pub const BASELINE_THRESHOLD: f32 = 200.0;

/// Lowest usable threshold (most sensitive)
const MIN_THRESHOLD: f32 = 50.0;

/// Highest usable threshold (least sensitive)
const MAX_THRESHOLD: f32 = 400.0;

/// Energy voice-activity detector
#[derive(Debug, Clone, Copy)]
pub struct EnergyVad {
    threshold: f32,
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self {
            threshold: BASELINE_THRESHOLD,
        }
    }
}

impl EnergyVad {
    /// Build a detector from an assistant's endpointing sensitivity (0..1).
    ///
    /// Higher sensitivity lowers the threshold: sensitivity 0.5 reproduces
    /// the baseline of 200, 1.0 maps to 100, 0.0 maps to 300. The result is
    /// clamped to [50, 400].
    pub fn from_sensitivity(sensitivity: f32) -> Self {
        let s = sensitivity.clamp(0.0, 1.0);
        let threshold = (BASELINE_THRESHOLD * (1.5 - s)).clamp(MIN_THRESHOLD, MAX_THRESHOLD);
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Classify one little-endian 16-bit PCM frame
    pub fn has_voice(&self, frame: &[u8]) -> bool {
        mean_abs_amplitude(frame) > self.threshold
    }
}
