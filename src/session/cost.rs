//! Call cost accounting
//!
//! Flat per-minute rates in cents, attached to the Call row at teardown.
//! Billing reconciliation happens elsewhere; the engine only records the
//! breakdown.

use crate::types::CostBreakdown;

/// Cents per minute of speech-to-text
const STT_CENTS_PER_MINUTE: f64 = 0.6;

/// Cents per minute of language-model usage
const LLM_CENTS_PER_MINUTE: f64 = 1.5;

/// Cents per minute of synthesis
const TTS_CENTS_PER_MINUTE: f64 = 1.5;

/// Compute the cost breakdown for a call of the given duration
pub fn compute_cost(duration_seconds: u64) -> CostBreakdown {
    let minutes = duration_seconds as f64 / 60.0;
    let stt = (minutes * STT_CENTS_PER_MINUTE).round() as u32;
    let llm = (minutes * LLM_CENTS_PER_MINUTE).round() as u32;
    let tts = (minutes * TTS_CENTS_PER_MINUTE).round() as u32;
    CostBreakdown {
        stt,
        llm,
        tts,
        total: stt + llm + tts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_duration() {
        assert_eq!(compute_cost(0), CostBreakdown::default());
    }

    #[test]
    fn test_one_minute() {
        let cost = compute_cost(60);
        assert_eq!(cost.stt, 1); // 0.6 rounds up
        assert_eq!(cost.llm, 2); // 1.5 rounds up
        assert_eq!(cost.tts, 2);
        assert_eq!(cost.total, 5);
    }

    #[test]
    fn test_ten_minutes() {
        let cost = compute_cost(600);
        assert_eq!(cost.stt, 6);
        assert_eq!(cost.llm, 15);
        assert_eq!(cost.tts, 15);
        assert_eq!(cost.total, 36);
    }

    #[test]
    fn test_total_is_sum() {
        for secs in [7, 45, 61, 3600] {
            let c = compute_cost(secs);
            assert_eq!(c.total, c.stt + c.llm + c.tts);
        }
    }
}
