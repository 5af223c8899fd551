//! Playback rate estimation from per-frame durations.

use serde::{Deserialize, Serialize};

/// Duration assumed for frames whose container delay is missing or zero.
pub const DEFAULT_FRAME_DURATION_MS: u32 = 100;

/// Closed range the effective frame rate is clamped into.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimits {
    pub min: f64,
    pub max: f64,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            min: 5.0,
            max: 60.0,
        }
    }
}

/// Effective frames per second for an animation: `count / (total_ms / 1000)`,
/// clamped into `limits`.
///
/// Zero durations count as [`DEFAULT_FRAME_DURATION_MS`], so the divisor is
/// never zero. An empty sequence yields `limits.min`.
pub fn estimate_frame_rate(durations_ms: &[u32], limits: RateLimits) -> f64 {
    match average_frame_rate(durations_ms) {
        Some(fps) => fps.clamp(limits.min, limits.max),
        None => limits.min,
    }
}

/// Unclamped average rate, or `None` for an empty sequence.
pub fn average_frame_rate(durations_ms: &[u32]) -> Option<f64> {
    if durations_ms.is_empty() {
        return None;
    }
    let total_ms: u64 = durations_ms
        .iter()
        .map(|&d| u64::from(effective_duration(d)))
        .sum();
    Some(durations_ms.len() as f64 / (total_ms as f64 / 1000.0))
}

pub(crate) fn effective_duration(duration_ms: u32) -> u32 {
    if duration_ms == 0 {
        DEFAULT_FRAME_DURATION_MS
    } else {
        duration_ms
    }
}
