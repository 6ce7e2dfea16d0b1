//! C2 — level detector.
//!
//! Converts live PCM into a normalized 0-100 loudness value and applies a
//! threshold + sustain-duration debounce, in the spirit of this codebase's
//! RMS-based silence detector — but driven by an externally supplied
//! monotonic clock reading rather than an owned `Instant`, so the coordinator
//! can replay scenarios deterministically (§9: timers must not own their own
//! clock).

/// Tunables for [`LevelDetector`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelDetectorConfig {
    /// Loudness (0-100) above which audio counts as "above threshold".
    pub audio_threshold: u8,
    /// How long the level must stay above threshold before it is reported
    /// as sustained. `0` reports sustained on the same tick threshold is
    /// crossed.
    pub sustain_duration_ms: u64,
}

/// Exactly one of these is emitted per processed tick (§4.2).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LevelEvent {
    /// Level is sustained above threshold.
    AudioDetected { level: u8 },
    /// Level is at or below threshold.
    Silence,
}

/// Threshold + sustain-duration debounce over an RMS-derived loudness value.
pub struct LevelDetector {
    config: LevelDetectorConfig,
    above_since: Option<u64>,
}

impl LevelDetector {
    pub fn new(config: LevelDetectorConfig) -> Self {
        Self {
            config,
            above_since: None,
        }
    }

    /// Root-mean-square energy of a sample frame; `0.0` for empty input.
    pub fn calculate_rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
        (sum_squares / samples.len() as f32).sqrt()
    }

    /// Map RMS energy onto a 0-100 loudness scale.
    pub fn level_from_rms(rms: f32) -> u8 {
        (rms * 300.0).min(100.0) as u8
    }

    /// Process one frame, returning exactly one of the two spec events.
    pub fn process(&mut self, samples: &[f32], now_ms: u64) -> LevelEvent {
        let level = Self::level_from_rms(Self::calculate_rms(samples));
        let above_threshold = level > self.config.audio_threshold;

        if !above_threshold {
            self.above_since = None;
            return LevelEvent::Silence;
        }

        let since = *self.above_since.get_or_insert(now_ms);
        let sustained = now_ms.saturating_sub(since) >= self.config.sustain_duration_ms;

        if sustained {
            LevelEvent::AudioDetected { level }
        } else {
            LevelEvent::Silence
        }
    }

    pub fn reset(&mut self) {
        self.above_since = None;
    }

    pub fn config(&self) -> &LevelDetectorConfig {
        &self.config
    }
}

#[cfg(test)]
#[path = "level_test.rs"]
mod tests;
