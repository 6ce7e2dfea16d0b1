//! Coordinator-wide configuration.
//!
//! Every tunable named across §4 is collected here into one immutable value
//! passed at construction (§6): environment variables, CLI flags, and
//! persisted preferences are a host-process concern, not the core's.

use crate::constants::*;

/// Optional ramp schedule applied to the first audio of a session (§4.6).
#[derive(Debug, Clone, PartialEq)]
pub struct RampConfig {
    /// Gain applied the instant the ramp starts.
    pub start_volume: f32,
    /// Gain the ramp approaches linearly.
    pub target_volume: f32,
    /// Duration of the linear ramp, in milliseconds.
    pub duration_ms: u64,
    /// If set, the ramp only arms when the session's first-audio timestamp
    /// falls within `[window_start_hour, window_end_hour)` local time.
    pub time_of_day_window: Option<(u32, u32)>,
}

impl Default for RampConfig {
    fn default() -> Self {
        Self {
            start_volume: 0.2,
            target_volume: 1.0,
            duration_ms: 1500,
            time_of_day_window: None,
        }
    }
}

/// Immutable configuration for a [`crate::coordinator::CallCoordinator`].
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Capture sample rate, in Hz.
    pub sample_rate: u32,
    /// Ring buffer capacity, in samples (defaults to `RING_BUFFER_SECONDS`).
    pub ring_buffer_capacity_samples: usize,

    /// Level-detector threshold (0-100) above which audio is "detected".
    pub audio_threshold: u8,
    /// Minimum sustained-above-threshold duration before audio counts as
    /// detected (milliseconds); `0` reports detection on the same tick.
    pub sustain_duration_ms: u64,

    /// Never seal a batch earlier than this (milliseconds).
    pub min_batch_ms: u64,
    /// Prefer to seal at or after this elapsed time, on a silent tick
    /// (word-boundary cut).
    pub target_batch_ms: u64,
    /// Force-seal regardless of speech state at this elapsed time.
    pub max_batch_ms: u64,

    /// Delay after sustained silence before a session is closed.
    pub disable_delay_ms: u64,
    /// Delay after batching stops before the hardware fleet may deactivate.
    pub hardware_idle_delay_ms: u64,

    /// Maximum permissible age of the oldest buffered sample.
    pub max_audio_age_ms: u64,
    /// Minimum accumulated playback buffer before output starts.
    pub playback_delay_ms: u64,
    /// Output callback size, in samples.
    pub callback_size: usize,
    /// Optional gain ramp applied to the first audio of a session.
    pub ramp: Option<RampConfig>,
    /// Consecutive empty callbacks (with the recorder idle) before the
    /// playback worker considers itself drained.
    pub drain_callback_threshold: u32,

    /// Bounded capacity of the save queue.
    pub max_save_sessions: usize,
    /// Sleep between save-worker retries after a failed upload.
    pub retry_backoff_ms: u64,

    /// IANA timezone id used to render session timestamps and filenames.
    pub timezone_id: String,
    /// File extension derived from the encoder's mime type (§6), e.g.
    /// `"opus"`, `"ogg"`, `"webm"`, `"m4a"`.
    pub encoder_ext: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            ring_buffer_capacity_samples: 16_000 * RING_BUFFER_SECONDS as usize,

            audio_threshold: 5,
            sustain_duration_ms: 50,

            min_batch_ms: MIN_BATCH_MS,
            target_batch_ms: TARGET_BATCH_MS,
            max_batch_ms: MAX_BATCH_MS,

            disable_delay_ms: DEFAULT_DISABLE_DELAY_MS,
            hardware_idle_delay_ms: DEFAULT_HARDWARE_IDLE_DELAY_MS,

            max_audio_age_ms: MAX_AUDIO_AGE_MS,
            playback_delay_ms: 4000,
            callback_size: DEFAULT_CALLBACK_SIZE,
            ramp: None,
            drain_callback_threshold: DEFAULT_DRAIN_CALLBACK_THRESHOLD,

            max_save_sessions: DEFAULT_MAX_SAVE_SESSIONS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,

            timezone_id: "UTC".to_string(),
            encoder_ext: "opus".to_string(),
        }
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
