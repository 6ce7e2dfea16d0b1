//! Centralized constants for the call coordinator.
//!
//! Timing values are literal defaults matching the scenarios the coordinator
//! is validated against; callers that need different tuning build a custom
//! [`crate::config::Config`] instead of overriding these.

// =============================================================================
// RING BUFFER
// =============================================================================

/// Ring buffer capacity, expressed in seconds of audio at the capture sample rate.
pub const RING_BUFFER_SECONDS: u32 = 60;

// =============================================================================
// BATCH SEALING POLICY
// =============================================================================

/// Never seal a batch earlier than this many elapsed milliseconds.
pub const MIN_BATCH_MS: u64 = 4500;

/// Once elapsed time reaches this and the level detector reports silence,
/// request a flush and seal on the next word boundary.
pub const TARGET_BATCH_MS: u64 = 5000;

/// Force a flush regardless of speech state once elapsed time reaches this.
pub const MAX_BATCH_MS: u64 = 6500;

// =============================================================================
// SILENCE / IDLE CONTROLLERS
// =============================================================================

/// How often the coordinator re-checks its silence and hardware-idle deadlines.
pub const DEADLINE_CHECK_INTERVAL_MS: u64 = 100;

/// Delay after the first sustained `OnSilence` before a session is closed.
pub const DEFAULT_DISABLE_DELAY_MS: u64 = 8000;

/// Delay after batching stops before the hardware fleet is asked to deactivate.
pub const DEFAULT_HARDWARE_IDLE_DELAY_MS: u64 = 12_000;

// =============================================================================
// PLAYBACK WORKER
// =============================================================================

/// Maximum permissible age, in milliseconds, of the oldest buffered sample.
pub const MAX_AUDIO_AGE_MS: u64 = 60_000;

/// Default output callback size, in samples.
pub const DEFAULT_CALLBACK_SIZE: usize = 4096;

/// Number of consecutive empty callbacks (with the recorder idle) before the
/// playback worker considers itself drained and stops its output node.
pub const DEFAULT_DRAIN_CALLBACK_THRESHOLD: u32 = 8;

// =============================================================================
// SAVE WORKER
// =============================================================================

/// Bounded capacity of the save queue; oldest item dropped on overflow.
pub const DEFAULT_MAX_SAVE_SESSIONS: usize = 100;

/// Sleep between save-worker retries after a failed upload.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 5000;

#[cfg(test)]
#[path = "constants_test.rs"]
mod tests;
