//! C7 — silence and hardware-idle deadlines.
//!
//! Two independent `Option<monotonic_ms>` deadlines owned by the
//! coordinator (§4.4), checked on a periodic tick rather than by spawning a
//! timer per deadline — the same polling shape as this codebase's
//! `SilenceDetector`, generalized from one deadline to two that are set and
//! cleared by different events.

/// Inputs to the hardware-idle predicate (§4.4), gathered by the
/// coordinator from C3/C6/C8 at the moment the hardware-idle deadline
/// expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdlePredicateInputs {
    pub batching: bool,
    pub playback_worker_idle: bool,
    pub ring_buffer_drain_ms: u64,
    pub batch_queue_empty: bool,
}

/// `(!batching) ∧ (playback_worker_idle ∨ ring_buffer_drain < 2s) ∧ (batch_queue empty)`.
pub fn hardware_idle_predicate(inputs: &IdlePredicateInputs) -> bool {
    !inputs.batching
        && (inputs.playback_worker_idle || inputs.ring_buffer_drain_ms < 2_000)
        && inputs.batch_queue_empty
}

/// Tracks the silence-close deadline and the hardware-deactivate deadline.
pub struct IdleController {
    silence_deadline: Option<u64>,
    hardware_idle_deadline: Option<u64>,
    disable_delay_ms: u64,
    hardware_idle_delay_ms: u64,
}

impl IdleController {
    pub fn new(disable_delay_ms: u64, hardware_idle_delay_ms: u64) -> Self {
        Self {
            silence_deadline: None,
            hardware_idle_deadline: None,
            disable_delay_ms,
            hardware_idle_delay_ms,
        }
    }

    pub fn silence_deadline(&self) -> Option<u64> {
        self.silence_deadline
    }

    pub fn hardware_idle_deadline(&self) -> Option<u64> {
        self.hardware_idle_deadline
    }

    /// `OnAudioDetected` (§4.4): clears both deadlines.
    pub fn on_audio_detected(&mut self) {
        self.silence_deadline = None;
        self.hardware_idle_deadline = None;
    }

    /// `OnSilence` (§4.4): arms the silence deadline only the first time it
    /// fires after activation; later `OnSilence` ticks while already armed
    /// leave the deadline untouched.
    pub fn on_silence(&mut self, now_ms: u64) {
        if self.silence_deadline.is_none() {
            self.silence_deadline = Some(now_ms.saturating_add(self.disable_delay_ms));
        }
    }

    /// The batch recorder stopped (§4.4): arms the hardware-idle deadline.
    pub fn on_recorder_stopped(&mut self, now_ms: u64) {
        self.hardware_idle_deadline = Some(now_ms.saturating_add(self.hardware_idle_delay_ms));
    }

    /// Periodic check (§4.4, ≤100ms cadence). Fires exactly once per arm.
    pub fn check_silence_expired(&mut self, now_ms: u64) -> bool {
        match self.silence_deadline {
            Some(deadline) if now_ms >= deadline => {
                self.silence_deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Periodic check for the hardware-idle deadline; the predicate itself
    /// is evaluated by the caller only on expiry (§4.4).
    pub fn check_hardware_idle_expired(&mut self, now_ms: u64) -> bool {
        match self.hardware_idle_deadline {
            Some(deadline) if now_ms >= deadline => {
                self.hardware_idle_deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
#[path = "idle_test.rs"]
mod tests;
