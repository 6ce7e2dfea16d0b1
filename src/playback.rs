//! C6 — playback worker.
//!
//! Consumes the PCM ring buffer and produces a fixed-size output callback
//! on the capture sample rate's cadence (§4.6). Grounded on this codebase's
//! `cpal_backend.rs` input-stream callback — same "bounded, lock-guarded,
//! never block the hardware thread" shape, run in reverse (drain instead of
//! fill). The callback body is a pure function of ring-buffer state and is
//! driven from its own OS thread by the coordinator, same as the capture
//! side (§5).

use crate::config::RampConfig;
use crate::hardware::HardwareState;
use crate::ring_buffer::RingBuffer;

/// Emitted by a callback that changed playback-session bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The oldest buffered sample exceeded the audio TTL; buffer cleared.
    TtlExpired,
    /// The ring buffer ran dry while the recorder was idle; node stopped.
    Drained,
}

/// One callback's worth of output plus any bookkeeping event.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackTick {
    pub samples: Vec<f32>,
    pub event: Option<PlaybackEvent>,
}

struct RampState {
    armed_at_ms: u64,
    active: bool,
}

/// Step-1-through-5 callback logic of §4.6, independent of the concrete
/// output device.
pub struct PlaybackWorker {
    sample_rate: u32,
    playback_delay_ms: u64,
    max_audio_age_ms: u64,
    callback_size: usize,
    drain_callback_threshold: u32,
    ramp: Option<RampConfig>,

    started: bool,
    ramp_state: Option<RampState>,
    consecutive_empty: u32,
}

impl PlaybackWorker {
    pub fn new(
        sample_rate: u32,
        playback_delay_ms: u64,
        max_audio_age_ms: u64,
        callback_size: usize,
        drain_callback_threshold: u32,
        ramp: Option<RampConfig>,
    ) -> Self {
        Self {
            sample_rate,
            playback_delay_ms,
            max_audio_age_ms,
            callback_size,
            drain_callback_threshold,
            ramp,
            started: false,
            ramp_state: None,
            consecutive_empty: 0,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Coordinator `abort()` (§5): discard playback-session bookkeeping
    /// without touching the ring buffer itself (the coordinator clears that
    /// separately).
    pub fn abort(&mut self) {
        self.reset_session();
    }

    fn reset_session(&mut self) {
        self.started = false;
        self.ramp_state = None;
        self.consecutive_empty = 0;
    }

    fn silence(&self) -> Vec<f32> {
        vec![0.0; self.callback_size]
    }

    /// One output callback. `now_hour_utc` is the wall-clock hour used to
    /// evaluate the ramp's time-of-day window (§4.6 step 3); `None` fails
    /// the window check rather than guessing. `audio_detected_this_session`
    /// is the level detector's running "has spoken at least once" signal —
    /// step 3's "non-zero sample observed" gate, evaluated upstream of the
    /// ring buffer rather than re-scanned here.
    pub fn next_callback(
        &mut self,
        ring: &mut RingBuffer,
        hardware_state: HardwareState,
        now_ms: u64,
        now_hour_utc: Option<u32>,
        audio_detected_this_session: bool,
        recorder_active: bool,
    ) -> PlaybackTick {
        if hardware_state != HardwareState::Active {
            return PlaybackTick {
                samples: self.silence(),
                event: None,
            };
        }

        if ring.enforce_ttl(now_ms, self.max_audio_age_ms) {
            self.reset_session();
            return PlaybackTick {
                samples: self.silence(),
                event: Some(PlaybackEvent::TtlExpired),
            };
        }

        if !self.started {
            let available_ms =
                (ring.available() as u64).saturating_mul(1000) / self.sample_rate.max(1) as u64;
            if available_ms >= self.playback_delay_ms && audio_detected_this_session {
                self.started = true;
                self.ramp_state = self.ramp.as_ref().map(|ramp| RampState {
                    armed_at_ms: now_ms,
                    active: ramp_window_allows(ramp, now_hour_utc),
                });
            } else {
                return PlaybackTick {
                    samples: self.silence(),
                    event: None,
                };
            }
        }

        let was_empty = ring.available() == 0;
        let mut samples = ring.pull(self.callback_size);

        if let (Some(ramp_cfg), Some(state)) = (&self.ramp, &self.ramp_state) {
            if state.active {
                apply_ramp(&mut samples, ramp_cfg, now_ms, state.armed_at_ms);
            }
        }
        for sample in samples.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        let mut event = None;
        if was_empty && !recorder_active {
            self.consecutive_empty += 1;
            if self.consecutive_empty >= self.drain_callback_threshold {
                self.reset_session();
                event = Some(PlaybackEvent::Drained);
            }
        } else {
            self.consecutive_empty = 0;
        }

        PlaybackTick { samples, event }
    }
}

fn apply_ramp(samples: &mut [f32], ramp: &RampConfig, now_ms: u64, armed_at_ms: u64) {
    let elapsed = now_ms.saturating_sub(armed_at_ms) as f64;
    let t = (elapsed / ramp.duration_ms.max(1) as f64).min(1.0);
    let gain = ramp.start_volume as f64 + (ramp.target_volume as f64 - ramp.start_volume as f64) * t;
    for sample in samples.iter_mut() {
        *sample = (*sample as f64 * gain) as f32;
    }
}

fn ramp_window_allows(ramp: &RampConfig, now_hour_utc: Option<u32>) -> bool {
    match (ramp.time_of_day_window, now_hour_utc) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some((start, end)), Some(hour)) => {
            if start <= end {
                hour >= start && hour < end
            } else {
                hour >= start || hour < end
            }
        }
    }
}

#[cfg(test)]
#[path = "playback_test.rs"]
mod tests;
