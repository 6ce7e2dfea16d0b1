//! C9 — call coordinator façade.
//!
//! Owns the top-level state machine (§4.8) and composes C1-C8. Mirrors the
//! guarded-transition-over-owned-state shape of `listening/manager.rs`'s
//! `ListeningManager`, generalized from one `Mutex<RecordingManager>` to a
//! handful of owned components plus the one piece of state that genuinely
//! crosses a thread boundary (the ring buffer, §5). State is only ever
//! observed by the coordinator itself; every component exposes
//! message-passing-shaped methods rather than shared references (§9).

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::batch::{BatchRecorder, BatchRecorderConfig, FragmentOutcome};
use crate::capture::AudioCapture;
use crate::clock::{render_session_filename, Clock};
use crate::config::Config;
use crate::hardware::{HardwareController, HardwareState};
use crate::idle::{hardware_idle_predicate, IdleController, IdlePredicateInputs};
use crate::level::{LevelDetector, LevelDetectorConfig, LevelEvent};
use crate::playback::{PlaybackEvent, PlaybackWorker};
use crate::ring_buffer::RingBuffer;
use crate::save::{build_blob, BlobStore, MetadataStore, SaveItem, SaveWorker};
use crate::session::{ClosedReason, SessionRegistry, SessionRegistryError};

/// §4.8 state diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Recording,
    PlaybackArmed,
    Playing,
    Draining,
}

/// Point-in-time snapshot (§4.8): `Clone`-able, taken without holding any
/// lock on the coordinator's own state — only `HardwareController`'s brief
/// internal lock, the same one any other caller of its public accessor
/// would take.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorStatus {
    pub state: CoordinatorState,
    pub active_session_id: Option<Uuid>,
    pub hardware_state: HardwareState,
    pub save_queue_depth: usize,
}

/// What the caller must do in response to a coordinator event (§5: hardware
/// calls and save-queue mutation happen off the audio-callback path).
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorAction {
    EnsureHardwareActive,
    DeactivateHardware,
    EnqueueForSave(SaveItem),
}

/// Top-level error surfaced at the façade boundary (§10.2): hand-written
/// `Display`/`Error`, matching this codebase's state-machine error style
/// rather than `thiserror`.
#[derive(Debug)]
pub enum CoordinatorError {
    CaptureUnavailable(crate::capture::CaptureError),
    NoSessionOpen(SessionRegistryError),
}

impl fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinatorError::CaptureUnavailable(err) => {
                write!(f, "capture unavailable: {err}")
            }
            CoordinatorError::NoSessionOpen(err) => write!(f, "session registry error: {err}"),
        }
    }
}

impl std::error::Error for CoordinatorError {}

/// Composes C1-C8 behind the state machine described in §4.8.
pub struct CallCoordinator {
    config: Config,
    clock: Arc<dyn Clock>,
    capture: Arc<dyn AudioCapture>,
    hardware: Arc<HardwareController>,

    state: CoordinatorState,
    ring: Arc<Mutex<RingBuffer>>,
    level: LevelDetector,
    recorder: BatchRecorder,
    sessions: SessionRegistry,
    idle: IdleController,
    playback: PlaybackWorker,
    save: SaveWorker,

    init_segment: Vec<u8>,
    session_first_frame_captured: bool,
    audio_detected_this_session: bool,
}

impl CallCoordinator {
    pub fn new(
        config: Config,
        clock: Arc<dyn Clock>,
        capture: Arc<dyn AudioCapture>,
        hardware: Arc<HardwareController>,
        blob_store: Arc<dyn BlobStore>,
        metadata_store: Arc<dyn MetadataStore>,
    ) -> Self {
        let level = LevelDetector::new(LevelDetectorConfig {
            audio_threshold: config.audio_threshold,
            sustain_duration_ms: config.sustain_duration_ms,
        });
        let recorder = BatchRecorder::new(BatchRecorderConfig {
            min_batch_ms: config.min_batch_ms,
            target_batch_ms: config.target_batch_ms,
            max_batch_ms: config.max_batch_ms,
        });
        let idle = IdleController::new(config.disable_delay_ms, config.hardware_idle_delay_ms);
        let playback = PlaybackWorker::new(
            config.sample_rate,
            config.playback_delay_ms,
            config.max_audio_age_ms,
            config.callback_size,
            config.drain_callback_threshold,
            config.ramp.clone(),
        );
        let save = SaveWorker::new(config.max_save_sessions, blob_store, metadata_store);
        let ring = Arc::new(Mutex::new(RingBuffer::new(config.ring_buffer_capacity_samples)));

        Self {
            config,
            clock,
            capture,
            hardware,
            state: CoordinatorState::Idle,
            ring,
            level,
            recorder,
            sessions: SessionRegistry::new(),
            idle,
            playback,
            save,
            init_segment: Vec::new(),
            session_first_frame_captured: false,
            audio_detected_this_session: false,
        }
    }

    pub fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            state: self.state,
            active_session_id: self.sessions.current().map(|s| s.id),
            hardware_state: self.hardware.state(),
            save_queue_depth: self.save.len(),
        }
    }

    /// Shared ring buffer handle, for the dedicated capture/output threads
    /// to push into and pull from across the thread boundary (§5).
    pub fn ring_buffer(&self) -> Arc<Mutex<RingBuffer>> {
        self.ring.clone()
    }

    pub fn hardware(&self) -> &Arc<HardwareController> {
        &self.hardware
    }

    /// Begin capturing (§6 Audio capture). Caches the encoder's pre-roll
    /// init segment for later use at save time (§4.7).
    pub fn begin_monitoring(
        &mut self,
        sink: std::sync::mpsc::Sender<crate::capture::CaptureEvent>,
    ) -> Result<u32, CoordinatorError> {
        let sample_rate = self.capture.start(sink).map_err(|err| {
            error!("capture unavailable, monitoring cannot start: {err}");
            CoordinatorError::CaptureUnavailable(err)
        })?;
        self.init_segment = self.capture.init_segment();
        Ok(sample_rate)
    }

    /// One captured PCM frame (§5 capture-tap path): pushed into the ring
    /// buffer and fed to the level detector on the same tick, never
    /// sequenced one after the other (§4.8).
    pub fn on_pcm_frame(&mut self, samples: &[f32], now_ms: u64) -> Option<CoordinatorAction> {
        self.ring.lock().push(samples, now_ms);

        if self.state == CoordinatorState::Recording && !self.session_first_frame_captured {
            self.session_first_frame_captured = true;
            self.state = CoordinatorState::PlaybackArmed;
        }

        let level_event = self.level.process(samples, now_ms);
        let action = match level_event {
            LevelEvent::AudioDetected { level } => self.on_audio_detected(now_ms, level),
            LevelEvent::Silence => {
                self.idle.on_silence(now_ms);
                None
            }
        };

        if self.recorder.is_active() {
            let silence_sustained = matches!(level_event, LevelEvent::Silence);
            if self.recorder.on_tick(now_ms, silence_sustained).is_some() {
                self.capture.request_flush();
            }
        }

        action
    }

    fn on_audio_detected(&mut self, now_ms: u64, level: u8) -> Option<CoordinatorAction> {
        debug!("audio detected at level {level}");
        self.idle.on_audio_detected();

        match self.state {
            CoordinatorState::Idle => {
                let session_id = Uuid::new_v4();
                let first_detected_at = self.clock.now_utc();
                if let Err(err) = self.sessions.open(
                    session_id,
                    first_detected_at,
                    self.config.timezone_id.clone(),
                ) {
                    warn!("failed to open session: {err}");
                    return None;
                }
                self.recorder.start_session(session_id, now_ms);
                self.session_first_frame_captured = false;
                self.audio_detected_this_session = true;
                self.state = CoordinatorState::Recording;
                Some(CoordinatorAction::EnsureHardwareActive)
            }
            CoordinatorState::Recording
            | CoordinatorState::PlaybackArmed
            | CoordinatorState::Playing => None,
            CoordinatorState::Draining => None,
        }
    }

    /// An encoder fragment arrived (§4.3/§4.7).
    pub fn on_encoded_fragment(&mut self, bytes: Vec<u8>, now_ms: u64) -> Option<CoordinatorAction> {
        match self.recorder.on_fragment(bytes, now_ms) {
            FragmentOutcome::Pending => None,
            FragmentOutcome::Sealed(batch) => {
                if let Err(err) = self.sessions.append_batch(batch) {
                    warn!("failed to append sealed batch: {err}");
                }
                None
            }
            FragmentOutcome::SealedAndClosed(batch) => {
                if let Err(err) = self.sessions.append_batch(batch) {
                    warn!("failed to append final batch: {err}");
                }
                self.close_current_session(now_ms, ClosedReason::SilenceTimeout)
            }
            FragmentOutcome::EmptySeal { session_closed } => {
                if session_closed {
                    self.close_current_session(now_ms, ClosedReason::SilenceTimeout)
                } else {
                    None
                }
            }
        }
    }

    /// The encoder returned no data or a malformed fragment for the current
    /// flush (§7 Encoder fault). The in-flight batch is discarded; recording
    /// continues uninterrupted with a fresh batch on the next audio.
    pub fn on_encoder_fault(&mut self, reason: &str, now_ms: u64) {
        warn!("encoder fault, discarding current batch: {reason}");
        self.recorder.discard_current_batch(now_ms);
    }

    fn close_current_session(
        &mut self,
        now_ms: u64,
        reason: ClosedReason,
    ) -> Option<CoordinatorAction> {
        let session = match self.sessions.close(reason) {
            Ok(session) => session,
            Err(err) => {
                warn!("close_current_session: {err}");
                return None;
            }
        };

        self.idle.on_recorder_stopped(now_ms);
        self.state = CoordinatorState::Idle;
        self.audio_detected_this_session = false;

        if session.batches.is_empty() {
            return None;
        }

        let total_duration_ms: u64 = session.batches.iter().map(|b| b.duration_ms).sum();
        let blob = build_blob(&self.init_segment, &session.batches);
        let filename = render_session_filename(
            session.first_detected_at,
            &session.timezone_id,
            &self.config.encoder_ext,
        );

        Some(CoordinatorAction::EnqueueForSave(SaveItem {
            session_id: session.id,
            blob,
            filename,
            first_detected_at: session.first_detected_at,
            batch_count: session.batches.len(),
            total_duration_ms,
            retry_count: 0,
        }))
    }

    /// Periodic check, ≤100ms cadence (§4.4).
    pub fn on_timer_tick(&mut self, now_ms: u64) -> Vec<CoordinatorAction> {
        let mut actions = Vec::new();

        if self.idle.check_silence_expired(now_ms) {
            self.recorder.stop_session();
            self.capture.request_flush();
            self.state = CoordinatorState::Draining;
        }

        if self.idle.check_hardware_idle_expired(now_ms) {
            let drain_ms = (self.ring.lock().available() as u64)
                .saturating_mul(1000)
                / self.config.sample_rate.max(1) as u64;
            let inputs = IdlePredicateInputs {
                batching: self.recorder.is_active(),
                playback_worker_idle: !self.playback.is_started(),
                ring_buffer_drain_ms: drain_ms,
                batch_queue_empty: self.save.is_empty(),
            };
            if hardware_idle_predicate(&inputs) {
                actions.push(CoordinatorAction::DeactivateHardware);
            }
        }

        actions
    }

    /// One audio-output callback (§4.6), driven by the dedicated output
    /// thread. Advances `PlaybackArmed -> Playing` once the worker starts.
    pub fn playback_tick(&mut self, now_ms: u64, now_hour_utc: Option<u32>) -> Vec<f32> {
        let was_started = self.playback.is_started();
        let hardware_state = self.hardware.state();
        let recorder_active = self.recorder.is_active();

        let tick = {
            let mut ring = self.ring.lock();
            self.playback.next_callback(
                &mut ring,
                hardware_state,
                now_ms,
                now_hour_utc,
                self.audio_detected_this_session,
                recorder_active,
            )
        };

        if !was_started && self.playback.is_started() && self.state == CoordinatorState::PlaybackArmed {
            self.state = CoordinatorState::Playing;
            if let Err(err) = self.sessions.mark_playback_started(now_ms) {
                warn!("failed to mark playback started: {err}");
            }
        }

        if let Some(PlaybackEvent::TtlExpired | PlaybackEvent::Drained) = tick.event {
            if let Err(err) = self.sessions.mark_playback_ended(now_ms) {
                warn!("failed to mark playback ended: {err}");
            }
        }

        tick.samples
    }

    /// Apply a `CoordinatorAction` the caller already carried out
    /// (`EnqueueForSave`): push into the save worker and log any dropped
    /// overflow item.
    pub fn enqueue_for_save(&mut self, item: SaveItem) {
        self.save.enqueue(item);
    }

    /// Drain the save queue one item (§4.7). The caller sleeps the retry
    /// backoff between `Failed` outcomes (§5 suspension point (c)).
    pub async fn run_save_once(&mut self) -> crate::save::SaveOutcome {
        self.save.run_once().await
    }

    pub async fn ensure_hardware_active(&self) -> HardwareState {
        self.hardware.ensure_active().await
    }

    pub async fn deactivate_hardware(&self) -> HardwareState {
        self.hardware.deactivate().await
    }

    /// `abort()` (§5): idempotent. Stops the recorder, clears queues, sets
    /// hardware to `Idle`, discards any in-flight save item, and returns to
    /// `Idle` with no save.
    pub fn abort(&mut self) {
        self.capture.stop();
        self.recorder.abort();
        let _ = self.sessions.mark_playback_ended(self.clock.monotonic_ms());
        let _ = self.sessions.close(ClosedReason::Aborted);
        self.hardware.abort();
        self.save.clear();
        self.ring.lock().clear();
        self.playback.abort();
        self.idle = IdleController::new(self.config.disable_delay_ms, self.config.hardware_idle_delay_ms);
        self.state = CoordinatorState::Idle;
        self.session_first_frame_captured = false;
        self.audio_detected_this_session = false;
    }
}

#[cfg(test)]
#[path = "coordinator_test.rs"]
mod tests;
