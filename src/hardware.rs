//! C5 — hardware state machine.
//!
//! `Idle` / `Activating` / `Active` / `Deactivating` control plane for the
//! remote speaker fleet (§4.5), with a single in-flight abort token per
//! transition (§9: replaces ad-hoc boolean cancellation flags). The pure
//! state bookkeeping mirrors this codebase's `matches!`-tuple-validated
//! `RecordingManager`; the abort token threading it adds has no direct
//! counterpart there and is this crate's own construction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use log::{debug, warn};

/// Idle/Activating/Active/Deactivating control plane (§3 Hardware state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareState {
    Idle,
    Activating,
    Active,
    Deactivating,
}

/// Per-target outcome of a `set_zone` fan-out call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakerResult {
    pub speaker_id: String,
    pub ok: bool,
    pub error: Option<String>,
}

/// Speaker fleet control — external interface (§6).
///
/// `set_zone` is idempotent per target; implementations fan out in parallel
/// and return one result per speaker regardless of individual failures
/// (§4.5 "best-effort fan-out"). The abort token is advisory: an
/// implementation that can observe it mid-flight may stop early, but is not
/// required to — the core treats a stale result as harmless (§4.5
/// "Hardware transition aborted").
#[async_trait]
pub trait SpeakerFleet: Send + Sync {
    async fn set_zone(
        &self,
        speakers: &[String],
        zone_address: &str,
        abort: &AbortToken,
    ) -> Vec<SpeakerResult>;
}

/// Cancellation token carried by an in-flight `Activating`/`Deactivating`
/// transition (§3, §9). Cloning shares the same underlying flag.
#[derive(Clone)]
pub struct AbortToken(Arc<AtomicBool>);

impl AbortToken {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn same_as(&self, other: &AbortToken) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// What the caller of `ensure_active` must do next.
pub enum ActivationPlan {
    /// Run the fan-out with this token, then call `complete_activation`.
    RunFanOut(AbortToken),
    /// A fan-out is already in flight; nothing new to run.
    AlreadyInFlight,
    /// Already `Active`; no-op.
    NoOp,
}

/// What the caller of `deactivate` must do next.
pub enum DeactivationPlan {
    RunFanOut(AbortToken),
    AlreadyInFlight,
    /// Not currently `Active`; deactivate is only meaningful from `Active`.
    NotActive,
}

/// Synchronous transition bookkeeping, held behind a lock that is never
/// held across an `.await` (§5).
pub struct HardwareStateMachine {
    state: HardwareState,
    in_flight_abort: Option<AbortToken>,
}

impl HardwareStateMachine {
    pub fn new() -> Self {
        Self {
            state: HardwareState::Idle,
            in_flight_abort: None,
        }
    }

    pub fn state(&self) -> HardwareState {
        self.state
    }

    /// §4.5 transition table, `ensure_active` column.
    pub fn begin_ensure_active(&mut self) -> ActivationPlan {
        match self.state {
            HardwareState::Idle => {
                let token = AbortToken::new();
                self.state = HardwareState::Activating;
                self.in_flight_abort = Some(token.clone());
                ActivationPlan::RunFanOut(token)
            }
            HardwareState::Activating => ActivationPlan::AlreadyInFlight,
            HardwareState::Active => ActivationPlan::NoOp,
            HardwareState::Deactivating => {
                if let Some(prev) = self.in_flight_abort.take() {
                    prev.abort();
                }
                let token = AbortToken::new();
                self.state = HardwareState::Activating;
                self.in_flight_abort = Some(token.clone());
                ActivationPlan::RunFanOut(token)
            }
        }
    }

    /// Apply the result of a fan-out started by `begin_ensure_active`. A
    /// no-op if a later transition has already superseded `token`.
    pub fn complete_activation(&mut self, token: &AbortToken) {
        if self.state == HardwareState::Activating && self.token_is_current(token) {
            self.state = HardwareState::Active;
            self.in_flight_abort = None;
        }
    }

    /// §4.5 transition table, `deactivate` column.
    pub fn begin_deactivate(&mut self) -> DeactivationPlan {
        match self.state {
            HardwareState::Active => {
                let token = AbortToken::new();
                self.state = HardwareState::Deactivating;
                self.in_flight_abort = Some(token.clone());
                DeactivationPlan::RunFanOut(token)
            }
            HardwareState::Deactivating => DeactivationPlan::AlreadyInFlight,
            HardwareState::Idle | HardwareState::Activating => DeactivationPlan::NotActive,
        }
    }

    pub fn complete_deactivation(&mut self, token: &AbortToken) {
        if self.state == HardwareState::Deactivating && self.token_is_current(token) {
            self.state = HardwareState::Idle;
            self.in_flight_abort = None;
        }
    }

    /// `abort()` (§5): idempotent, forces `Idle` and cancels any in-flight
    /// transition's token.
    pub fn force_idle(&mut self) {
        if let Some(token) = self.in_flight_abort.take() {
            token.abort();
        }
        self.state = HardwareState::Idle;
    }

    fn token_is_current(&self, token: &AbortToken) -> bool {
        self.in_flight_abort
            .as_ref()
            .map(|current| current.same_as(token))
            .unwrap_or(false)
    }
}

impl Default for HardwareStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives [`HardwareStateMachine`] transitions against a [`SpeakerFleet`].
pub struct HardwareController {
    machine: Mutex<HardwareStateMachine>,
    fleet: Arc<dyn SpeakerFleet>,
    speakers: Vec<String>,
    active_zone: String,
    idle_zone: String,
}

impl HardwareController {
    pub fn new(
        fleet: Arc<dyn SpeakerFleet>,
        speakers: Vec<String>,
        active_zone: String,
        idle_zone: String,
    ) -> Self {
        Self {
            machine: Mutex::new(HardwareStateMachine::new()),
            fleet,
            speakers,
            active_zone,
            idle_zone,
        }
    }

    pub fn state(&self) -> HardwareState {
        self.machine.lock().state()
    }

    /// §4.5 `ensure_active`. Concurrent callers during `Activating` observe
    /// the same in-flight transition rather than starting a second one.
    pub async fn ensure_active(&self) -> HardwareState {
        let plan = self.machine.lock().begin_ensure_active();
        match plan {
            ActivationPlan::NoOp | ActivationPlan::AlreadyInFlight => self.state(),
            ActivationPlan::RunFanOut(token) => {
                let results = self
                    .fleet
                    .set_zone(&self.speakers, &self.active_zone, &token)
                    .await;
                log_fanout_failures("activate", &results);

                if token.is_aborted() {
                    debug!("hardware activation aborted mid-flight; a newer transition owns state");
                } else {
                    self.machine.lock().complete_activation(&token);
                }
                self.state()
            }
        }
    }

    /// §4.5 `deactivate`.
    pub async fn deactivate(&self) -> HardwareState {
        let plan = self.machine.lock().begin_deactivate();
        match plan {
            DeactivationPlan::AlreadyInFlight | DeactivationPlan::NotActive => self.state(),
            DeactivationPlan::RunFanOut(token) => {
                let results = self
                    .fleet
                    .set_zone(&self.speakers, &self.idle_zone, &token)
                    .await;
                log_fanout_failures("deactivate", &results);

                if token.is_aborted() {
                    debug!("hardware deactivation aborted mid-flight; a newer transition owns state");
                } else {
                    self.machine.lock().complete_deactivation(&token);
                }
                self.state()
            }
        }
    }

    /// `abort()` (§5): synchronous, idempotent.
    pub fn abort(&self) {
        self.machine.lock().force_idle();
    }
}

fn log_fanout_failures(operation: &str, results: &[SpeakerResult]) {
    for result in results {
        if !result.ok {
            warn!(
                "speaker {} failed during {}: {}",
                result.speaker_id,
                operation,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

#[cfg(test)]
#[path = "hardware_test.rs"]
mod tests;
