//! C4 — session registry.
//!
//! Owns the metadata of the single in-flight "call": its id, first-detection
//! timestamp, ordered batch list, and playback start/end markers. Only one
//! session is open at a time (§4.8 — the coordinator state machine never
//! enters `Recording` twice without an intervening close).

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::batch::Batch;

/// Why a session was closed (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedReason {
    SilenceTimeout,
    Aborted,
    MonitoringStopped,
}

/// Metadata for one "call" (§3 Session).
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: Uuid,
    pub first_detected_at: DateTime<Utc>,
    pub timezone_id: String,
    pub first_batch_id: Option<Uuid>,
    pub batches: Vec<Batch>,
    pub playback_started_at: Option<u64>,
    pub playback_ended_at: Option<u64>,
    pub closed_reason: Option<ClosedReason>,
}

impl Session {
    fn new(id: Uuid, first_detected_at: DateTime<Utc>, timezone_id: String) -> Self {
        Self {
            id,
            first_detected_at,
            timezone_id,
            first_batch_id: None,
            batches: Vec::new(),
            playback_started_at: None,
            playback_ended_at: None,
            closed_reason: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed_reason.is_some()
    }
}

/// Error returned by registry operations attempted against the wrong state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionRegistryError {
    #[error("a session is already open")]
    AlreadyOpen,
    #[error("no session is currently open")]
    NoneOpen,
}

/// Owns the currently open session, if any (§3 Ownership).
pub struct SessionRegistry {
    current: Option<Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self { current: None }
    }

    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    /// Open a new session, minting its id at `Recording` entry (§4.8).
    pub fn open(
        &mut self,
        id: Uuid,
        first_detected_at: DateTime<Utc>,
        timezone_id: String,
    ) -> Result<(), SessionRegistryError> {
        if self.current.is_some() {
            return Err(SessionRegistryError::AlreadyOpen);
        }
        self.current = Some(Session::new(id, first_detected_at, timezone_id));
        Ok(())
    }

    /// Append a sealed batch, preserving seal order (§8 invariant).
    pub fn append_batch(&mut self, batch: Batch) -> Result<(), SessionRegistryError> {
        let session = self
            .current
            .as_mut()
            .ok_or(SessionRegistryError::NoneOpen)?;
        if session.first_batch_id.is_none() {
            session.first_batch_id = Some(batch.id);
        }
        session.batches.push(batch);
        Ok(())
    }

    pub fn mark_playback_started(&mut self, now_ms: u64) -> Result<(), SessionRegistryError> {
        let session = self
            .current
            .as_mut()
            .ok_or(SessionRegistryError::NoneOpen)?;
        if session.playback_started_at.is_none() {
            session.playback_started_at = Some(now_ms);
        }
        Ok(())
    }

    pub fn mark_playback_ended(&mut self, now_ms: u64) -> Result<(), SessionRegistryError> {
        let session = self
            .current
            .as_mut()
            .ok_or(SessionRegistryError::NoneOpen)?;
        session.playback_ended_at = Some(now_ms);
        Ok(())
    }

    /// Close the open session exactly once and hand it off for the caller to
    /// either enqueue or drop (§3: "never both").
    pub fn close(&mut self, reason: ClosedReason) -> Result<Session, SessionRegistryError> {
        let mut session = self.current.take().ok_or(SessionRegistryError::NoneOpen)?;
        session.closed_reason = Some(reason);
        Ok(session)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
