//! C3 — batch recorder.
//!
//! Drives a platform encoder in "continuous" mode on its own schedule
//! (word-boundary / max-duration flush, §4.3) rather than fixed time
//! slicing. The recorder never touches the encoder directly — it tells the
//! coordinator *when* to request a flush via [`BatchRecorder::on_tick`], and
//! is fed the resulting fragment via [`BatchRecorder::on_fragment`].

use uuid::Uuid;

/// Sealed unit of encoded audio (§3 Batch).
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub id: Uuid,
    pub session_id: Uuid,
    pub sealed_at: u64,
    pub duration_ms: u64,
    pub raw_chunks: Vec<Vec<u8>>,
}

impl Batch {
    /// Total encoded bytes across every fragment, in order.
    pub fn concatenated(&self) -> Vec<u8> {
        self.raw_chunks.concat()
    }
}

/// Tunables for the sealing policy (§4.3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchRecorderConfig {
    pub min_batch_ms: u64,
    pub target_batch_ms: u64,
    pub max_batch_ms: u64,
}

/// Why the recorder is asking the coordinator to request an encoder flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// Target elapsed and the level detector currently reports silence.
    WordBoundary,
    /// Max elapsed; force flush regardless of speech state.
    Max,
    /// Silence-timeout closed the session; waiting for the residual fragment.
    StopResidual,
}

/// Outcome of delivering a fragment to the recorder.
#[derive(Debug, Clone, PartialEq)]
pub enum FragmentOutcome {
    /// Fragment appended; no seal point reached yet.
    Pending,
    /// Batch sealed; recording continues with a fresh, empty batch.
    Sealed(Batch),
    /// Batch sealed and the session should close (this was the residual
    /// fragment after a stop request).
    SealedAndClosed(Batch),
    /// A seal point was reached but no chunks had arrived; the empty seal is
    /// discarded (§4.3). `session_closed` is set when this was the residual
    /// flush of a stop request.
    EmptySeal { session_closed: bool },
}

enum RecorderState {
    Idle,
    Batching {
        session_id: Uuid,
        batch_start_ms: u64,
        chunks: Vec<Vec<u8>>,
        flush_requested: bool,
        stopping: bool,
    },
}

/// Continuous-mode batch recorder (§4.3).
pub struct BatchRecorder {
    config: BatchRecorderConfig,
    state: RecorderState,
}

impl BatchRecorder {
    pub fn new(config: BatchRecorderConfig) -> Self {
        Self {
            config,
            state: RecorderState::Idle,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, RecorderState::Batching { .. })
    }

    pub fn current_session_id(&self) -> Option<Uuid> {
        match &self.state {
            RecorderState::Batching { session_id, .. } => Some(*session_id),
            RecorderState::Idle => None,
        }
    }

    /// Begin batching for a freshly minted session (§4.3 "On start").
    pub fn start_session(&mut self, session_id: Uuid, now_ms: u64) {
        self.state = RecorderState::Batching {
            session_id,
            batch_start_ms: now_ms,
            chunks: Vec::new(),
            flush_requested: false,
            stopping: false,
        };
    }

    /// Called once per audio tick while batching; returns a trigger when the
    /// coordinator should call `AudioCapture::request_flush()`.
    pub fn on_tick(&mut self, now_ms: u64, silence_sustained: bool) -> Option<FlushTrigger> {
        let RecorderState::Batching {
            batch_start_ms,
            flush_requested,
            stopping,
            ..
        } = &mut self.state
        else {
            return None;
        };
        if *stopping || *flush_requested {
            return None;
        }

        let elapsed = now_ms.saturating_sub(*batch_start_ms);
        if elapsed >= self.config.max_batch_ms {
            *flush_requested = true;
            return Some(FlushTrigger::Max);
        }
        if elapsed >= self.config.target_batch_ms && silence_sustained {
            *flush_requested = true;
            return Some(FlushTrigger::WordBoundary);
        }
        None
    }

    /// Signal a silence-timeout close (§4.3 "Stopping batching"): request the
    /// recorder's residual fragment and close the session once it arrives.
    pub fn stop_session(&mut self) -> Option<FlushTrigger> {
        let RecorderState::Batching {
            flush_requested,
            stopping,
            ..
        } = &mut self.state
        else {
            return None;
        };
        if *stopping {
            return None;
        }
        *stopping = true;
        *flush_requested = true;
        Some(FlushTrigger::StopResidual)
    }

    /// Append an encoder fragment, sealing the current batch if a flush was
    /// in flight (§4.3).
    pub fn on_fragment(&mut self, bytes: Vec<u8>, now_ms: u64) -> FragmentOutcome {
        let RecorderState::Batching {
            session_id,
            batch_start_ms,
            chunks,
            flush_requested,
            stopping,
        } = &mut self.state
        else {
            return FragmentOutcome::Pending;
        };

        if !bytes.is_empty() {
            chunks.push(bytes);
        }
        if !*flush_requested {
            return FragmentOutcome::Pending;
        }

        let session_closed = *stopping;
        if chunks.is_empty() {
            if session_closed {
                self.state = RecorderState::Idle;
            } else {
                *batch_start_ms = now_ms;
                *flush_requested = false;
            }
            return FragmentOutcome::EmptySeal { session_closed };
        }

        let batch = Batch {
            id: Uuid::new_v4(),
            session_id: *session_id,
            sealed_at: now_ms,
            duration_ms: now_ms.saturating_sub(*batch_start_ms),
            raw_chunks: std::mem::take(chunks),
        };

        if session_closed {
            self.state = RecorderState::Idle;
            FragmentOutcome::SealedAndClosed(batch)
        } else {
            *batch_start_ms = now_ms;
            *flush_requested = false;
            FragmentOutcome::Sealed(batch)
        }
    }

    /// Discard the current in-flight batch without sealing it (encoder
    /// fault, §7) and begin a fresh one if still batching.
    pub fn discard_current_batch(&mut self, now_ms: u64) {
        if let RecorderState::Batching {
            chunks,
            batch_start_ms,
            flush_requested,
            ..
        } = &mut self.state
        {
            chunks.clear();
            *batch_start_ms = now_ms;
            *flush_requested = false;
        }
    }

    /// Abort batching unconditionally (coordinator `abort()`, §5). No batch
    /// is sealed; the session is not closed by this call.
    pub fn abort(&mut self) {
        self.state = RecorderState::Idle;
    }
}

#[cfg(test)]
#[path = "batch_test.rs"]
mod tests;
