//! Audio capture — external interface (§6).
//!
//! Not implemented by this crate: a production caller supplies a backend
//! that taps a real microphone and a real platform encoder, the way this
//! codebase's own `AudioCaptureBackend` trait lets a concrete `cpal`-backed
//! implementation be swapped for a test double. The core only consumes the
//! two event kinds below; it never talks to a device directly.

use std::sync::mpsc::Sender;

/// One event raised by the capture backend (§6, first bullet).
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// A frame of raw PCM samples at the capture sample rate.
    Pcm {
        samples: Vec<f32>,
        /// Monotonic ms at which this frame was captured.
        captured_at_mono_ms: u64,
    },
    /// A fragment produced by the platform encoder in response to a flush
    /// request, delivered in capture order (never reordered).
    EncodedFragment(Vec<u8>),
    /// A flush request returned no data or a malformed fragment (§7 Encoder
    /// fault). The current batch is discarded; recording continues.
    EncoderFault(String),
}

/// Errors the capture backend can surface at start time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CaptureError {
    #[error("no audio capture device available")]
    DeviceUnavailable,
    #[error("capture stream error: {0}")]
    StreamError(String),
}

/// Audio capture backend contract (§6).
///
/// Implementations push [`CaptureEvent`]s to `sink` from their own thread;
/// the coordinator never blocks waiting on this trait's methods themselves.
pub trait AudioCapture: Send + Sync {
    /// Start capturing; returns the device's actual sample rate.
    fn start(&self, sink: Sender<CaptureEvent>) -> Result<u32, CaptureError>;

    /// Stop capturing. Idempotent.
    fn stop(&self);

    /// Ask the platform encoder to flush its currently pending fragment.
    /// The resulting `CaptureEvent::EncodedFragment` arrives asynchronously
    /// on the sink passed to `start`.
    fn request_flush(&self);

    /// A short silent pre-roll captured once at monitoring start, used to
    /// prefix a session's persisted blob (§3 Init segment, §4.7).
    fn init_segment(&self) -> Vec<u8>;
}

#[cfg(test)]
#[path = "capture_test.rs"]
mod tests;
