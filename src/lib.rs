//! Call coordinator: the concurrent producer/consumer engine at the center
//! of a live-audio emergency-paging pipeline (see `DESIGN.md` for the
//! grounding ledger).
//!
//! The pipeline: audio-level detection, a batching recorder, a hardware
//! state machine for a remote speaker fleet, a playback worker, and a save
//! queue, bound together by the coordinator in `coordinator`. The capture
//! backend, speaker fleet, blob store, and metadata store are each a trait
//! a host process implements; this crate never talks to a network or a
//! filesystem itself.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod batch;
pub mod capture;
pub mod clock;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod hardware;
pub mod idle;
pub mod level;
pub mod playback;
pub mod ring_buffer;
pub mod save;
pub mod session;

pub use batch::{Batch, BatchRecorder, BatchRecorderConfig};
pub use capture::{AudioCapture, CaptureError, CaptureEvent};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use coordinator::{CallCoordinator, CoordinatorAction, CoordinatorState, CoordinatorStatus};
pub use hardware::{AbortToken, HardwareController, HardwareState, SpeakerFleet, SpeakerResult};
pub use ring_buffer::RingBuffer;
pub use save::{
    BlobStore, BlobStoreError, MetadataStore, MetadataStoreError, SaveItem, SavedSessionMetadata,
    SaveWorker,
};
pub use session::Session;
