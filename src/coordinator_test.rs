use super::*;
use crate::capture::{CaptureError, CaptureEvent};
use crate::clock::ManualClock;
use crate::hardware::{AbortToken, HardwareController, SpeakerFleet, SpeakerResult};
use crate::save::{BlobStore, BlobStoreError, MetadataStore, MetadataStoreError, SavedSessionMetadata};
use parking_lot::Mutex as PlMutex;
use std::sync::mpsc;

/// Runs a future to completion from a plain (non-`#[tokio::test]`) test
/// function. Only ever called outside an existing runtime — never from an
/// `async fn` test, where nesting a runtime this way would panic.
fn tokio_block_on<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(fut)
}

struct NoopFleet;

#[async_trait::async_trait]
impl SpeakerFleet for NoopFleet {
    async fn set_zone(
        &self,
        speakers: &[String],
        _zone_address: &str,
        _abort: &AbortToken,
    ) -> Vec<SpeakerResult> {
        speakers
            .iter()
            .map(|id| SpeakerResult {
                speaker_id: id.clone(),
                ok: true,
                error: None,
            })
            .collect()
    }
}

/// A `SpeakerFleet` whose fan-out blocks on a `Notify` until released,
/// letting a test suspend a transition mid-flight the way
/// `hardware_test.rs`'s `FakeFleet::gated` does for the controller alone.
struct GatedFleet {
    gate: tokio::sync::Notify,
}

impl GatedFleet {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: tokio::sync::Notify::new(),
        })
    }
}

#[async_trait::async_trait]
impl SpeakerFleet for GatedFleet {
    async fn set_zone(
        &self,
        speakers: &[String],
        _zone_address: &str,
        abort: &AbortToken,
    ) -> Vec<SpeakerResult> {
        self.gate.notified().await;
        speakers
            .iter()
            .map(|id| SpeakerResult {
                speaker_id: id.clone(),
                ok: !abort.is_aborted(),
                error: None,
            })
            .collect()
    }
}

struct FakeCapture {
    flush_requests: PlMutex<u32>,
}

impl FakeCapture {
    fn new() -> Self {
        Self {
            flush_requests: PlMutex::new(0),
        }
    }

    fn flush_count(&self) -> u32 {
        *self.flush_requests.lock()
    }
}

impl AudioCapture for FakeCapture {
    fn start(&self, _sink: mpsc::Sender<CaptureEvent>) -> Result<u32, CaptureError> {
        Ok(16_000)
    }

    fn stop(&self) {}

    fn request_flush(&self) {
        *self.flush_requests.lock() += 1;
    }

    fn init_segment(&self) -> Vec<u8> {
        vec![0xEE]
    }
}

struct RecordingBlobStore {
    uploaded: PlMutex<Vec<Uuid>>,
}

impl RecordingBlobStore {
    fn new() -> Self {
        Self {
            uploaded: PlMutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl BlobStore for RecordingBlobStore {
    async fn upload(
        &self,
        _blob: Vec<u8>,
        _filename: String,
        session_id: Uuid,
    ) -> Result<(), BlobStoreError> {
        self.uploaded.lock().push(session_id);
        Ok(())
    }
}

struct NoopMetadataStore;

#[async_trait::async_trait]
impl MetadataStore for NoopMetadataStore {
    async fn record_session(
        &self,
        _metadata: &SavedSessionMetadata,
    ) -> Result<(), MetadataStoreError> {
        Ok(())
    }
}

fn loud_frame() -> Vec<f32> {
    vec![0.5; 160]
}

fn silent_frame() -> Vec<f32> {
    vec![0.0; 160]
}

/// `sustain_duration_ms: 0` throughout so every loud frame reports
/// `AudioDetected` on the same tick (§4.2) and tests can reason about exact
/// millisecond boundaries instead of a debounce window.
fn test_config() -> Config {
    Config {
        audio_threshold: 5,
        sustain_duration_ms: 0,
        min_batch_ms: 4500,
        target_batch_ms: 5000,
        max_batch_ms: 6500,
        disable_delay_ms: 8000,
        hardware_idle_delay_ms: 12_000,
        playback_delay_ms: 4000,
        max_audio_age_ms: 60_000,
        ..Config::default()
    }
}

fn test_coordinator() -> (CallCoordinator, Arc<FakeCapture>, Arc<RecordingBlobStore>) {
    test_coordinator_with_fleet(Arc::new(NoopFleet))
}

fn test_coordinator_with_fleet(
    fleet: Arc<dyn SpeakerFleet>,
) -> (CallCoordinator, Arc<FakeCapture>, Arc<RecordingBlobStore>) {
    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
    let capture = Arc::new(FakeCapture::new());
    let hardware = Arc::new(HardwareController::new(
        fleet,
        vec!["zone-a-1".into()],
        "zone-active".into(),
        "zone-idle".into(),
    ));
    let blob_store = Arc::new(RecordingBlobStore::new());
    let coordinator = CallCoordinator::new(
        test_config(),
        clock,
        capture.clone(),
        hardware,
        blob_store.clone(),
        Arc::new(NoopMetadataStore),
    );
    (coordinator, capture, blob_store)
}

fn begin(coordinator: &mut CallCoordinator) {
    let (tx, _rx) = mpsc::channel();
    coordinator.begin_monitoring(tx).unwrap();
}

/// First sustained audio mints a session, requests hardware activation, and
/// enters `Recording` (§4.8); the ring buffer and level detector are fed
/// from the very same call, never sequenced one after the other.
#[test]
fn first_audio_frame_opens_a_session_and_requests_activation() {
    let (mut coordinator, _capture, _blobs) = test_coordinator();
    begin(&mut coordinator);

    let action = coordinator.on_pcm_frame(&loud_frame(), 0);
    assert_eq!(action, Some(CoordinatorAction::EnsureHardwareActive));

    let status = coordinator.status();
    assert_eq!(status.state, CoordinatorState::Recording);
    assert!(status.active_session_id.is_some());
    assert_eq!(coordinator.ring_buffer().lock().available(), 160);
}

/// `Recording -> PlaybackArmed` fires on the first frame captured *after*
/// session entry, not the one that triggered entry itself (§4.8).
#[test]
fn second_frame_arms_playback() {
    let (mut coordinator, _capture, _blobs) = test_coordinator();
    begin(&mut coordinator);

    coordinator.on_pcm_frame(&loud_frame(), 0);
    assert_eq!(coordinator.status().state, CoordinatorState::Recording);

    coordinator.on_pcm_frame(&loud_frame(), 10);
    assert_eq!(coordinator.status().state, CoordinatorState::PlaybackArmed);
}

/// Continuous loud audio forces a flush at `MAX_BATCH_MS` regardless of
/// speech state (§4.3); the coordinator must ask the capture backend to
/// flush exactly once per max-duration boundary.
#[test]
fn continuous_speech_forces_a_max_duration_flush() {
    let (mut coordinator, capture, _blobs) = test_coordinator();
    begin(&mut coordinator);

    coordinator.on_pcm_frame(&loud_frame(), 0);
    assert_eq!(capture.flush_count(), 0);

    coordinator.on_pcm_frame(&loud_frame(), 6600);
    assert_eq!(capture.flush_count(), 1, "MAX_BATCH_MS boundary must request exactly one flush");

    let action = coordinator.on_encoded_fragment(vec![1, 2, 3], 6600);
    assert_eq!(action, None, "mid-session seal never closes the session");
    assert!(coordinator.recorder.is_active());
}

/// A malformed/empty flush (§7 Encoder fault) discards the in-flight batch
/// without closing the session; recording resumes into a fresh batch.
#[test]
fn encoder_fault_discards_current_batch_and_continues_recording() {
    let (mut coordinator, _capture, _blobs) = test_coordinator();
    begin(&mut coordinator);

    coordinator.on_pcm_frame(&loud_frame(), 0);
    coordinator.on_encoded_fragment(vec![1], 1000);
    coordinator.on_encoder_fault("malformed fragment", 2000);
    assert!(coordinator.recorder.is_active());

    coordinator.on_pcm_frame(&loud_frame(), 8500);
    match coordinator.on_encoded_fragment(vec![2], 8500) {
        Some(_) => panic!("a mid-session seal must not close the session"),
        None => {
            let batches = &coordinator.sessions.current().unwrap().batches;
            assert_eq!(batches.len(), 1, "the pre-fault fragment must not survive");
            assert_eq!(batches[0].concatenated(), vec![2]);
        }
    }
}

/// Sustained silence arms the disable-delay deadline on its first tick
/// (§4.4); when it expires the coordinator stops the recorder and enters
/// `Draining` (§4.8), and the eventual residual fragment closes the session
/// and produces an `EnqueueForSave` action with the init segment folded in.
#[test]
fn silence_timeout_drains_and_enqueues_the_session() {
    let (mut coordinator, capture, _blobs) = test_coordinator();
    begin(&mut coordinator);

    coordinator.on_pcm_frame(&loud_frame(), 0);
    coordinator.on_pcm_frame(&loud_frame(), 10);
    // First silent tick arms the silence deadline at 10 + 8000.
    coordinator.on_pcm_frame(&silent_frame(), 10);
    assert_eq!(coordinator.status().state, CoordinatorState::PlaybackArmed);

    assert!(coordinator.on_timer_tick(8_009).is_empty());
    assert_eq!(coordinator.status().state, CoordinatorState::PlaybackArmed);

    assert!(coordinator.on_timer_tick(8_010).is_empty());
    assert_eq!(coordinator.status().state, CoordinatorState::Draining);
    assert_eq!(capture.flush_count(), 1, "stop_session must request the residual flush");

    let action = coordinator.on_encoded_fragment(vec![9, 9], 8_010);
    match action {
        Some(CoordinatorAction::EnqueueForSave(item)) => {
            assert_eq!(item.batch_count, 1);
            assert_eq!(item.total_duration_ms, 8_010);
            coordinator.enqueue_for_save(item);
        }
        other => panic!("expected EnqueueForSave, got {other:?}"),
    }
    assert_eq!(coordinator.status().state, CoordinatorState::Idle);
    assert_eq!(coordinator.status().save_queue_depth, 1);
}

/// A session with no batches at all (encoder produced nothing before
/// silence closed it) is dropped, not enqueued (§3: a closed session is
/// enqueued or dropped, never both; an empty batch list means nothing to
/// persist).
#[test]
fn session_with_no_batches_is_dropped_not_enqueued() {
    let (mut coordinator, _capture, _blobs) = test_coordinator();
    begin(&mut coordinator);

    coordinator.on_pcm_frame(&loud_frame(), 0);
    coordinator.on_pcm_frame(&silent_frame(), 10);
    coordinator.on_timer_tick(8_011);
    assert_eq!(coordinator.status().state, CoordinatorState::Draining);

    let action = coordinator.on_encoded_fragment(vec![], 8_011);
    assert_eq!(action, None);
    assert_eq!(coordinator.status().state, CoordinatorState::Idle);
    assert_eq!(coordinator.status().save_queue_depth, 0);
}

/// The hardware-idle deadline arms once the recorder stops and, once
/// expired with the idle predicate satisfied, yields a `DeactivateHardware`
/// action (§4.4).
#[test]
fn hardware_idle_deadline_requests_deactivation_once_predicate_holds() {
    let (mut coordinator, _capture, _blobs) = test_coordinator();
    begin(&mut coordinator);

    coordinator.on_pcm_frame(&loud_frame(), 0);
    coordinator.on_pcm_frame(&silent_frame(), 10);
    coordinator.on_timer_tick(8_011);
    coordinator.on_encoded_fragment(vec![1], 8_011);
    assert_eq!(coordinator.status().state, CoordinatorState::Idle);

    assert!(coordinator.on_timer_tick(8_011 + 11_999).is_empty());
    let actions = coordinator.on_timer_tick(8_011 + 12_000);
    assert_eq!(actions, vec![CoordinatorAction::DeactivateHardware]);
}

/// Audio TTL (§4.6 step 2, §8): once the oldest buffered sample exceeds
/// `max_audio_age_ms`, the next playback tick returns silence and the
/// ring buffer's watermark is reset, even though hardware must read
/// `Active` for step 2 to be reached at all.
#[test]
fn ttl_expiry_surfaces_as_silence_on_the_playback_path() {
    let (mut coordinator, _capture, _blobs) = test_coordinator();
    coordinator.ring_buffer().lock().push(&[0.3; 10], 0);

    // Force the hardware field to Active directly via the real controller
    // so step 1 of the playback callback doesn't short-circuit first.
    let hardware = coordinator.hardware().clone();
    tokio_block_on(hardware.ensure_active());

    let tick = coordinator.playback_tick(70_000, None);
    assert!(tick.iter().all(|s| *s == 0.0));
    assert_eq!(coordinator.ring_buffer().lock().first_sample_epoch_ms(), None);
}

/// The `PlaybackArmed -> Playing` edge stamps the open session's
/// `playback_started_at` (§3), and a subsequent TTL expiry stamps
/// `playback_ended_at` on that same session rather than leaving it `None`.
#[test]
fn playback_tick_stamps_session_playback_started_and_ended() {
    let (mut coordinator, _capture, _blobs) = test_coordinator();
    begin(&mut coordinator);
    coordinator.on_pcm_frame(&loud_frame(), 0);
    coordinator.on_pcm_frame(&loud_frame(), 10);
    assert_eq!(coordinator.status().state, CoordinatorState::PlaybackArmed);

    let hardware = coordinator.hardware().clone();
    tokio_block_on(hardware.ensure_active());

    // playback_delay_ms=4000 and at least one non-zero sample observed.
    coordinator.ring_buffer().lock().push(&[0.3; 64_000], 0);
    coordinator.playback_tick(10, None);
    assert_eq!(coordinator.status().state, CoordinatorState::Playing);
    assert_eq!(
        coordinator.sessions.current().unwrap().playback_started_at,
        Some(10)
    );

    let tick = coordinator.playback_tick(70_010, None);
    assert!(tick.iter().all(|s| *s == 0.0), "TTL must have expired");
    assert_eq!(
        coordinator.sessions.current().unwrap().playback_ended_at,
        Some(70_010)
    );
}

/// `abort()` is idempotent and returns every owned component to its initial
/// state in one call (§5, §8).
#[test]
fn abort_is_idempotent_and_resets_to_idle() {
    let (mut coordinator, _capture, _blobs) = test_coordinator();
    begin(&mut coordinator);
    coordinator.on_pcm_frame(&loud_frame(), 0);
    assert_eq!(coordinator.status().state, CoordinatorState::Recording);

    coordinator.abort();
    coordinator.abort();

    let status = coordinator.status();
    assert_eq!(status.state, CoordinatorState::Idle);
    assert_eq!(status.active_session_id, None);
    assert_eq!(status.hardware_state, HardwareState::Idle);
    assert_eq!(status.save_queue_depth, 0);
    assert_eq!(coordinator.ring_buffer().lock().available(), 0);
}

/// Deactivation race (§8 scenario 6), end-to-end through the coordinator:
/// a fresh `OnAudioDetected` arriving while hardware is mid-`Deactivating`
/// must both (a) surface an `EnsureHardwareActive` action from the
/// coordinator's own state machine and (b) have that action's eventual
/// `ensure_hardware_active().await` land on `Active`, cancelling the
/// in-flight deactivation exactly as `HardwareController` guarantees in
/// isolation (see `hardware_test.rs`'s
/// `ensure_active_while_deactivating_aborts_the_deactivation`).
#[tokio::test]
async fn new_audio_during_deactivation_reactivates_hardware() {
    let fleet = GatedFleet::new();
    let (mut coordinator, _capture, _blobs) = test_coordinator_with_fleet(fleet.clone());

    // Bring hardware Active directly through the controller, independent of
    // the coordinator's own (still-Idle) session state.
    let hw = coordinator.hardware().clone();
    let activating = {
        let hw = hw.clone();
        tokio::spawn(async move { hw.ensure_active().await })
    };
    tokio::task::yield_now().await;
    fleet.gate.notify_one();
    assert_eq!(activating.await.unwrap(), HardwareState::Active);

    let deactivating = {
        let hw = hw.clone();
        tokio::spawn(async move { hw.deactivate().await })
    };
    tokio::task::yield_now().await;
    assert_eq!(coordinator.status().hardware_state, HardwareState::Deactivating);

    // The coordinator's own state is still Idle, so a fresh loud frame opens
    // a session and requests activation while deactivation is mid-flight.
    let action = coordinator.on_pcm_frame(&loud_frame(), 0);
    assert_eq!(action, Some(CoordinatorAction::EnsureHardwareActive));
    let reactivating = {
        let hw = hw.clone();
        tokio::spawn(async move { hw.ensure_active().await })
    };
    tokio::task::yield_now().await;

    // Release both gated fan-outs: deactivate's (now superseded) call, then
    // the fresh activation's.
    fleet.gate.notify_one();
    fleet.gate.notify_one();

    let _ = deactivating.await;
    let reactivated = reactivating.await.unwrap();

    assert_eq!(reactivated, HardwareState::Active);
    assert_eq!(coordinator.status().hardware_state, HardwareState::Active);
}
