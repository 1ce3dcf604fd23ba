//! Microphone capture pipeline.
//!
//! Runs on a dedicated OS thread (not a tokio task) so a slow network side
//! never stalls the device: every frame is quantized and handed to the
//! session's send path, which must not block.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::audio::codec::{WireChunk, encode_outbound};
use crate::audio::device::Microphone;
use crate::error::EngineError;
use crate::state::EngineState;

/// Where captured chunks go. Implementations must return immediately.
pub trait OutboundAudio: Send + Sync {
    fn send_audio(&self, chunk: WireChunk) -> Result<(), EngineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    Idle,
    Acquiring,
    Active,
    Stopping,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Capture sample rate (16 kHz for the session).
    pub sample_rate: u32,
    /// Samples per frame delivered by the device.
    pub frame_size: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_size: 256,
        }
    }
}

pub struct CapturePipeline {
    microphone: Arc<dyn Microphone>,
    outbound: Arc<dyn OutboundAudio>,
    state: EngineState,
    settings: CaptureSettings,
    phase: Arc<Mutex<CapturePhase>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

fn lock_phase(phase: &Mutex<CapturePhase>) -> MutexGuard<'_, CapturePhase> {
    phase.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CapturePipeline {
    pub fn new(
        microphone: Arc<dyn Microphone>,
        outbound: Arc<dyn OutboundAudio>,
        state: EngineState,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            microphone,
            outbound,
            state,
            settings,
            phase: Arc::new(Mutex::new(CapturePhase::Idle)),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn phase(&self) -> CapturePhase {
        *lock_phase(&self.phase)
    }

    /// Acquire the microphone and start streaming frames, waiting until the
    /// device is open.
    ///
    /// Failures are reported through the status/error text as well as the
    /// return value; the pipeline is back in `Idle` afterwards.
    pub fn start(&mut self) -> Result<(), EngineError> {
        let Some(ready) = self.spawn_worker()? else {
            return Ok(());
        };
        match ready.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.reap();
                Err(e)
            }
            Err(_) => {
                self.reap();
                let e = EngineError::DeviceUnavailable("capture thread exited during start".into());
                let mut phase = lock_phase(&self.phase);
                if *phase == CapturePhase::Acquiring {
                    fail_start(&self.state, &self.running, &mut phase, &e);
                }
                Err(e)
            }
        }
    }

    /// Like [`start`](Self::start) but returns as soon as the capture thread
    /// is running. The open result lands in the status/error text.
    pub fn start_in_background(&mut self) -> Result<(), EngineError> {
        self.spawn_worker().map(|_| ())
    }

    /// `None` when the pipeline was not idle.
    fn spawn_worker(
        &mut self,
    ) -> Result<Option<std_mpsc::Receiver<Result<(), EngineError>>>, EngineError> {
        {
            let mut phase = lock_phase(&self.phase);
            if *phase != CapturePhase::Idle {
                return Ok(None);
            }
            *phase = CapturePhase::Acquiring;
        }
        // A thread that stopped itself after a device error is still joinable.
        self.reap();

        self.state.set_status("Requesting microphone access...");
        self.running.store(true, Ordering::SeqCst);

        let (ready_tx, ready_rx) = std_mpsc::channel();
        let worker = CaptureWorker {
            microphone: self.microphone.clone(),
            outbound: self.outbound.clone(),
            state: self.state.clone(),
            settings: self.settings.clone(),
            phase: self.phase.clone(),
            running: self.running.clone(),
        };

        match thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || worker.run(ready_tx))
        {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(Some(ready_rx))
            }
            Err(e) => {
                let e = EngineError::DeviceUnavailable(format!("failed to spawn capture thread: {}", e));
                fail_start(&self.state, &self.running, &mut lock_phase(&self.phase), &e);
                Err(e)
            }
        }
    }

    /// Stop streaming and release the device. Calling it while idle is a no-op.
    pub fn stop(&mut self) {
        {
            let mut phase = lock_phase(&self.phase);
            if *phase == CapturePhase::Idle {
                drop(phase);
                self.reap();
                self.state.set_recording(false);
                return;
            }
            *phase = CapturePhase::Stopping;
        }

        self.state.set_status("Stopping recording...");
        self.running.store(false, Ordering::SeqCst);
        // Waits for a pending device open too.
        self.reap();
        self.state.set_recording(false);

        *lock_phase(&self.phase) = CapturePhase::Idle;
        self.state.set_status("Recording stopped. Click Start to begin again.");
    }

    fn reap(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Capture thread panicked");
            }
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.reap();
    }
}

/// Back to `Idle` after a failed start. Caller holds the phase lock.
fn fail_start(state: &EngineState, running: &AtomicBool, phase: &mut CapturePhase, e: &EngineError) {
    running.store(false, Ordering::SeqCst);
    *phase = CapturePhase::Idle;
    state.set_recording(false);
    state.set_error(e.to_string());
    state.set_status(format!("Error: {}", e));
}

/// Everything the capture thread needs, moved onto it at start.
struct CaptureWorker {
    microphone: Arc<dyn Microphone>,
    outbound: Arc<dyn OutboundAudio>,
    state: EngineState,
    settings: CaptureSettings,
    phase: Arc<Mutex<CapturePhase>>,
    running: Arc<AtomicBool>,
}

impl CaptureWorker {
    fn run(self, ready: std_mpsc::Sender<Result<(), EngineError>>) {
        // 1. Acquire the device on this thread
        let mut source = match self
            .microphone
            .open(self.settings.sample_rate, self.settings.frame_size)
        {
            Ok(source) => source,
            Err(e) => {
                log::error!("Failed to open microphone: {}", e);
                let mut phase = lock_phase(&self.phase);
                // stop() during the open owns the shutdown.
                if *phase == CapturePhase::Acquiring {
                    fail_start(&self.state, &self.running, &mut phase, &e);
                }
                drop(phase);
                let _ = ready.send(Err(e));
                return;
            }
        };

        // 2. Report success before the first frame so the UI flips immediately
        {
            let mut phase = lock_phase(&self.phase);
            if *phase != CapturePhase::Acquiring {
                log::info!("Capture stopped while the device was opening");
                let _ = ready.send(Ok(()));
                return;
            }
            self.state.set_status("Microphone access granted. Starting capture...");
            *phase = CapturePhase::Active;
            self.state.clear_error();
            self.state.set_recording(true);
            self.state.set_status("🔴 Recording... Capturing PCM chunks.");
        }
        // Nobody waits when started in the background.
        let _ = ready.send(Ok(()));

        log::info!(
            "Recording started: rate={}, frame_size={}",
            self.settings.sample_rate,
            self.settings.frame_size,
        );

        let input_tap = self.state.input_tap();
        let mut dropping = false;
        let mut failure = None;

        // 3. Pull frames until stopped
        while self.running.load(Ordering::Relaxed) {
            match source.next_frame() {
                Ok(frame) => {
                    input_tap.observe(&frame);
                    if !self.running.load(Ordering::Relaxed) {
                        break;
                    }
                    match self.outbound.send_audio(encode_outbound(&frame)) {
                        Ok(()) => {
                            if dropping {
                                log::info!("Outbound audio flowing again");
                                dropping = false;
                            }
                        }
                        // Between sessions: nobody to talk to, drop quietly.
                        Err(EngineError::SessionNotOpen) => {
                            log::trace!("Session not open, dropping captured frame");
                        }
                        Err(e) => {
                            if !dropping {
                                log::warn!("Dropping captured audio: {}", e);
                                self.state.set_error(e.to_string());
                                dropping = true;
                            }
                        }
                    }
                }
                Err(e) => {
                    log::warn!("Capture read error: {}, recovering...", e);
                    if let Err(e2) = source.recover() {
                        log::error!("Failed to recover capture device: {}", e2);
                        failure = Some(e2);
                        break;
                    }
                }
            }
        }

        // Release the device before reporting.
        drop(source);
        log::info!("Recording stopped");

        if let Some(e) = failure {
            let mut phase = lock_phase(&self.phase);
            // stop() may already own the shutdown.
            if *phase == CapturePhase::Active {
                self.running.store(false, Ordering::SeqCst);
                self.state.set_recording(false);
                self.state.set_status(format!("Error: {}", e));
                self.state.set_error(e.to_string());
                *phase = CapturePhase::Idle;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::{AudioFrame, decode_audio_data, decode_inbound};
    use crate::audio::device::FrameSource;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    #[derive(Clone, Copy)]
    enum MicBehavior {
        Works,
        Denied,
        /// Read errors start after this many frames and recovery fails.
        BreaksAfter(usize),
        /// Opening takes this many milliseconds, then works.
        SlowToOpen(u64),
    }

    struct FakeMicrophone {
        behavior: MicBehavior,
        opened: AtomicUsize,
    }

    impl FakeMicrophone {
        fn new(behavior: MicBehavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                opened: AtomicUsize::new(0),
            })
        }
    }

    struct FakeSource {
        frame_size: usize,
        produced: usize,
        breaks_after: Option<usize>,
    }

    impl FrameSource for FakeSource {
        fn next_frame(&mut self) -> Result<AudioFrame, EngineError> {
            // Roughly the cadence of 256 samples at 16 kHz
            thread::sleep(Duration::from_millis(2));
            if let Some(limit) = self.breaks_after {
                if self.produced >= limit {
                    return Err(EngineError::DeviceUnavailable("overrun".into()));
                }
            }
            self.produced += 1;
            Ok(vec![0.5; self.frame_size])
        }
    }

    impl Microphone for FakeMicrophone {
        fn open(
            &self,
            _sample_rate: u32,
            frame_size: usize,
        ) -> Result<Box<dyn FrameSource>, EngineError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                MicBehavior::Denied => Err(EngineError::DeviceAccessDenied("not allowed".into())),
                MicBehavior::Works => Ok(Box::new(FakeSource {
                    frame_size,
                    produced: 0,
                    breaks_after: None,
                })),
                MicBehavior::BreaksAfter(n) => Ok(Box::new(FakeSource {
                    frame_size,
                    produced: 0,
                    breaks_after: Some(n),
                })),
                MicBehavior::SlowToOpen(ms) => {
                    thread::sleep(Duration::from_millis(ms));
                    Ok(Box::new(FakeSource {
                        frame_size,
                        produced: 0,
                        breaks_after: None,
                    }))
                }
            }
        }
    }

    struct RecordingSink {
        chunks: Mutex<Vec<WireChunk>>,
        reply: Option<EngineError>,
    }

    impl RecordingSink {
        fn new(reply: Option<EngineError>) -> Arc<Self> {
            Arc::new(Self {
                chunks: Mutex::new(Vec::new()),
                reply,
            })
        }

        fn count(&self) -> usize {
            self.chunks.lock().unwrap().len()
        }
    }

    impl OutboundAudio for RecordingSink {
        fn send_audio(&self, chunk: WireChunk) -> Result<(), EngineError> {
            self.chunks.lock().unwrap().push(chunk);
            match &self.reply {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    fn pipeline(mic: Arc<FakeMicrophone>, sink: Arc<RecordingSink>) -> (CapturePipeline, EngineState) {
        let state = EngineState::new();
        let pipeline = CapturePipeline::new(mic, sink, state.clone(), CaptureSettings::default());
        (pipeline, state)
    }

    #[test]
    fn start_streams_encoded_frames_until_stopped() {
        let sink = RecordingSink::new(None);
        let (mut capture, state) = pipeline(FakeMicrophone::new(MicBehavior::Works), sink.clone());

        capture.start().unwrap();
        assert_eq!(capture.phase(), CapturePhase::Active);
        assert!(state.is_recording());
        assert_eq!(state.snapshot().status, "🔴 Recording... Capturing PCM chunks.");

        assert!(wait_until(|| sink.count() >= 3));
        capture.stop();
        assert_eq!(capture.phase(), CapturePhase::Idle);
        assert!(!state.is_recording());
        assert_eq!(
            state.snapshot().status,
            "Recording stopped. Click Start to begin again."
        );

        let sent = sink.count();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(sink.count(), sent, "frames sent after stop");

        let chunk = sink.chunks.lock().unwrap()[0].clone();
        assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
        let decoded = decode_audio_data(&decode_inbound(&chunk.data).unwrap(), 16000, 1).unwrap();
        assert_eq!(decoded.frames(), 256);
        assert!(decoded.channels[0].iter().all(|s| *s == 0.5));
        assert!((state.input_tap().level() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn stop_is_idempotent() {
        let sink = RecordingSink::new(None);
        let mic = FakeMicrophone::new(MicBehavior::Works);
        let (mut capture, state) = pipeline(mic.clone(), sink);

        capture.stop();
        capture.stop();
        assert!(!state.is_recording());
        assert_eq!(capture.phase(), CapturePhase::Idle);
        assert_eq!(mic.opened.load(Ordering::SeqCst), 0);

        capture.start().unwrap();
        capture.stop();
        capture.stop();
        assert!(!state.is_recording());
        assert!(state.snapshot().error.is_empty());
    }

    #[test]
    fn start_while_active_is_a_no_op() {
        let sink = RecordingSink::new(None);
        let mic = FakeMicrophone::new(MicBehavior::Works);
        let (mut capture, _state) = pipeline(mic.clone(), sink);

        capture.start().unwrap();
        capture.start().unwrap();
        assert_eq!(mic.opened.load(Ordering::SeqCst), 1);
        capture.stop();
    }

    #[test]
    fn denied_access_returns_to_idle_with_error() {
        let sink = RecordingSink::new(None);
        let (mut capture, state) = pipeline(FakeMicrophone::new(MicBehavior::Denied), sink.clone());

        let err = capture.start().unwrap_err();
        assert!(matches!(err, EngineError::DeviceAccessDenied(_)));
        assert_eq!(capture.phase(), CapturePhase::Idle);

        let snap = state.snapshot();
        assert!(!snap.is_recording);
        assert!(snap.status.starts_with("Error:"));
        assert!(!snap.error.is_empty());
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn closed_session_drops_frames_quietly() {
        let sink = RecordingSink::new(Some(EngineError::SessionNotOpen));
        let (mut capture, state) = pipeline(FakeMicrophone::new(MicBehavior::Works), sink.clone());

        capture.start().unwrap();
        assert!(wait_until(|| sink.count() >= 3));
        assert!(state.is_recording());
        assert!(state.snapshot().error.is_empty());
        capture.stop();
    }

    #[test]
    fn send_failures_surface_but_do_not_stop_capture() {
        let sink = RecordingSink::new(Some(EngineError::SendBackpressure));
        let (mut capture, state) = pipeline(FakeMicrophone::new(MicBehavior::Works), sink.clone());

        capture.start().unwrap();
        assert!(wait_until(|| sink.count() >= 5));
        assert_eq!(capture.phase(), CapturePhase::Active);
        assert!(state.is_recording());
        assert_eq!(state.snapshot().error, EngineError::SendBackpressure.to_string());
        capture.stop();
    }

    #[test]
    fn unrecoverable_read_error_stops_capture() {
        let sink = RecordingSink::new(None);
        let mic = FakeMicrophone::new(MicBehavior::BreaksAfter(2));
        let (mut capture, state) = pipeline(mic.clone(), sink.clone());

        capture.start().unwrap();
        assert!(wait_until(|| capture.phase() == CapturePhase::Idle));
        assert!(!state.is_recording());
        assert!(state.snapshot().status.starts_with("Error:"));
        assert_eq!(sink.count(), 2);

        // The user can retry.
        capture.stop();
        capture.start().unwrap();
        assert_eq!(mic.opened.load(Ordering::SeqCst), 2);
        assert!(wait_until(|| capture.phase() == CapturePhase::Idle));
    }

    #[test]
    fn background_start_returns_before_the_device_opens() {
        let sink = RecordingSink::new(None);
        let (mut capture, state) =
            pipeline(FakeMicrophone::new(MicBehavior::SlowToOpen(100)), sink.clone());

        let begun = Instant::now();
        capture.start_in_background().unwrap();
        assert!(begun.elapsed() < Duration::from_millis(100));
        assert_eq!(capture.phase(), CapturePhase::Acquiring);
        assert!(!state.is_recording());

        assert!(wait_until(|| capture.phase() == CapturePhase::Active));
        assert!(state.is_recording());
        assert!(wait_until(|| sink.count() >= 1));
        capture.stop();
        assert!(!state.is_recording());
    }

    #[test]
    fn stop_during_a_pending_open_wins() {
        let sink = RecordingSink::new(None);
        let mic = FakeMicrophone::new(MicBehavior::SlowToOpen(50));
        let (mut capture, state) = pipeline(mic.clone(), sink.clone());

        capture.start_in_background().unwrap();
        capture.stop();

        assert_eq!(capture.phase(), CapturePhase::Idle);
        assert!(!state.is_recording());
        assert_eq!(
            state.snapshot().status,
            "Recording stopped. Click Start to begin again."
        );
        assert_eq!(mic.opened.load(Ordering::SeqCst), 1);
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn background_start_reports_denied_access() {
        let sink = RecordingSink::new(None);
        let (mut capture, state) = pipeline(FakeMicrophone::new(MicBehavior::Denied), sink);

        capture.start_in_background().unwrap();
        assert!(wait_until(|| state.snapshot().status.starts_with("Error:")));
        assert_eq!(capture.phase(), CapturePhase::Idle);
        assert!(!state.is_recording());
        assert!(!state.snapshot().error.is_empty());

        // A retry after the failure starts a fresh attempt.
        capture.start_in_background().unwrap();
        assert!(wait_until(|| capture.phase() == CapturePhase::Idle));
    }
}
