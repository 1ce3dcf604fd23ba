//! Output device thread.
//!
//! Uses std::thread (NOT a tokio task) for real-time audio I/O. The thread
//! renders one period at a time from the [`PlaybackScheduler`] and writes it to
//! the speaker, silence included, so the device clock keeps running while the
//! agent is quiet.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::device::{PcmSink, Speaker};
use crate::audio::levels::LevelTap;
use crate::audio::scheduler::PlaybackScheduler;
use crate::error::EngineError;

/// Give up on a period after this many failed recoveries in a row.
const MAX_RECOVERY_RETRIES: u32 = 3;

/// Owns the playback device for the lifetime of the engine.
pub struct PlaybackEngine {
    scheduler: Arc<PlaybackScheduler>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PlaybackEngine {
    /// Open the speaker near `sample_rate` and start rendering.
    ///
    /// The scheduler is built for the rate the device actually negotiated, so
    /// its clock runs in real device frames. Returns once the device is open,
    /// or with the open error.
    pub fn start(
        speaker: Arc<dyn Speaker>,
        sample_rate: u32,
        period_size: usize,
        output_tap: Arc<LevelTap>,
    ) -> Result<Self, EngineError> {
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = std_mpsc::channel();

        let handle = {
            let running = running.clone();
            thread::Builder::new()
                .name("audio-play".into())
                .spawn(move || {
                    let sink = match speaker.open(sample_rate, period_size) {
                        Ok(sink) => sink,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    let device_rate = sink.sample_rate();
                    if device_rate != sample_rate {
                        log::warn!(
                            "Playback device runs at {} Hz instead of {} Hz, scheduling at {} Hz",
                            device_rate,
                            sample_rate,
                            device_rate
                        );
                    }
                    let scheduler = Arc::new(PlaybackScheduler::new(device_rate, output_tap));
                    let _ = ready_tx.send(Ok(scheduler.clone()));
                    play_thread(sink, &scheduler, &running);
                })
                .map_err(|e| {
                    EngineError::DeviceUnavailable(format!("failed to spawn playback thread: {}", e))
                })?
        };

        match ready_rx.recv() {
            Ok(Ok(scheduler)) => Ok(Self {
                scheduler,
                running,
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(EngineError::DeviceUnavailable("playback thread exited during start".into()))
            }
        }
    }

    /// The scheduler feeding this device.
    pub fn scheduler(&self) -> Arc<PlaybackScheduler> {
        self.scheduler.clone()
    }

    /// Signal the thread to stop and wait for it to release the device.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            if h.join().is_err() {
                log::error!("Playback thread panicked");
            }
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn play_thread(mut sink: Box<dyn PcmSink>, scheduler: &PlaybackScheduler, running: &AtomicBool) {
    let period_size = sink.period_size().max(1);
    let mut period = vec![0.0f32; period_size];

    log::info!(
        "Playback started: rate={}, period={}",
        sink.sample_rate(),
        period_size,
    );

    while running.load(Ordering::Relaxed) {
        scheduler.render(&mut period);

        // Retry short writes and XRUNs, but never spin on a dead device.
        let mut retry_count = 0u32;
        loop {
            match sink.write(&period) {
                Ok(()) => break,
                Err(e) => {
                    log::warn!("Playback write error: {}, recovering...", e);
                    retry_count += 1;
                    if let Err(e2) = sink.recover() {
                        log::error!("Failed to recover playback device: {}", e2);
                        return;
                    }
                    if retry_count >= MAX_RECOVERY_RETRIES {
                        log::error!(
                            "Max recovery retries ({}) reached. Dropping one period.",
                            retry_count
                        );
                        break;
                    }
                }
            }
        }
    }

    log::info!("Playback stopped");
}
