//! State the engine exposes to the UI: status text, error text, the recording
//! flag and the two level taps.
//!
//! Flags are published through a `watch` channel so the UI bridge can push an
//! update on every change; the taps are read by polling.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::audio::LevelTap;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub status: String,
    pub error: String,
    pub is_recording: bool,
}

#[derive(Clone)]
pub struct EngineState {
    snapshot: Arc<watch::Sender<StatusSnapshot>>,
    input: Arc<LevelTap>,
    output: Arc<LevelTap>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(StatusSnapshot::default());
        Self {
            snapshot: Arc::new(tx),
            input: Arc::new(LevelTap::new()),
            output: Arc::new(LevelTap::new()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn set_status(&self, msg: impl Into<String>) {
        let msg = msg.into();
        log::info!("Status: {}", msg);
        self.snapshot.send_modify(|s| s.status = msg);
    }

    pub fn set_error(&self, msg: impl Into<String>) {
        let msg = msg.into();
        log::error!("Error: {}", msg);
        self.snapshot.send_modify(|s| s.error = msg);
    }

    pub fn clear_error(&self) {
        self.snapshot.send_if_modified(|s| {
            if s.error.is_empty() {
                return false;
            }
            s.error.clear();
            true
        });
    }

    pub fn set_recording(&self, recording: bool) {
        self.snapshot.send_if_modified(|s| {
            let changed = s.is_recording != recording;
            s.is_recording = recording;
            changed
        });
    }

    pub fn is_recording(&self) -> bool {
        self.snapshot.borrow().is_recording
    }

    /// Tap on the microphone side, fed by the capture pipeline.
    pub fn input_tap(&self) -> Arc<LevelTap> {
        self.input.clone()
    }

    /// Tap on the speaker side, fed by the playback scheduler.
    pub fn output_tap(&self) -> Arc<LevelTap> {
        self.output.clone()
    }

    /// Instantaneous `(input, output)` levels.
    pub fn levels(&self) -> (f32, f32) {
        (self.input.level(), self.output.level())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_independent() {
        let state = EngineState::new();
        state.set_status("Opened");
        state.set_error("boom");
        state.set_recording(true);

        let snap = state.snapshot();
        assert_eq!(snap.status, "Opened");
        assert_eq!(snap.error, "boom");
        assert!(snap.is_recording);

        state.clear_error();
        let snap = state.snapshot();
        assert!(snap.error.is_empty());
        assert_eq!(snap.status, "Opened");
        assert!(snap.is_recording);
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let state = EngineState::new();
        let mut rx = state.subscribe();
        state.set_status("Session cleared.");
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().status, "Session cleared.");

        // Unchanged recording flag does not wake subscribers.
        state.set_recording(false);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn taps_are_shared() {
        let state = EngineState::new();
        state.input_tap().observe(&[0.5; 16]);
        state.output_tap().apply(&mut [0.25; 16]);
        let (input, output) = state.levels();
        assert!((input - 0.5).abs() < 1e-6);
        assert!((output - 0.25).abs() < 1e-6);
    }
}
