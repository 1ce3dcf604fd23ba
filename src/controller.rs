use crate::audio::{CapturePhase, CapturePipeline, PlaybackScheduler};
use crate::net_link::{NetEvent, SessionEvent};
use crate::protocol::InboundContent;
use crate::session::{Session, SessionConnector, SessionState};
use crate::state::EngineState;
use std::sync::Arc;
use tokio::sync::mpsc;

/// User intents from the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiCommand {
    StartRecording,
    StopRecording,
    Reset,
}

/// Owns the session lifecycle and routes link events into the engine.
///
/// Capture and playback run on their own threads; the controller only wires
/// them to the session and reacts to what the link reports.
pub struct CoreController {
    session: Arc<Session>,
    connector: Arc<dyn SessionConnector>,
    events_tx: mpsc::Sender<SessionEvent>,
    scheduler: Arc<PlaybackScheduler>,
    capture: CapturePipeline,
    state: EngineState,
}

impl CoreController {
    pub fn new(
        session: Arc<Session>,
        connector: Arc<dyn SessionConnector>,
        events_tx: mpsc::Sender<SessionEvent>,
        scheduler: Arc<PlaybackScheduler>,
        capture: CapturePipeline,
        state: EngineState,
    ) -> Self {
        Self {
            session,
            connector,
            events_tx,
            scheduler,
            capture,
            state,
        }
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn capture_phase(&self) -> CapturePhase {
        self.capture.phase()
    }

    /// Open a new link to the agent.
    pub fn connect(&mut self) {
        let generation = self
            .session
            .begin_connect(self.connector.as_ref(), self.events_tx.clone());
        log::info!("Connecting session #{}", generation);
    }

    pub fn handle_session_event(&mut self, event: SessionEvent) {
        let generation = event.generation;
        // 旧连接的事件直接丢弃
        if !self.session.is_current(generation) {
            log::debug!("Ignoring event from stale session #{}", generation);
            return;
        }

        match event.event {
            NetEvent::Opened => {
                if self.session.mark_open(generation) {
                    self.state.set_status("Opened");
                }
            }
            NetEvent::Message(content) => self.process_server_content(content),
            NetEvent::Error(msg) => {
                self.session.mark_disconnected(generation);
                self.state.set_error(msg);
            }
            NetEvent::Closed(reason) => {
                self.session.mark_disconnected(generation);
                self.state.set_status(format!("Close:{}", reason));
            }
        }
    }

    fn process_server_content(&mut self, content: InboundContent) {
        if self.session.state() != SessionState::Open {
            log::debug!("Session not open, dropping server message");
            return;
        }
        if content.setup_complete {
            log::info!("Agent ready");
        }

        // Audio parts first, then the interruption.
        for audio in &content.audio {
            match self
                .scheduler
                .schedule_on_inbound_audio(&audio.data, audio.sample_rate)
            {
                Ok(scheduled) => log::trace!(
                    "Scheduled source #{} at {:.3}s for {:.3}s",
                    scheduled.id,
                    scheduled.start_time,
                    scheduled.duration
                ),
                Err(e) => {
                    log::warn!("Dropping inbound audio chunk: {}", e);
                    self.state.set_error(e.to_string());
                }
            }
        }

        if content.interrupted {
            let stopped = self.scheduler.flush_on_interrupt();
            log::info!("Agent interrupted, stopped {} source(s)", stopped);
        }
        if content.turn_complete {
            log::debug!("Agent turn complete");
        }
    }

    pub fn handle_ui_command(&mut self, cmd: UiCommand) {
        log::info!("UI command: {:?}", cmd);
        match cmd {
            UiCommand::StartRecording => {
                // 设备在采集线程上打开，结果写入状态文本，不阻塞事件循环
                if let Err(e) = self.capture.start_in_background() {
                    log::warn!("Recording not started: {}", e);
                }
            }
            UiCommand::StopRecording => self.capture.stop(),
            UiCommand::Reset => self.reset(),
        }
    }

    /// Drop the current conversation and start a fresh one.
    ///
    /// Capture is left alone: if it was recording it keeps recording, and its
    /// frames flow to the new session once it opens.
    pub fn reset(&mut self) {
        self.session.close();
        let stopped = self.scheduler.flush_on_interrupt();
        log::debug!("Reset stopped {} source(s)", stopped);
        self.connect();
        self.state.set_status("Session cleared.");
    }

    pub fn shutdown(&mut self) {
        self.capture.stop();
        self.session.close();
        self.scheduler.flush_on_interrupt();
    }
}
