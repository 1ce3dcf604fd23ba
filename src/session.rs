//! The single logical connection to the remote agent.
//!
//! `Session` is shared between the controller (lifecycle) and the capture
//! thread (send path). Each connection attempt gets a new generation; events
//! from older generations are stale and must be ignored by the caller.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::audio::{OutboundAudio, WireChunk};
use crate::config::Config;
use crate::error::EngineError;
use crate::net_link::{NetCommand, NetLink, SessionEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Starts a link for a generation and hands back its command queue.
pub trait SessionConnector: Send + Sync {
    fn connect(
        &self,
        generation: u64,
        events: mpsc::Sender<SessionEvent>,
    ) -> mpsc::Sender<NetCommand>;
}

/// Spawns a websocket [`NetLink`] on the current tokio runtime.
pub struct WsConnector {
    config: Config,
}

impl WsConnector {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl SessionConnector for WsConnector {
    fn connect(
        &self,
        generation: u64,
        events: mpsc::Sender<SessionEvent>,
    ) -> mpsc::Sender<NetCommand> {
        let (tx_cmd, rx_cmd) = mpsc::channel(self.config.outbound_queue.max(1));
        let link = NetLink::new(self.config.clone(), generation, events, rx_cmd);
        tokio::spawn(link.run());
        tx_cmd
    }
}

struct SessionInner {
    state: SessionState,
    generation: u64,
    commands: Option<mpsc::Sender<NetCommand>>,
}

pub struct Session {
    inner: Mutex<SessionInner>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                state: SessionState::Disconnected,
                generation: 0,
                commands: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    /// Start a fresh link. Whatever link was current becomes stale.
    pub fn begin_connect(
        &self,
        connector: &dyn SessionConnector,
        events: mpsc::Sender<SessionEvent>,
    ) -> u64 {
        let mut inner = self.lock();
        inner.generation += 1;
        let generation = inner.generation;
        inner.commands = Some(connector.connect(generation, events));
        inner.state = SessionState::Connecting;
        generation
    }

    /// The link of `generation` reported open. False if it is stale.
    pub fn mark_open(&self, generation: u64) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation || inner.state != SessionState::Connecting {
            return false;
        }
        inner.state = SessionState::Open;
        true
    }

    /// The link of `generation` is gone. False if it is stale.
    pub fn mark_disconnected(&self, generation: u64) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        inner.state = SessionState::Disconnected;
        inner.commands = None;
        true
    }

    /// Ask the current link to close. No-op when already disconnected.
    ///
    /// The session sits in `Closing` until the link confirms or a new
    /// connection replaces it.
    pub fn close(&self) -> bool {
        let mut inner = self.lock();
        if inner.state == SessionState::Disconnected {
            inner.commands = None;
            return false;
        }
        inner.state = SessionState::Closing;
        if let Some(tx) = inner.commands.take() {
            // Dropping the sender closes the link even if the queue is full.
            let _ = tx.try_send(NetCommand::Close);
        }
        true
    }
}

impl OutboundAudio for Session {
    fn send_audio(&self, chunk: WireChunk) -> Result<(), EngineError> {
        let inner = self.lock();
        if inner.state != SessionState::Open {
            return Err(EngineError::SessionNotOpen);
        }
        let Some(tx) = inner.commands.as_ref() else {
            return Err(EngineError::SessionNotOpen);
        };
        tx.try_send(NetCommand::SendAudio(chunk)).map_err(|e| match e {
            TrySendError::Full(_) => EngineError::SendBackpressure,
            TrySendError::Closed(_) => EngineError::SendFailed("session link has shut down".into()),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    /// Records every link it is asked to start instead of touching the network.
    pub(crate) struct FakeConnector {
        queue: usize,
        pub links: Mutex<Vec<(u64, mpsc::Receiver<NetCommand>)>>,
    }

    impl FakeConnector {
        pub(crate) fn new(queue: usize) -> Arc<Self> {
            Arc::new(Self {
                queue,
                links: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn take_link(&self, generation: u64) -> mpsc::Receiver<NetCommand> {
            let mut links = self.links.lock().unwrap();
            let index = links.iter().position(|(g, _)| *g == generation).unwrap();
            links.remove(index).1
        }
    }

    impl SessionConnector for FakeConnector {
        fn connect(
            &self,
            generation: u64,
            _events: mpsc::Sender<SessionEvent>,
        ) -> mpsc::Sender<NetCommand> {
            let (tx, rx) = mpsc::channel(self.queue);
            self.links.lock().unwrap().push((generation, rx));
            tx
        }
    }

    fn chunk() -> WireChunk {
        WireChunk {
            mime_type: "audio/pcm;rate=16000".into(),
            data: "AAA=".into(),
        }
    }

    fn open_session(queue: usize) -> (Session, Arc<FakeConnector>, u64) {
        let session = Session::new();
        let connector = FakeConnector::new(queue);
        let (events, _rx) = mpsc::channel(1);
        let generation = session.begin_connect(connector.as_ref(), events);
        assert!(session.mark_open(generation));
        (session, connector, generation)
    }

    #[test]
    fn lifecycle_transitions() {
        let session = Session::new();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.close());

        let connector = FakeConnector::new(4);
        let (events, _rx) = mpsc::channel(1);
        let generation = session.begin_connect(connector.as_ref(), events);
        assert_eq!(generation, 1);
        assert_eq!(session.state(), SessionState::Connecting);

        assert!(session.mark_open(generation));
        assert_eq!(session.state(), SessionState::Open);

        assert!(session.close());
        assert_eq!(session.state(), SessionState::Closing);
        let mut link = connector.take_link(generation);
        assert!(matches!(link.try_recv(), Ok(NetCommand::Close)));

        assert!(session.mark_disconnected(generation));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn send_requires_open_session() {
        let session = Session::new();
        assert_eq!(session.send_audio(chunk()), Err(EngineError::SessionNotOpen));

        let connector = FakeConnector::new(4);
        let (events, _rx) = mpsc::channel(1);
        let generation = session.begin_connect(connector.as_ref(), events);
        assert_eq!(session.send_audio(chunk()), Err(EngineError::SessionNotOpen));

        session.mark_open(generation);
        assert_eq!(session.send_audio(chunk()), Ok(()));
        let mut link = connector.take_link(generation);
        assert!(matches!(link.try_recv(), Ok(NetCommand::SendAudio(_))));
    }

    #[test]
    fn full_queue_is_backpressure() {
        let (session, _connector, _) = open_session(1);
        assert_eq!(session.send_audio(chunk()), Ok(()));
        assert_eq!(session.send_audio(chunk()), Err(EngineError::SendBackpressure));
    }

    #[test]
    fn dead_link_is_a_send_failure() {
        let (session, connector, generation) = open_session(4);
        drop(connector.take_link(generation));
        assert!(matches!(
            session.send_audio(chunk()),
            Err(EngineError::SendFailed(_))
        ));
    }

    #[test]
    fn stale_generations_are_rejected() {
        let (session, connector, first) = open_session(4);
        let (events, _rx) = mpsc::channel(1);
        session.close();
        let second = session.begin_connect(connector.as_ref(), events);
        assert_eq!(second, first + 1);

        assert!(!session.is_current(first));
        assert!(!session.mark_open(first));
        assert!(!session.mark_disconnected(first));
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(session.mark_open(second));
    }
}
