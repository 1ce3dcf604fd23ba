use crate::audio::WireChunk;
use crate::config::Config;
use crate::protocol::{InboundContent, RealtimeInputMessage, SetupMessage, parse_server_message};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

#[derive(Debug)]
pub enum NetEvent {
    Opened,
    Message(InboundContent),
    Error(String),
    Closed(String),
}

/// A link event tagged with the generation of the link that produced it.
#[derive(Debug)]
pub struct SessionEvent {
    pub generation: u64,
    pub event: NetEvent,
}

#[derive(Debug)]
pub enum NetCommand {
    SendAudio(WireChunk),
    Close,
}

/// One websocket connection to the live session.
///
/// There is no retry: when the connection ends, the link reports `Closed` and
/// exits. A new link is only created by an explicit reset.
pub struct NetLink {
    config: Config,
    generation: u64,
    tx: mpsc::Sender<SessionEvent>,
    rx_cmd: mpsc::Receiver<NetCommand>,
}

impl NetLink {
    pub fn new(
        config: Config,
        generation: u64,
        tx: mpsc::Sender<SessionEvent>,
        rx_cmd: mpsc::Receiver<NetCommand>,
    ) -> Self {
        Self {
            config,
            generation,
            tx,
            rx_cmd,
        }
    }

    pub async fn run(mut self) {
        match self.connect_and_loop().await {
            Ok(reason) => {
                log::info!("Session #{} closed: {}", self.generation, reason);
                self.emit(NetEvent::Closed(reason)).await;
            }
            Err(e) => {
                log::error!("Session #{} failed: {}", self.generation, e);
                self.emit(NetEvent::Error(e.to_string())).await;
                self.emit(NetEvent::Closed(e.to_string())).await;
            }
        }
    }

    async fn emit(&self, event: NetEvent) {
        let event = SessionEvent {
            generation: self.generation,
            event,
        };
        if self.tx.send(event).await.is_err() {
            log::debug!("Controller gone, dropping session event");
        }
    }

    fn build_url(&self) -> anyhow::Result<Url> {
        let mut url = Url::parse(self.config.ws_url)?;
        if !self.config.api_key.is_empty() {
            url.query_pairs_mut().append_pair("key", &self.config.api_key);
        }
        Ok(url)
    }

    // 连接并进入主循环，返回关闭原因
    async fn connect_and_loop(&mut self) -> anyhow::Result<String> {
        let url = self.build_url()?;

        log::info!("Connecting to {}...", self.config.ws_url);
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        log::info!("Connected!");

        let (mut write, mut read) = ws_stream.split();

        self.emit(NetEvent::Opened).await;

        let setup = SetupMessage::audio(
            self.config.model,
            self.config.voice_name,
            &self.config.system_instruction,
        );
        let setup_json = serde_json::to_string(&setup)?;
        log::debug!("Sending setup for model {}", self.config.model);
        write.send(Message::Text(setup_json.into())).await?;

        // 主循环，处理读取和写入
        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.forward(text.as_str()).await,
                        // The service sends JSON in binary frames too.
                        Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                            Ok(text) => self.forward(text).await,
                            Err(_) => log::warn!("Ignoring non-UTF-8 binary frame ({} bytes)", data.len()),
                        },
                        Some(Ok(Message::Close(frame))) => {
                            log::info!("Server closed connection: {:?}", frame);
                            return Ok(frame.map(|f| f.reason.as_str().to_string()).unwrap_or_default());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok("connection closed".to_string()),
                    }
                }
                cmd = self.rx_cmd.recv() => {
                    match cmd {
                        Some(NetCommand::SendAudio(chunk)) => {
                            let json = serde_json::to_string(&RealtimeInputMessage::audio(chunk))?;
                            write.send(Message::Text(json.into())).await?;
                        }
                        Some(NetCommand::Close) | None => {
                            if let Err(e) = write.send(Message::Close(None)).await {
                                log::debug!("Close frame not sent: {}", e);
                            }
                            return Ok("closed by client".to_string());
                        }
                    }
                }
            }
        }
    }

    async fn forward(&self, text: &str) {
        match parse_server_message(text) {
            Some(content) if content.is_empty() => {
                log::trace!("Ignoring server message without audio content");
            }
            Some(content) => {
                if content.setup_complete {
                    log::info!("Session #{} setup complete", self.generation);
                }
                self.emit(NetEvent::Message(content)).await;
            }
            None => log::debug!("Ignoring non-JSON server frame"),
        }
    }
}
