use crate::config::Config;
use crate::controller::UiCommand;
use crate::state::{EngineState, StatusSnapshot};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

pub enum GuiEvent {
    Command(UiCommand),
    /// 输入/输出增益调节
    Gain {
        input: Option<f32>,
        output: Option<f32>,
    },
}

#[derive(Deserialize)]
struct GuiMessage {
    #[serde(rename = "type")]
    msg_type: String,
    input: Option<f32>,
    output: Option<f32>,
}

/// Parse one message from the GUI process.
pub fn parse_event(text: &str) -> Option<GuiEvent> {
    if let Ok(msg) = serde_json::from_str::<GuiMessage>(text.trim()) {
        if msg.msg_type == "gain" {
            return Some(GuiEvent::Gain {
                input: msg.input,
                output: msg.output,
            });
        }
    }
    parse_command(text).map(GuiEvent::Command)
}

/// Accepts `{"type":"start"}` style JSON or the bare word.
pub fn parse_command(text: &str) -> Option<UiCommand> {
    let text = text.trim();
    let word = match serde_json::from_str::<GuiMessage>(text) {
        Ok(msg) => msg.msg_type,
        Err(_) => text.to_string(),
    };
    match word.to_ascii_lowercase().as_str() {
        "start" | "start_recording" => Some(UiCommand::StartRecording),
        "stop" | "stop_recording" => Some(UiCommand::StopRecording),
        "reset" | "clear" => Some(UiCommand::Reset),
        _ => None,
    }
}

fn status_message(snapshot: &StatusSnapshot) -> String {
    json!({
        "type": "status",
        "status": snapshot.status,
        "error": snapshot.error,
        "is_recording": snapshot.is_recording,
    })
    .to_string()
}

fn levels_message(input: f32, output: f32) -> String {
    json!({"type": "levels", "input": input, "output": output}).to_string()
}

pub struct GuiBridge {
    socket: Arc<UdpSocket>,
    target_addr: String,
    buffer_size: usize,
    tx: mpsc::Sender<GuiEvent>,
}

// GUI进程和Core进程通过本地UDP通信，端口在配置中指定
impl GuiBridge {
    pub async fn new(config: &Config, tx: mpsc::Sender<GuiEvent>) -> anyhow::Result<Self> {
        // 绑定本地UDP端口
        let socket =
            UdpSocket::bind(format!("{}:{}", config.gui_local_ip, config.gui_local_port)).await?;
        let target_addr = format!("{}:{}", config.gui_remote_ip, config.gui_remote_port);

        Ok(Self {
            socket: Arc::new(socket),
            target_addr,
            buffer_size: config.gui_buffer_size.max(64),
            tx,
        })
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            // 通过UDP socket接收消息
            let (len, _) = self.socket.recv_from(&mut buf).await?;
            let Ok(msg) = std::str::from_utf8(&buf[..len]) else {
                continue;
            };
            match parse_event(msg) {
                Some(event) => {
                    if self.tx.send(event).await.is_err() {
                        break;
                    }
                }
                None => log::debug!("Unknown GUI message: {}", msg),
            }
        }
        Ok(())
    }

    pub async fn send_message(&self, msg: &str) -> anyhow::Result<()> {
        self.socket
            .send_to(msg.as_bytes(), &self.target_addr)
            .await?;
        Ok(())
    }

    /// Push status changes as they happen and levels on a fixed tick.
    pub async fn publish(&self, state: EngineState, level_interval: Duration) -> anyhow::Result<()> {
        let mut status_rx = state.subscribe();
        let mut ticker = tokio::time::interval(level_interval.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let initial = status_message(&status_rx.borrow_and_update());
        self.send_message(&initial).await?;

        loop {
            tokio::select! {
                changed = status_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let msg = status_message(&status_rx.borrow_and_update());
                    if let Err(e) = self.send_message(&msg).await {
                        log::warn!("Failed to send status to GUI: {}", e);
                    }
                }
                _ = ticker.tick() => {
                    let (input, output) = state.levels();
                    if let Err(e) = self.send_message(&levels_message(input, output)).await {
                        log::trace!("Failed to send levels to GUI: {}", e);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Read commands from stdin, one per line.
pub async fn run_console(tx: mpsc::Sender<GuiEvent>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match parse_command(&line) {
            Some(cmd) => {
                if tx.send(GuiEvent::Command(cmd)).await.is_err() {
                    break;
                }
            }
            None => println!("Commands: start | stop | reset"),
        }
    }
    Ok(())
}
