mod audio;
mod config;
mod controller;
mod error;
mod gui_bridge;
mod net_link;
mod protocol;
mod session;
mod state;

use audio::{
    AlsaMicrophone, AlsaSpeaker, CapturePipeline, CaptureSettings, PlaybackEngine,
    PlaybackScheduler,
};
use config::Config;
use controller::CoreController;
use gui_bridge::{GuiBridge, GuiEvent};
use net_link::SessionEvent;
use session::{Session, WsConnector};
use state::EngineState;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置
    let config = Config::new().map_err(anyhow::Error::msg)?.with_env_overrides();
    log::info!(
        "{} v{} starting, model {}",
        env!("APP_NAME"),
        env!("APP_VERSION"),
        config.model
    );
    if config.api_key.is_empty() {
        log::warn!("No API key configured, set {}", config::API_KEY_ENV);
    }

    let state = EngineState::new();

    // 播放线程，整个生命周期内持续运行；调度器使用设备实际协商的采样率
    let (mut playback, scheduler) = match PlaybackEngine::start(
        Arc::new(AlsaSpeaker::new(config.playback_device)),
        config.output_sample_rate,
        config.playback_period_size,
        state.output_tap(),
    ) {
        Ok(engine) => {
            let scheduler = engine.scheduler();
            (Some(engine), scheduler)
        }
        Err(e) => {
            log::error!("Playback unavailable: {}", e);
            state.set_error(e.to_string());
            let scheduler = Arc::new(PlaybackScheduler::new(
                config.output_sample_rate,
                state.output_tap(),
            ));
            (None, scheduler)
        }
    };

    // 事件通道
    let (tx_session_event, mut rx_session_event) = mpsc::channel::<SessionEvent>(100);
    // GUI进程通道
    let (tx_gui_event, mut rx_gui_event) = mpsc::channel::<GuiEvent>(100);

    let session = Arc::new(Session::new());
    let capture = CapturePipeline::new(
        Arc::new(AlsaMicrophone::new(config.capture_device)),
        session.clone(),
        state.clone(),
        CaptureSettings {
            sample_rate: config.input_sample_rate,
            frame_size: config.capture_frame_size,
        },
    );
    let mut controller = CoreController::new(
        session,
        Arc::new(WsConnector::new(config.clone())),
        tx_session_event,
        scheduler,
        capture,
        state.clone(),
    );

    // 启动GUI桥，接收控制命令并推送状态和电平
    let gui_bridge = Arc::new(GuiBridge::new(&config, tx_gui_event.clone()).await?);
    let gui_bridge_clone = gui_bridge.clone();
    tokio::spawn(async move {
        if let Err(e) = gui_bridge_clone.run().await {
            log::error!("GuiBridge error: {}", e);
        }
    });
    let level_interval = Duration::from_millis(config.gui_level_interval_ms);
    let publish_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = gui_bridge.publish(publish_state, level_interval).await {
            log::error!("GuiBridge publish error: {}", e);
        }
    });

    // 终端输入同样可以控制
    tokio::spawn(async move {
        if let Err(e) = gui_bridge::run_console(tx_gui_event).await {
            log::error!("Console input error: {}", e);
        }
    });

    controller.connect();
    if config.auto_start_recording {
        controller.handle_ui_command(controller::UiCommand::StartRecording);
    }

    log::info!("Engine started");

    loop {
        tokio::select! {
            // 监听 Ctrl+C 信号
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }

            Some(event) = rx_session_event.recv() => {
                controller.handle_session_event(event);
            }

            Some(event) = rx_gui_event.recv() => {
                match event {
                    GuiEvent::Command(cmd) => controller.handle_ui_command(cmd),
                    GuiEvent::Gain { input, output } => {
                        if let Some(gain) = input {
                            state.input_tap().set_gain(gain);
                        }
                        if let Some(gain) = output {
                            state.output_tap().set_gain(gain);
                        }
                        log::info!(
                            "Gain set: input={:.2}, output={:.2}",
                            state.input_tap().gain(),
                            state.output_tap().gain()
                        );
                    }
                }
            }
        }
    }

    controller.shutdown();
    if let Some(engine) = playback.as_mut() {
        engine.stop();
    }
    Ok(())
}
