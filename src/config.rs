/// 运行时可覆盖 API key 的环境变量
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone)]
pub struct Config {
    // 音频设备配置
    pub capture_device: &'static str,
    pub playback_device: &'static str,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub capture_frame_size: usize,
    pub playback_period_size: usize,
    pub outbound_queue: usize,
    pub auto_start_recording: bool,

    // GUI进程配置
    pub gui_local_port: u16,
    pub gui_remote_port: u16,
    pub gui_local_ip: &'static str,
    pub gui_remote_ip: &'static str,
    pub gui_buffer_size: usize,
    pub gui_level_interval_ms: u64,

    // 网络配置
    pub ws_url: &'static str,
    pub api_key: String,

    // 会话配置
    pub model: &'static str,
    pub voice_name: &'static str,
    pub system_instruction: String,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            capture_device: env!("AUDIO_CAPTURE_DEVICE"),
            playback_device: env!("AUDIO_PLAYBACK_DEVICE"),
            input_sample_rate: env!("AUDIO_INPUT_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse AUDIO_INPUT_SAMPLE_RATE")?,
            output_sample_rate: env!("AUDIO_OUTPUT_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse AUDIO_OUTPUT_SAMPLE_RATE")?,
            capture_frame_size: env!("AUDIO_CAPTURE_FRAME_SIZE").parse()
                .map_err(|_| "Failed to parse AUDIO_CAPTURE_FRAME_SIZE")?,
            playback_period_size: env!("AUDIO_PLAYBACK_PERIOD_SIZE").parse()
                .map_err(|_| "Failed to parse AUDIO_PLAYBACK_PERIOD_SIZE")?,
            outbound_queue: env!("AUDIO_OUTBOUND_QUEUE").parse()
                .map_err(|_| "Failed to parse AUDIO_OUTBOUND_QUEUE")?,
            auto_start_recording: env!("AUDIO_AUTO_START_RECORDING").parse()
                .map_err(|_| "Failed to parse AUDIO_AUTO_START_RECORDING")?,

            gui_local_port: env!("GUI_LOCAL_PORT").parse()
                .map_err(|_| "Failed to parse GUI_LOCAL_PORT")?,
            gui_remote_port: env!("GUI_REMOTE_PORT").parse()
                .map_err(|_| "Failed to parse GUI_REMOTE_PORT")?,
            gui_local_ip: env!("GUI_LOCAL_IP"),
            gui_remote_ip: env!("GUI_REMOTE_IP"),
            gui_buffer_size: env!("GUI_BUFFER_SIZE").parse()
                .map_err(|_| "Failed to parse GUI_BUFFER_SIZE")?,
            gui_level_interval_ms: env!("GUI_LEVEL_INTERVAL_MS").parse()
                .map_err(|_| "Failed to parse GUI_LEVEL_INTERVAL_MS")?,

            ws_url: env!("WS_URL"),
            api_key: env!("WS_API_KEY").to_string(),

            model: env!("SESSION_MODEL"),
            voice_name: env!("SESSION_VOICE_NAME"),
            system_instruction: unescape(env!("SESSION_SYSTEM_INSTRUCTION")),
        })
    }

    /// 用运行时环境变量覆盖编译时的 API key
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.api_key = key.trim().to_string();
            }
        }
        self
    }
}

/// Reverses the escaping `build.rs` applies to multi-line values.
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
