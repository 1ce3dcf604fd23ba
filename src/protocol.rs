//! Wire messages of the live session (JSON over websocket).

use serde::{Deserialize, Serialize};

use crate::audio::WireChunk;
use crate::audio::codec::{DEFAULT_INBOUND_SAMPLE_RATE, sample_rate_from_mime};

// ======================== Client → server ========================

/// First message on a fresh connection.
#[derive(Serialize, Debug)]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Serialize, Debug)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Serialize, Debug)]
pub struct TextPart {
    pub text: String,
}

impl SetupMessage {
    /// Audio-only session with a prebuilt voice.
    pub fn audio(model: &str, voice_name: &str, system_instruction: &str) -> Self {
        let system_instruction = (!system_instruction.trim().is_empty()).then(|| Content {
            parts: vec![TextPart {
                text: system_instruction.to_string(),
            }],
        });
        Self {
            setup: Setup {
                model: model.to_string(),
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: voice_name.to_string(),
                            },
                        },
                    },
                },
                system_instruction,
            },
        }
    }
}

/// One captured frame going up.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<WireChunk>,
}

impl RealtimeInputMessage {
    pub fn audio(chunk: WireChunk) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![chunk],
            },
        }
    }
}

// ======================== Server → client ========================

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub inline_data: Option<InlineData>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default)]
    pub mime_type: String,
    pub data: String,
}

/// An inbound audio payload, still base64 encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundAudio {
    pub sample_rate: u32,
    pub data: String,
}

/// The parts of a server message the engine acts on, in processing order:
/// audio first, then the interruption flag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundContent {
    pub audio: Vec<InboundAudio>,
    pub interrupted: bool,
    pub turn_complete: bool,
    pub setup_complete: bool,
}

impl InboundContent {
    pub fn is_empty(&self) -> bool {
        self.audio.is_empty() && !self.interrupted && !self.turn_complete && !self.setup_complete
    }
}

impl From<ServerMessage> for InboundContent {
    fn from(msg: ServerMessage) -> Self {
        let mut content = InboundContent {
            setup_complete: msg.setup_complete.is_some(),
            ..Default::default()
        };
        if let Some(server) = msg.server_content {
            content.interrupted = server.interrupted;
            content.turn_complete = server.turn_complete;
            content.audio = server
                .model_turn
                .into_iter()
                .flat_map(|turn| turn.parts)
                .filter_map(|part| part.inline_data)
                .filter(|inline| inline.mime_type.is_empty() || inline.mime_type.starts_with("audio/"))
                .map(|inline| InboundAudio {
                    sample_rate: sample_rate_from_mime(&inline.mime_type)
                        .unwrap_or(DEFAULT_INBOUND_SAMPLE_RATE),
                    data: inline.data,
                })
                .collect();
        }
        content
    }
}

/// Parse a server frame. Frames that are not JSON come back as `None`.
pub fn parse_server_message(text: &str) -> Option<InboundContent> {
    serde_json::from_str::<ServerMessage>(text).ok().map(Into::into)
}
