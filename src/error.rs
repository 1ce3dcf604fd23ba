//! Error taxonomy of the audio engine.
//!
//! Device and payload errors are recoverable: the caller reports them through
//! the status/error exposure and keeps running.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Microphone access denied: {0}")]
    DeviceAccessDenied(String),

    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Audio decode failed: {0}")]
    DecodeError(String),

    #[error("Session is not open")]
    SessionNotOpen,

    #[error("Outbound queue full, frame dropped")]
    SendBackpressure,

    #[error("Send failed: {0}")]
    SendFailed(String),
}

impl EngineError {
    /// Map an OS errno from a device call to the device side of the taxonomy.
    pub fn from_device_errno(errno: i32, context: impl Into<String>) -> Self {
        let context = context.into();
        match std::io::Error::from_raw_os_error(errno.abs()).kind() {
            std::io::ErrorKind::PermissionDenied => Self::DeviceAccessDenied(context),
            _ => Self::DeviceUnavailable(context),
        }
    }
}
