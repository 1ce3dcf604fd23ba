//! audio - Capture, gapless playback scheduling, and the PCM wire codec
//!
//! Device I/O runs on dedicated OS threads over ALSA. The session side only
//! ever sees base64 PCM chunks going out and decoded sources being scheduled
//! on the playback clock.

mod alsa_device;
pub mod capture;
pub mod codec;
pub mod device;
pub mod levels;
pub mod playback;
pub mod scheduler;

pub use alsa_device::{AlsaMicrophone, AlsaSpeaker};
pub use capture::{CapturePhase, CapturePipeline, CaptureSettings, OutboundAudio};
pub use codec::WireChunk;
pub use levels::LevelTap;
pub use playback::PlaybackEngine;
pub use scheduler::PlaybackScheduler;
