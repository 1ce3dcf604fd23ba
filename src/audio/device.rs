//! Device seams between the pipelines and the audio hardware.
//!
//! The capture side pulls fixed-size frames from a [`FrameSource`]; the
//! playback side pushes rendered periods into a [`PcmSink`]. Both are opened on
//! the thread that uses them, so neither needs to be `Send`.

use crate::audio::codec::AudioFrame;
use crate::error::EngineError;

/// A microphone that can be opened on demand.
pub trait Microphone: Send + Sync {
    /// Acquire the device, delivering `frame_size` mono samples per frame.
    fn open(&self, sample_rate: u32, frame_size: usize)
        -> Result<Box<dyn FrameSource>, EngineError>;
}

/// An opened capture stream. Dropping it releases the device.
pub trait FrameSource {
    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<AudioFrame, EngineError>;

    /// Try to bring the stream back after a read error (overrun etc).
    fn recover(&mut self) -> Result<(), EngineError> {
        Err(EngineError::DeviceUnavailable("recovery not supported".into()))
    }
}

/// A speaker that can be opened on demand.
pub trait Speaker: Send + Sync {
    fn open(&self, sample_rate: u32, period_size: usize) -> Result<Box<dyn PcmSink>, EngineError>;
}

/// An opened playback stream. Dropping it releases the device.
pub trait PcmSink {
    /// Negotiated sample rate.
    fn sample_rate(&self) -> u32;

    /// Frames per period; the playback thread renders this many at a time.
    fn period_size(&self) -> usize;

    /// Write one period of mono samples, blocking until the device accepts it.
    fn write(&mut self, samples: &[f32]) -> Result<(), EngineError>;

    fn recover(&mut self) -> Result<(), EngineError> {
        Err(EngineError::DeviceUnavailable("recovery not supported".into()))
    }
}
