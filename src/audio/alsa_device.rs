//! ALSA PCM device wrappers for audio capture and playback.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};

use super::codec::{AudioFrame, quantize};
use super::device::{FrameSource, Microphone, PcmSink, Speaker};
use crate::error::EngineError;

const PCM_SCALE: f32 = 32768.0;

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames (one frame = channels × sample_width)
    pub period_size: usize,
}

fn device_error(e: alsa::Error, what: String) -> EngineError {
    EngineError::from_device_errno(e.errno(), format!("{}: {}", what, e))
}

/// Open a PCM device for capture (recording).
pub fn open_capture(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: usize,
) -> Result<(PCM, AlsaParams), EngineError> {
    open_pcm(
        device,
        Direction::Capture,
        sample_rate,
        channels,
        Some(period_size),
        "Capture",
    )
}

/// Open a PCM device for playback.
pub fn open_playback(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<(PCM, AlsaParams), EngineError> {
    open_pcm(
        device,
        Direction::Playback,
        sample_rate,
        channels,
        period_size,
        "Playback",
    )
}

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
    dir_name: &str,
) -> Result<(PCM, AlsaParams), EngineError> {
    let err = |what: &str| {
        let what = format!("{} '{}' ({})", what, device, dir_name);
        move |e: alsa::Error| device_error(e, what)
    };

    let pcm = PCM::new(device, direction, false).map_err(err("Failed to open PCM device"))?;

    // Configure hardware parameters
    {
        let hwp = HwParams::any(&pcm).map_err(err("Failed to initialize HwParams"))?;
        hwp.set_access(Access::RWInterleaved)
            .map_err(err("Unsupported access mode"))?;
        hwp.set_format(Format::S16LE).map_err(err("Unsupported sample format"))?;
        hwp.set_channels(channels).map_err(err("Unsupported channel count"))?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)
            .map_err(err("Unsupported sample rate"))?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)
                .map_err(err("Unsupported period size"))?;
        }
        pcm.hw_params(&hwp).map_err(err("Failed to apply HwParams"))?;
    }

    // Read back actual negotiated parameters
    let (actual_rate, actual_channels, period_size) = {
        let hwp = pcm.hw_params_current().map_err(err("Failed to read HwParams"))?;
        let rate = hwp.get_rate().map_err(err("Failed to read rate"))?;
        let ch = hwp.get_channels().map_err(err("Failed to read channels"))?;
        let ps = hwp.get_period_size().map_err(err("Failed to read period size"))? as usize;
        (rate, ch, ps)
    };

    let params = AlsaParams {
        sample_rate: actual_rate,
        channels: actual_channels,
        period_size,
    };

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}",
        dir_name,
        device,
        actual_rate,
        actual_channels,
        period_size,
    );

    Ok((pcm, params))
}

// ======================== Capture ========================

/// The ALSA capture device named in the config.
pub struct AlsaMicrophone {
    device: String,
}

impl AlsaMicrophone {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

impl Microphone for AlsaMicrophone {
    fn open(&self, sample_rate: u32, frame_size: usize) -> Result<Box<dyn FrameSource>, EngineError> {
        let (pcm, params) = open_capture(&self.device, sample_rate, 1, frame_size)?;
        if params.sample_rate != sample_rate {
            log::warn!(
                "Capture runs at {} Hz but the session expects {} Hz",
                params.sample_rate,
                sample_rate
            );
        }
        let channels = params.channels.max(1) as usize;
        Ok(Box::new(AlsaCapture {
            pcm,
            channels,
            read_buf: vec![0i16; frame_size * channels],
        }))
    }
}

struct AlsaCapture {
    pcm: PCM,
    channels: usize,
    /// ALSA read buffer (interleaved i16, one frame)
    read_buf: Vec<i16>,
}

impl FrameSource for AlsaCapture {
    fn next_frame(&mut self) -> Result<AudioFrame, EngineError> {
        let io = self
            .pcm
            .io_i16()
            .map_err(|e| device_error(e, "Capture IO".into()))?;
        let frames = io
            .readi(&mut self.read_buf)
            .map_err(|e| device_error(e, "Capture read".into()))?;

        // Interleaved → mono float
        let channels = self.channels;
        Ok(self.read_buf[..frames * channels]
            .chunks_exact(channels)
            .map(|f| f.iter().map(|&s| s as f32).sum::<f32>() / (channels as f32 * PCM_SCALE))
            .collect())
    }

    fn recover(&mut self) -> Result<(), EngineError> {
        self.pcm
            .prepare()
            .map_err(|e| device_error(e, "Capture recover".into()))
    }
}

// ======================== Playback ========================

/// The ALSA playback device named in the config.
pub struct AlsaSpeaker {
    device: String,
}

impl AlsaSpeaker {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

impl Speaker for AlsaSpeaker {
    fn open(&self, sample_rate: u32, period_size: usize) -> Result<Box<dyn PcmSink>, EngineError> {
        let period = (period_size > 0).then_some(period_size);
        let (pcm, params) = open_playback(&self.device, sample_rate, 1, period)?;
        Ok(Box::new(AlsaPlayback {
            pcm,
            params,
            write_buf: Vec::new(),
        }))
    }
}

struct AlsaPlayback {
    pcm: PCM,
    params: AlsaParams,
    write_buf: Vec<i16>,
}

impl PcmSink for AlsaPlayback {
    fn sample_rate(&self) -> u32 {
        self.params.sample_rate
    }

    fn period_size(&self) -> usize {
        self.params.period_size
    }

    fn write(&mut self, samples: &[f32]) -> Result<(), EngineError> {
        let channels = self.params.channels.max(1) as usize;
        self.write_buf.clear();
        for &s in samples {
            let value = quantize(s);
            self.write_buf.extend(std::iter::repeat_n(value, channels));
        }

        let io = self
            .pcm
            .io_i16()
            .map_err(|e| device_error(e, "Playback IO".into()))?;
        // Handle short writes without losing frames
        let total_frames = samples.len();
        let mut frames_written = 0;
        while frames_written < total_frames {
            let offset = frames_written * channels;
            frames_written += io
                .writei(&self.write_buf[offset..])
                .map_err(|e| device_error(e, "Playback write".into()))?;
        }
        Ok(())
    }

    fn recover(&mut self) -> Result<(), EngineError> {
        self.pcm
            .prepare()
            .map_err(|e| device_error(e, "Playback recover".into()))
    }
}
