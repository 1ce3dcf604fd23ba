//! Gapless playback scheduling on the output device's timeline.
//!
//! Every inbound chunk becomes a [`ScheduledSource`] that starts exactly where
//! the previous one ends. The playback thread pulls periods through
//! [`PlaybackScheduler::render`], which is also what advances the device clock.
//! Scheduling, flushing and rendering all go through one mutex, so an interrupt
//! can never land halfway through a schedule or a render.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::audio::codec::{self, DecodedBuffer};
use crate::audio::levels::LevelTap;
use crate::error::EngineError;

/// Inbound audio is always mono.
const INBOUND_CHANNELS: usize = 1;

/// A decoded buffer bound to a start time on the device timeline.
#[derive(Debug, Clone)]
pub struct ScheduledSource {
    pub id: u64,
    /// Start time in seconds on the device timeline.
    pub start_time: f64,
    /// Length in seconds.
    pub duration: f64,
    samples: Vec<f32>,
    sample_rate: u32,
    start_frame: u64,
    end_frame: u64,
}

impl ScheduledSource {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// Sample to play `offset` device frames after the source started.
    fn sample_at(&self, offset: u64, device_rate: u32) -> f32 {
        let index = if self.sample_rate == device_rate {
            offset
        } else {
            offset * self.sample_rate as u64 / device_rate as u64
        };
        // Frame edges are rounded, so the last sample may have to cover one extra frame.
        let last = self.samples.len().saturating_sub(1) as u64;
        self.samples.get(index.min(last) as usize).copied().unwrap_or(0.0)
    }
}

/// What a schedule call decided, for logging and callers that need the timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scheduled {
    pub id: u64,
    pub start_time: f64,
    pub duration: f64,
}

struct SchedulerInner {
    /// Frames handed to the device so far; the device clock.
    rendered_frames: u64,
    /// Earliest time a new source may start without overlapping queued audio.
    next_start_time: f64,
    /// Everything queued or playing, keyed by id (ids increase with arrival).
    live: BTreeMap<u64, ScheduledSource>,
    next_id: u64,
}

pub struct PlaybackScheduler {
    inner: Mutex<SchedulerInner>,
    device_rate: u32,
    output_tap: Arc<LevelTap>,
}

impl PlaybackScheduler {
    /// Create a scheduler for an output device running at `device_rate`.
    ///
    /// The clock starts at zero and `next_start_time` starts at the current
    /// device time.
    pub fn new(device_rate: u32, output_tap: Arc<LevelTap>) -> Self {
        Self {
            inner: Mutex::new(SchedulerInner {
                rendered_frames: 0,
                next_start_time: 0.0,
                live: BTreeMap::new(),
                next_id: 0,
            }),
            device_rate: device_rate.max(1),
            output_tap,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn frames_to_seconds(&self, frames: u64) -> f64 {
        frames as f64 / self.device_rate as f64
    }

    fn seconds_to_frames(&self, seconds: f64) -> u64 {
        (seconds * self.device_rate as f64).round() as u64
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }

    /// Current time on the device timeline, in seconds.
    pub fn device_now(&self) -> f64 {
        let frames = self.lock().rendered_frames;
        self.frames_to_seconds(frames)
    }

    pub fn next_start_time(&self) -> f64 {
        self.lock().next_start_time
    }

    pub fn live_count(&self) -> usize {
        self.lock().live.len()
    }

    /// Snapshot of the live set in arrival order.
    pub fn live_sources(&self) -> Vec<ScheduledSource> {
        self.lock().live.values().cloned().collect()
    }

    /// Decode an inbound base64 chunk and queue it behind everything already
    /// scheduled. Decode failures leave the scheduler untouched.
    pub fn schedule_on_inbound_audio(
        &self,
        payload: &str,
        sample_rate: u32,
    ) -> Result<Scheduled, EngineError> {
        let raw = codec::decode_inbound(payload)?;
        let buffer = codec::decode_audio_data(&raw, sample_rate, INBOUND_CHANNELS)?;
        Ok(self.schedule_buffer(buffer))
    }

    /// Queue an already decoded buffer.
    pub fn schedule_buffer(&self, buffer: DecodedBuffer) -> Scheduled {
        let duration = buffer.duration();
        let sample_rate = buffer.sample_rate.max(1);
        let samples = buffer.mono();

        let mut inner = self.lock();
        let now = self.frames_to_seconds(inner.rendered_frames);
        // Never schedule in the past.
        inner.next_start_time = inner.next_start_time.max(now);

        let start_time = inner.next_start_time;
        let end_time = start_time + duration;
        // Both edges go through the same rounding, so a source ends on exactly
        // the frame where the next one chained behind it starts.
        let start_frame = self.seconds_to_frames(start_time);
        let end_frame = self.seconds_to_frames(end_time);

        let id = inner.next_id;
        inner.next_id += 1;
        inner.live.insert(
            id,
            ScheduledSource {
                id,
                start_time,
                duration,
                samples,
                sample_rate,
                start_frame,
                end_frame,
            },
        );
        inner.next_start_time = end_time;

        log::debug!(
            "Scheduled source {}: start={:.4}s duration={:.4}s live={}",
            id,
            start_time,
            duration,
            inner.live.len()
        );

        Scheduled { id, start_time, duration }
    }

    /// Stop and drop every queued or playing source (barge-in).
    ///
    /// Returns how many sources were stopped.
    pub fn flush_on_interrupt(&self) -> usize {
        let mut inner = self.lock();
        let stopped = inner.live.len();
        inner.live.clear();
        inner.next_start_time = 0.0;
        drop(inner);

        log::info!("Playback flushed, {} source(s) stopped", stopped);
        stopped
    }

    /// Mix the next `out.len()` device frames and advance the clock.
    ///
    /// Sources whose last frame falls inside the window finish naturally and
    /// leave the live set. Returns the number of sources that finished.
    pub fn render(&self, out: &mut [f32]) -> usize {
        out.fill(0.0);

        let mut inner = self.lock();
        let window_start = inner.rendered_frames;
        let window_end = window_start + out.len() as u64;

        let mut finished = Vec::new();
        for source in inner.live.values() {
            if source.start_frame < window_end && source.end_frame > window_start {
                let from = source.start_frame.max(window_start);
                let to = source.end_frame.min(window_end);
                for frame in from..to {
                    out[(frame - window_start) as usize] +=
                        source.sample_at(frame - source.start_frame, self.device_rate);
                }
            }
            if source.end_frame <= window_end {
                finished.push(source.id);
            }
        }
        for id in &finished {
            inner.live.remove(id);
            log::trace!("Source {} ended", id);
        }
        inner.rendered_frames = window_end;
        drop(inner);

        self.output_tap.apply(out);
        finished.len()
    }
}
