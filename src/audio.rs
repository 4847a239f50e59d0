//! Audio pitch playback
//!
//! Pitches arrive as base64 raw PCM: signed 16-bit little-endian samples,
//! interleaved by channel. At most one pitch plays at a time.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::controller::{IdeaStudio, Outcome};
use crate::error::{AudioError, ServiceResult};
use crate::state::SkipReason;

pub const PITCH_SAMPLE_RATE: u32 = 24_000;
pub const PITCH_CHANNELS: usize = 1;

/// Decoded samples, one vector per channel, normalized to [-1.0, 1.0).
#[derive(Clone, Debug, PartialEq)]
pub struct PcmBuffer {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl PcmBuffer {
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / f64::from(self.sample_rate))
    }
}

pub fn decode_base64(payload: &str) -> Result<Vec<u8>, AudioError> {
    Ok(STANDARD.decode(payload.trim())?)
}

/// Splits interleaved 16-bit PCM into per-channel float samples. A trailing
/// partial frame is dropped.
pub fn decode_pcm(bytes: &[u8], sample_rate: u32, channels: usize) -> Result<PcmBuffer, AudioError> {
    if channels == 0 {
        return Err(AudioError::NoChannels);
    }
    if bytes.len() % 2 != 0 {
        return Err(AudioError::OddLength(bytes.len()));
    }

    let samples: Vec<i16> = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let frames = samples.len() / channels;

    let mut out = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (channel, sample) in out.iter_mut().zip(frame) {
            channel.push(f32::from(*sample) / 32768.0);
        }
    }

    Ok(PcmBuffer {
        sample_rate,
        channels: out,
    })
}

pub trait PlaybackHandle: Send {
    fn stop(&mut self);
}

/// Somewhere decoded audio can be played.
///
/// `on_end` must run after `play` has returned, once playback finishes on its
/// own. It may be skipped for a source that was stopped.
pub trait AudioOutput: Send + Sync {
    fn play(
        &self,
        buffer: PcmBuffer,
        on_end: Box<dyn FnOnce() + Send>,
    ) -> Result<Box<dyn PlaybackHandle>, AudioError>;
}

/// Output for headless hosts: produces no sound but keeps the clip's timing,
/// so the playing state ends when the pitch would have.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClockOutput;

struct ClockPlayback {
    token: CancellationToken,
}

impl PlaybackHandle for ClockPlayback {
    fn stop(&mut self) {
        self.token.cancel();
    }
}

impl AudioOutput for ClockOutput {
    fn play(
        &self,
        buffer: PcmBuffer,
        on_end: Box<dyn FnOnce() + Send>,
    ) -> Result<Box<dyn PlaybackHandle>, AudioError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AudioError::Output(format!("no async runtime: {e}")))?;
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let duration = buffer.duration();
        runtime.spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(duration) => on_end(),
            }
        });
        Ok(Box::new(ClockPlayback { token }))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Started { index: usize },
    /// The idea was already playing, so the request stopped it.
    Stopped { index: usize },
    Skipped(SkipReason),
}

struct ActivePlayback {
    index: usize,
    token: u64,
    handle: Box<dyn PlaybackHandle>,
}

#[derive(Default)]
struct PlaybackSlot {
    playing: Option<ActivePlayback>,
    next_token: u64,
}

fn lock(slot: &Mutex<PlaybackSlot>) -> MutexGuard<'_, PlaybackSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct PlaybackController {
    studio: Arc<IdeaStudio>,
    output: Arc<dyn AudioOutput>,
    slot: Arc<Mutex<PlaybackSlot>>,
}

impl PlaybackController {
    pub fn new(studio: Arc<IdeaStudio>, output: Arc<dyn AudioOutput>) -> Self {
        Self {
            studio,
            output,
            slot: Arc::new(Mutex::new(PlaybackSlot::default())),
        }
    }

    pub fn currently_playing(&self) -> Option<usize> {
        lock(&self.slot).playing.as_ref().map(|p| p.index)
    }

    /// Stops whatever is playing and reports which idea it was.
    pub fn stop(&self) -> Option<usize> {
        let mut slot = lock(&self.slot);
        slot.playing.take().map(|mut active| {
            active.handle.stop();
            debug!(index = active.index, "pitch stopped");
            active.index
        })
    }

    /// Plays the pitch for `index`, generating it first if needed. Asking for
    /// the idea that is already playing stops it instead.
    pub async fn play_or_toggle(&self, index: usize) -> ServiceResult<PlaybackOutcome> {
        if self.stop() == Some(index) {
            return Ok(PlaybackOutcome::Stopped { index });
        }

        let payload = match self.studio.audio_pitch(index).await? {
            Outcome::Done(payload) => payload,
            Outcome::Skipped(reason) => return Ok(PlaybackOutcome::Skipped(reason)),
        };

        let buffer = match decode_base64(&payload)
            .and_then(|bytes| decode_pcm(&bytes, PITCH_SAMPLE_RATE, PITCH_CHANNELS))
        {
            Ok(buffer) => buffer,
            Err(err) => {
                error!(index, error = %err, "failed to decode audio pitch");
                self.studio
                    .report_error("Failed to generate or play the audio pitch.")
                    .await;
                return Err(err.into());
            }
        };

        let mut slot = lock(&self.slot);
        // another request may have started a source while this one generated
        if let Some(mut previous) = slot.playing.take() {
            previous.handle.stop();
        }
        let token = slot.next_token;
        slot.next_token += 1;

        let handle = self
            .output
            .play(buffer, Box::new(end_callback(Arc::downgrade(&self.slot), token)))?;
        slot.playing = Some(ActivePlayback {
            index,
            token,
            handle,
        });
        info!(index, "pitch playing");
        Ok(PlaybackOutcome::Started { index })
    }
}

/// Clears the playing state only if it still belongs to the source that ended.
fn end_callback(slot: Weak<Mutex<PlaybackSlot>>, token: u64) -> impl FnOnce() + Send {
    move || {
        let Some(slot) = slot.upgrade() else {
            return;
        };
        let mut slot = lock(&slot);
        if slot.playing.as_ref().is_some_and(|p| p.token == token) {
            debug!(token, "pitch finished");
            slot.playing = None;
        }
    }
}
