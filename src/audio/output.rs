//! Audio device adapter
//!
//! Wraps a [`PcmBackend`] with the semantics the player relies on: it tracks
//! the negotiated format (cleared to "unknown" by a stop or flush), counts the
//! frames handed to the hardware for elapsed-time reporting, and recovers once
//! from an underrun before giving up on a write.

use crate::audio::backend::PcmBackend;
use crate::audio::format::PcmFormat;
use crate::error::AudioError;

/// Output device together with its current configuration
pub struct AudioOutput {
    backend: Box<dyn PcmBackend>,
    device_name: String,
    format: Option<PcmFormat>,
    frames_written: u64,
}

impl AudioOutput {
    /// Open `device_name` on `backend`
    pub fn open(mut backend: Box<dyn PcmBackend>, device_name: &str) -> Result<Self, AudioError> {
        backend.open(device_name)?;
        tracing::info!("Output device {} opened", device_name);

        Ok(Self {
            backend,
            device_name: device_name.to_string(),
            format: None,
            frames_written: 0,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Currently applied format, `None` when unknown
    pub fn format(&self) -> Option<PcmFormat> {
        self.format
    }

    /// Applied sample rate, 0 when unknown
    pub fn sample_rate(&self) -> u32 {
        self.format.map(|f| f.sample_rate).unwrap_or(0)
    }

    pub fn is_configured_for(&self, format: &PcmFormat) -> bool {
        self.format.as_ref() == Some(format)
    }

    /// Apply hardware parameters for `format`
    pub fn configure(&mut self, format: &PcmFormat) -> Result<(), AudioError> {
        self.format = None;
        self.backend.apply_params(format)?;
        self.format = Some(*format);
        tracing::info!("Output {} set to {}", self.device_name, format);
        Ok(())
    }

    /// Forget the applied format so the next stream renegotiates
    pub fn reset_format(&mut self) {
        self.format = None;
    }

    /// Write interleaved PCM, returning the number of bytes accepted.
    ///
    /// Only whole frames are consumed. An underrun is recovered by preparing
    /// the device and retrying exactly once.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, AudioError> {
        let format = self.format.ok_or(AudioError::NotConfigured)?;
        let frame_bytes = format.frame_bytes();
        let whole = data.len() - data.len() % frame_bytes;
        if whole == 0 {
            return Ok(0);
        }

        let frames = match self.backend.write(&data[..whole]) {
            Err(AudioError::Underrun) => {
                tracing::warn!("Underrun on {}, preparing device", self.device_name);
                self.backend.prepare()?;
                self.backend.write(&data[..whole]).map_err(|e| match e {
                    AudioError::Underrun => AudioError::Write("underrun persisted after prepare".into()),
                    other => other,
                })?
            }
            result => result?,
        };

        self.frames_written += frames as u64;
        Ok(frames * frame_bytes)
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn reset_frames_written(&mut self) {
        self.frames_written = 0;
    }

    pub fn pause(&mut self) -> Result<(), AudioError> {
        self.backend.pause()
    }

    pub fn unpause(&mut self) -> Result<(), AudioError> {
        self.backend.unpause()
    }

    /// Discard queued audio
    pub fn drop_pending(&mut self) -> Result<(), AudioError> {
        self.backend.drop_pending()
    }

    /// Wait for queued audio to finish playing
    pub fn drain(&mut self) -> Result<(), AudioError> {
        self.backend.drain()
    }

    /// Output latency in frames
    pub fn delay(&mut self) -> Result<u64, AudioError> {
        self.backend.delay()
    }

    /// Skip up to `frames`, limited to what the device can safely forward
    pub fn skip_frames(&mut self, frames: u64) -> Result<u64, AudioError> {
        let forwardable = self.backend.forwardable()?;
        let frames = frames.min(forwardable);
        if frames == 0 {
            return Ok(0);
        }
        self.backend.forward(frames)
    }

    pub fn max_sample_rate(&mut self) -> Result<u32, AudioError> {
        self.backend.max_sample_rate()
    }

    pub fn set_gain(&mut self, left: f32, right: f32) {
        self.backend.set_gain(left, right);
    }

    /// Close and open the device again from scratch
    pub fn reopen(&mut self) -> Result<(), AudioError> {
        self.backend.close();
        self.format = None;
        self.backend.open(&self.device_name)?;
        tracing::info!("Output device {} reopened", self.device_name);
        Ok(())
    }

    pub fn close(&mut self) {
        self.backend.close();
        self.format = None;
        tracing::info!("Output device {} closed", self.device_name);
    }
}
