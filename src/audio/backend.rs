//! Raw PCM output driver interface
//!
//! A backend is the thinnest possible wrapper over a host audio API. It knows
//! nothing about tracks or the control protocol; [`crate::audio::AudioOutput`]
//! layers retry and bookkeeping semantics on top of it.

use crate::audio::format::PcmFormat;
use crate::error::AudioError;

/// Operations of a hardware PCM playback device.
///
/// Frame counts are in frames of the currently applied format.
pub trait PcmBackend: Send {
    /// Open the named device for playback.
    ///
    /// Writes never block: a full device accepts fewer frames.
    fn open(&mut self, device: &str) -> Result<(), AudioError>;

    /// Negotiate hardware parameters for `format`
    fn apply_params(&mut self, format: &PcmFormat) -> Result<(), AudioError>;

    /// Recover the device after an underrun
    fn prepare(&mut self) -> Result<(), AudioError>;

    /// Queue interleaved frames, returning how many frames were accepted.
    ///
    /// `data` holds whole frames of the applied format. An underrun is
    /// reported as [`AudioError::Underrun`] and cleared by [`PcmBackend::prepare`].
    fn write(&mut self, data: &[u8]) -> Result<usize, AudioError>;

    fn pause(&mut self) -> Result<(), AudioError>;

    fn unpause(&mut self) -> Result<(), AudioError>;

    /// Discard queued audio immediately
    fn drop_pending(&mut self) -> Result<(), AudioError>;

    /// Block until queued audio has been played
    fn drain(&mut self) -> Result<(), AudioError>;

    /// Frames queued between the application and the speaker
    fn delay(&mut self) -> Result<u64, AudioError>;

    /// Frames that can safely be skipped without underrunning
    fn forwardable(&mut self) -> Result<u64, AudioError>;

    /// Advance the playback pointer, returning the frames actually skipped
    fn forward(&mut self, frames: u64) -> Result<u64, AudioError>;

    /// Highest sample rate the hardware supports
    fn max_sample_rate(&mut self) -> Result<u32, AudioError>;

    /// Set software gain per channel side (1.0 = unity)
    fn set_gain(&mut self, left: f32, right: f32);

    fn close(&mut self);
}
