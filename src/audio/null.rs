//! Null output driver
//!
//! Swallows audio without touching any hardware. Selected with the output
//! device name `null` for headless runs, and shared with the test-suite which
//! uses [`NullHandle`] to observe calls and inject device faults.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::audio::backend::PcmBackend;
use crate::audio::format::PcmFormat;
use crate::error::{AudioError, HwParamStage};

/// Device name that selects the null driver
pub const NULL_DEVICE: &str = "null";

/// Everything the null driver has been asked to do
#[derive(Debug, Clone, Default)]
pub struct NullStats {
    pub opens: usize,
    pub closes: usize,
    pub drops: usize,
    pub drains: usize,
    pub prepares: usize,
    pub writes: usize,
    pub bytes_written: usize,
    pub frames_forwarded: u64,
    pub paused: bool,
    pub format: Option<PcmFormat>,
    pub gain: (f32, f32),
    pub is_open: bool,
}

/// Fault injection knobs
#[derive(Debug, Clone)]
pub struct NullFaults {
    /// Maximum frames accepted per write
    pub accept_limit: Option<usize>,
    /// Reported output latency in frames
    pub delay_frames: u64,
    /// Reported hardware rate ceiling
    pub max_rate: u32,
    /// Report an underrun on the next write
    pub underrun_next: bool,
    /// Reject parameter negotiation at this stage
    pub reject_params: Option<HwParamStage>,
    /// Fail every write with a non-recoverable error
    pub fail_writes: bool,
}

impl Default for NullFaults {
    fn default() -> Self {
        Self {
            accept_limit: None,
            delay_frames: 0,
            max_rate: 192_000,
            underrun_next: false,
            reject_params: None,
            fail_writes: false,
        }
    }
}

#[derive(Debug, Default)]
struct NullShared {
    stats: NullStats,
    faults: NullFaults,
}

/// Observer and controller for a [`NullBackend`]
#[derive(Clone, Default)]
pub struct NullHandle {
    shared: Arc<Mutex<NullShared>>,
}

impl NullHandle {
    pub fn stats(&self) -> NullStats {
        self.shared.lock().stats.clone()
    }

    pub fn update_faults(&self, f: impl FnOnce(&mut NullFaults)) {
        f(&mut self.shared.lock().faults);
    }
}

/// Output driver that discards audio
pub struct NullBackend {
    shared: Arc<Mutex<NullShared>>,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::with_handle(NullHandle::default())
    }

    pub fn with_handle(handle: NullHandle) -> Self {
        Self {
            shared: handle.shared,
        }
    }

    pub fn handle(&self) -> NullHandle {
        NullHandle {
            shared: self.shared.clone(),
        }
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PcmBackend for NullBackend {
    fn open(&mut self, _device: &str) -> Result<(), AudioError> {
        let mut shared = self.shared.lock();
        shared.stats.opens += 1;
        shared.stats.is_open = true;
        shared.stats.format = None;
        Ok(())
    }

    fn apply_params(&mut self, format: &PcmFormat) -> Result<(), AudioError> {
        let mut shared = self.shared.lock();
        if !shared.stats.is_open {
            return Err(AudioError::NotOpen);
        }
        if let Some(stage) = shared.faults.reject_params {
            return Err(AudioError::HardwareParams {
                stage,
                reason: format!("{} rejected", format),
            });
        }
        shared.stats.format = Some(*format);
        Ok(())
    }

    fn prepare(&mut self) -> Result<(), AudioError> {
        self.shared.lock().stats.prepares += 1;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, AudioError> {
        let mut shared = self.shared.lock();
        let format = shared.stats.format.ok_or(AudioError::NotConfigured)?;
        if shared.faults.fail_writes {
            return Err(AudioError::Write("injected failure".into()));
        }
        if shared.faults.underrun_next {
            shared.faults.underrun_next = false;
            return Err(AudioError::Underrun);
        }

        let mut frames = data.len() / format.frame_bytes();
        if let Some(limit) = shared.faults.accept_limit {
            frames = frames.min(limit);
        }
        shared.stats.writes += 1;
        shared.stats.bytes_written += frames * format.frame_bytes();
        Ok(frames)
    }

    fn pause(&mut self) -> Result<(), AudioError> {
        self.shared.lock().stats.paused = true;
        Ok(())
    }

    fn unpause(&mut self) -> Result<(), AudioError> {
        self.shared.lock().stats.paused = false;
        Ok(())
    }

    fn drop_pending(&mut self) -> Result<(), AudioError> {
        self.shared.lock().stats.drops += 1;
        Ok(())
    }

    fn drain(&mut self) -> Result<(), AudioError> {
        self.shared.lock().stats.drains += 1;
        Ok(())
    }

    fn delay(&mut self) -> Result<u64, AudioError> {
        Ok(self.shared.lock().faults.delay_frames)
    }

    fn forwardable(&mut self) -> Result<u64, AudioError> {
        Ok(self.shared.lock().faults.delay_frames)
    }

    fn forward(&mut self, frames: u64) -> Result<u64, AudioError> {
        let mut shared = self.shared.lock();
        let frames = frames.min(shared.faults.delay_frames);
        shared.faults.delay_frames -= frames;
        shared.stats.frames_forwarded += frames;
        Ok(frames)
    }

    fn max_sample_rate(&mut self) -> Result<u32, AudioError> {
        Ok(self.shared.lock().faults.max_rate)
    }

    fn set_gain(&mut self, left: f32, right: f32) {
        self.shared.lock().stats.gain = (left, right);
    }

    fn close(&mut self) {
        let mut shared = self.shared.lock();
        shared.stats.closes += 1;
        shared.stats.is_open = false;
        shared.stats.format = None;
    }
}
