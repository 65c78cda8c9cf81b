//! Error types for the player

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Hardware parameter negotiation step that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwParamStage {
    Malloc,
    Init,
    Access,
    Format,
    Rate,
    Channels,
    Commit,
}

impl fmt::Display for HwParamStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HwParamStage::Malloc => "allocate parameters",
            HwParamStage::Init => "initialize parameters",
            HwParamStage::Access => "set access type",
            HwParamStage::Format => "set sample format",
            HwParamStage::Rate => "set sample rate",
            HwParamStage::Channels => "set channel count",
            HwParamStage::Commit => "commit parameters",
        };
        f.write_str(name)
    }
}

/// Audio device errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Cannot open audio device '{device}': {reason}")]
    DeviceOpen { device: String, reason: String },

    #[error("Cannot {stage}: {reason}")]
    HardwareParams { stage: HwParamStage, reason: String },

    #[error("Buffer underrun")]
    Underrun,

    #[error("Write failed: {0}")]
    Write(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Device is not open")]
    NotOpen,

    #[error("Device has no hardware parameters applied")]
    NotConfigured,

    #[error("{op} failed: {reason}")]
    Device { op: &'static str, reason: String },
}

impl AudioError {
    /// Errors that make the current track unplayable on this device,
    /// as opposed to transient device failures.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            AudioError::HardwareParams { .. }
                | AudioError::UnsupportedFormat(_)
                | AudioError::NotConfigured
        )
    }

    pub(crate) fn device(op: &'static str, reason: impl ToString) -> Self {
        AudioError::Device {
            op,
            reason: reason.to_string(),
        }
    }
}

/// Framing errors on the control connection
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Connection closed")]
    Closed,

    #[error("Short frame: expected {expected} bytes, got {actual}")]
    Short { expected: usize, actual: usize },

    #[error("Invalid frame length: {0}")]
    InvalidLength(u16),

    #[error("Unknown status event {0:?}")]
    UnknownEvent(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Control protocol errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("Capability string has unsupported length {0}, expected 58 or 59")]
    UnsupportedCapabilityLength(usize),

    #[error("No frame received within {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Discovery failed: {0}")]
    Discovery(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid request header: {0}")]
    InvalidRequestHeader(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
