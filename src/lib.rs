//! # SlimProto PCM Player
//!
//! Headless network audio player for Logitech Media Server style servers.
//! The server steers playback over the SlimProto control connection and the
//! player pulls raw PCM over HTTP into a local audio device.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                              MEDIA SERVER                                 │
//! │   ┌──────────────────────────┐             ┌──────────────────────────┐  │
//! │   │  SlimProto  (TCP 3483)   │             │    HTTP stream (PCM)     │  │
//! │   └────────────┬─────────────┘             └─────────────┬────────────┘  │
//! └────────────────┼─────────────────────────────────────────┼───────────────┘
//!         strm/audg│  ▲ HELO/STAT/BYE!                       │ GET /stream.pcm
//!                  ▼  │                                      ▼
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                                 PLAYER                                    │
//! │  ┌──────────────────────┐    ┌──────────────────────┐                    │
//! │  │ Client               │───►│ State machine        │                    │
//! │  │ (network::connection)│    │ (player::machine)    │                    │
//! │  │ reconnect, timeouts  │    │ s t p u q f a        │                    │
//! │  └──────────────────────┘    └──────────┬───────────┘                    │
//! │             ▲ STAT                      │ spawn / pause / resume         │
//! │  ┌──────────┴───────────┐    ┌──────────▼───────────┐                    │
//! │  │ Status reporter      │◄───│ Stream pump          │                    │
//! │  │ (player::status)     │    │ (player::pump)       │                    │
//! │  └──────────────────────┘    └──────────┬───────────┘                    │
//! │                                         │ StreamBuffer (audio::buffer)   │
//! │                              ┌──────────▼───────────┐                    │
//! │                              │ AudioOutput          │                    │
//! │                              │ (audio::output)      │                    │
//! │                              │   cpal  |  null      │                    │
//! │                              └──────────────────────┘                    │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod clock;
pub mod config;
pub mod error;
pub mod network;
pub mod player;
pub mod protocol;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Default SlimProto control port
    pub const DEFAULT_SLIMPROTO_PORT: u16 = 3483;

    /// UDP port used for server discovery
    pub const DISCOVERY_PORT: u16 = 3483;

    /// Device ring buffer size in frames
    pub const DEFAULT_OUTPUT_BUFFER_FRAMES: usize = 8192;

    /// Capacity of the HTTP stream buffer in bytes
    pub const DEFAULT_STREAM_BUFFER_SIZE: usize = 1 << 20;

    /// Frames handed to the device per write
    pub const DEFAULT_CHUNK_FRAMES: usize = 1024;

    /// Sample rate advertised when the device cannot be probed
    pub const FALLBACK_MAX_SAMPLE_RATE: u32 = 48_000;

    /// Back-off after the device accepted nothing
    pub const DEVICE_RETRY_INTERVAL: Duration = Duration::from_millis(5);

    /// Poll interval while waiting for a scheduled unpause
    pub const UNPAUSE_POLL_INTERVAL: Duration = Duration::from_millis(1);

    /// Poll interval while queued audio plays out before a seamless reconfigure
    pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);
}
