//! Playback session
//!
//! [`Player`] is the context shared by the control connection and the stream
//! pump: playback state, the output device, the read-ahead buffer and the
//! status reporter. Locks are `parking_lot` and are never held across an
//! await point; the pump parks on a [`Notify`] while paused.

pub mod machine;
pub mod pump;
pub mod state;
pub mod status;

use parking_lot::{Mutex, RwLock};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::audio::{AudioOutput, StreamBuffer};
use crate::clock::Clock;
use crate::config::StreamConfig;

pub use pump::{PumpExit, StreamSession};
pub use state::PlaybackState;
pub use status::{elapsed, Elapsed, StatusSender};

/// Shared playback context
pub struct Player {
    config: StreamConfig,
    clock: Clock,
    state: RwLock<PlaybackState>,
    output: Mutex<AudioOutput>,
    buffer: Mutex<StreamBuffer>,
    buffer_opened: AtomicBool,
    bytes_received: AtomicU64,
    /// Bumped for every stream launch; a pump whose generation is stale exits
    generation: AtomicU64,
    /// Generation of the pump currently running, 0 when idle
    active_pump: AtomicU64,
    resume: Notify,
    /// Set by the pump, under the state lock, when it commits to parking
    parked: AtomicBool,
    status: StatusSender,
    server_ip: RwLock<IpAddr>,
    http: reqwest::Client,
}

impl Player {
    pub fn new(output: AudioOutput, config: StreamConfig) -> Arc<Self> {
        let buffer = StreamBuffer::new(config.buffer_size);
        Arc::new(Self {
            config,
            clock: Clock::new(),
            state: RwLock::new(PlaybackState::Stopped),
            output: Mutex::new(output),
            buffer: Mutex::new(buffer),
            buffer_opened: AtomicBool::new(false),
            bytes_received: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            active_pump: AtomicU64::new(0),
            resume: Notify::new(),
            parked: AtomicBool::new(false),
            status: StatusSender::new(),
            server_ip: RwLock::new(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            http: reqwest::Client::new(),
        })
    }

    pub fn state(&self) -> PlaybackState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, next: PlaybackState) {
        let mut state = self.state.write();
        if *state != next {
            debug!("Playback state {} -> {}", *state, next);
            *state = next;
        }
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn status(&self) -> &StatusSender {
        &self.status
    }

    pub fn stream_config(&self) -> &StreamConfig {
        &self.config
    }

    /// Control server address, the default host for streams
    pub fn server_ip(&self) -> IpAddr {
        *self.server_ip.read()
    }

    pub fn set_server_ip(&self, ip: IpAddr) {
        *self.server_ip.write() = ip;
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Whether a pump is currently attached to the session
    pub fn pump_running(&self) -> bool {
        self.active_pump.load(Ordering::Acquire) != 0
    }

    /// Run `f` with exclusive access to the output device
    pub fn with_output<R>(&self, f: impl FnOnce(&mut AudioOutput) -> R) -> R {
        f(&mut self.output.lock())
    }

    /// Buffer `(capacity, fill)` in bytes, zero until a stream opened it
    pub fn buffer_usage(&self) -> (usize, usize) {
        if !self.buffer_opened.load(Ordering::Acquire) {
            return (0, 0);
        }
        let buffer = self.buffer.lock();
        (buffer.capacity(), buffer.len())
    }

    /// Drop everything queued on the device and in the stream buffer
    pub(crate) fn flush_output(&self) {
        {
            let mut output = self.output.lock();
            if let Err(e) = output.drop_pending() {
                warn!("Failed to drop pending output: {}", e);
            }
            output.reset_format();
        }
        self.buffer.lock().reset();
    }

    /// Release a pump parked on pause; a no-op when none is parked
    pub(crate) fn wake_pump(&self) {
        if self.parked.swap(false, Ordering::AcqRel) {
            self.resume.notify_one();
        }
    }

    /// Invalidate running pumps and claim a generation for a new one
    pub(crate) fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    /// Tear down playback after the control connection was lost
    pub fn reset_after_disconnect(&self) {
        self.flush_output();
        self.set_state(PlaybackState::Stopped);
        self.next_generation();
        self.wake_pump();
    }

    /// Close the output device for good
    pub fn shutdown(&self) {
        self.set_state(PlaybackState::Stopped);
        self.next_generation();
        self.wake_pump();
        self.output.lock().close();
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::audio::{NullBackend, NullHandle};

    /// Player over the null driver, with a small buffer for quick tests
    pub fn null_player(buffer_size: usize, chunk_frames: usize) -> (Arc<Player>, NullHandle) {
        let backend = NullBackend::new();
        let handle = backend.handle();
        let output = AudioOutput::open(Box::new(backend), "null").expect("open null device");
        let player = Player::new(
            output,
            StreamConfig {
                buffer_size,
                chunk_frames,
            },
        );
        (player, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::null_player;
    use super::*;
    use crate::audio::PcmFormat;

    #[test]
    fn test_buffer_usage_zero_until_opened() {
        let (player, _) = null_player(4096, 16);
        player.buffer.lock().write(&[0u8; 100]);
        assert_eq!(player.buffer_usage(), (0, 0));

        player.buffer_opened.store(true, Ordering::Release);
        assert_eq!(player.buffer_usage(), (4096, 100));
    }

    #[test]
    fn test_flush_resets_format_and_buffer() {
        let (player, handle) = null_player(4096, 16);
        let format = PcmFormat::from_strm_codes(b'1', b'3', b'2', b'1').unwrap();
        player.with_output(|o| o.configure(&format)).unwrap();
        player.buffer.lock().write(&[1u8; 64]);

        player.flush_output();

        assert_eq!(player.with_output(|o| o.format()), None);
        assert!(player.buffer.lock().is_empty());
        assert_eq!(handle.stats().drops, 1);
    }

    #[test]
    fn test_disconnect_stops_and_invalidates_pump() {
        let (player, _) = null_player(4096, 16);
        let generation = player.next_generation();
        player.set_state(PlaybackState::Playing);

        player.reset_after_disconnect();

        assert_eq!(player.state(), PlaybackState::Stopped);
        assert!(!player.is_current(generation));
    }
}
