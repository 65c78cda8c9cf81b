//! Status reporting
//!
//! Every `STAT` frame is a full snapshot of the session: buffer usage, bytes
//! received, elapsed playback time and the player tick counter. Frames are
//! written to whatever control connection is currently attached; with none
//! attached they are dropped.

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::ProtocolError;
use crate::player::Player;
use crate::protocol::frames::{Stat, StatusEvent, STAT_FRAME_LEN};

type StatusWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Playback position split the way `STAT` reports it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Elapsed {
    pub seconds: u32,
    pub millis: u32,
}

/// Elapsed playback time: frames written minus what still sits in the device
pub fn elapsed(frames_written: u64, delay_frames: u64, sample_rate: u32) -> Elapsed {
    if frames_written == 0 || sample_rate == 0 {
        return Elapsed::default();
    }

    let played = frames_written.saturating_sub(delay_frames);
    let total_ms = played * 1000 / sample_rate as u64;
    Elapsed {
        seconds: (total_ms / 1000) as u32,
        millis: (total_ms % 1000) as u32,
    }
}

/// Write half of the control connection, shared by all status producers
pub struct StatusSender {
    writer: tokio::sync::Mutex<Option<StatusWriter>>,
}

impl StatusSender {
    pub fn new() -> Self {
        Self {
            writer: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn attach(&self, writer: StatusWriter) {
        *self.writer.lock().await = Some(writer);
    }

    pub async fn detach(&self) -> Option<StatusWriter> {
        self.writer.lock().await.take()
    }

    pub async fn is_attached(&self) -> bool {
        self.writer.lock().await.is_some()
    }

    /// Write one complete frame
    pub async fn send(&self, frame: &[u8]) -> Result<(), ProtocolError> {
        let mut guard = self.writer.lock().await;
        match guard.as_mut() {
            Some(writer) => {
                writer.write_all(frame).await?;
                writer.flush().await?;
                Ok(())
            }
            None => {
                debug!("No control connection, dropping {} byte frame", frame.len());
                Ok(())
            }
        }
    }
}

impl Default for StatusSender {
    fn default() -> Self {
        Self::new()
    }
}

impl Player {
    /// Build a `STAT` for `event` from the current session
    pub fn snapshot(&self, event: StatusEvent, server_timestamp: u32) -> Stat {
        let position = {
            let mut output = self.output.lock();
            let frames = output.frames_written();
            let rate = output.sample_rate();
            if frames == 0 || rate == 0 {
                Elapsed::default()
            } else {
                match output.delay() {
                    Ok(delay) => elapsed(frames, delay, rate),
                    Err(e) => {
                        debug!("Output delay unavailable: {}", e);
                        Elapsed::default()
                    }
                }
            }
        };
        let (size, fullness) = self.buffer_usage();

        let mut stat = Stat::new(event);
        stat.buffer_size = size as u32;
        stat.buffer_fullness = fullness as u32;
        stat.output_buffer_size = size as u32;
        stat.output_buffer_fullness = fullness as u32;
        stat.bytes_received = self.bytes_received();
        stat.jiffies = self.clock.jiffies();
        stat.elapsed_seconds = position.seconds;
        stat.elapsed_millis = position.millis;
        stat.server_timestamp = server_timestamp;
        stat
    }

    /// Send a status report for `event`
    pub async fn report(&self, event: StatusEvent) -> Result<(), ProtocolError> {
        self.report_with_timestamp(event, 0).await
    }

    pub async fn report_with_timestamp(
        &self,
        event: StatusEvent,
        server_timestamp: u32,
    ) -> Result<(), ProtocolError> {
        let stat = self.snapshot(event, server_timestamp);
        let mut frame = BytesMut::with_capacity(STAT_FRAME_LEN);
        stat.encode(&mut frame);
        self.status.send(&frame).await?;
        debug!(
            "Sent {} (elapsed {}.{:03}s, buffer {}/{})",
            String::from_utf8_lossy(event.code()),
            stat.elapsed_seconds,
            stat.elapsed_millis,
            stat.buffer_fullness,
            stat.buffer_size
        );
        Ok(())
    }

    /// Report from a context that cannot surface the error; the control loop
    /// notices a dead connection on its own
    pub(crate) async fn report_or_log(&self, event: StatusEvent) {
        if let Err(e) = self.report(event).await {
            warn!(
                "Failed to send {}: {}",
                String::from_utf8_lossy(event.code()),
                e
            );
        }
    }
}
