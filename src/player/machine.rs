//! Control frame handling
//!
//! Applies `strm` and `audg` frames from the server to the session and
//! answers with the matching status event.

use bytes::Bytes;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::constants::UNPAUSE_POLL_INTERVAL;
use crate::error::ProtocolError;
use crate::network::http::StreamRequest;
use crate::player::pump::{self, StreamSession};
use crate::player::{PlaybackState, Player};
use crate::protocol::frames::{AudioGain, FORMAT_PCM};
use crate::protocol::{ServerFrame, StatusEvent, Strm, StrmCommand};

impl Player {
    /// Apply one frame from the server
    pub async fn handle_frame(self: &Arc<Self>, frame: ServerFrame) -> Result<(), ProtocolError> {
        match frame {
            ServerFrame::Strm(strm) => self.handle_strm(strm).await,
            ServerFrame::Audg(gain) => {
                self.apply_gain(&gain);
                Ok(())
            }
            ServerFrame::Ignored { tag, len } => {
                debug!("Ignoring {} frame ({} bytes)", String::from_utf8_lossy(&tag), len);
                Ok(())
            }
        }
    }

    async fn handle_strm(self: &Arc<Self>, strm: Strm) -> Result<(), ProtocolError> {
        debug!(
            "strm {:?} format={:?} flags={:#04x}",
            strm.command, strm.format as char, strm.flags
        );

        match strm.command {
            StrmCommand::Status => {
                self.report_with_timestamp(StatusEvent::Timer, strm.replay_gain)
                    .await?
            }
            StrmCommand::Start => {
                let state = self.state();
                if state.is_paused() {
                    debug!("Start acknowledged while {}", state);
                } else {
                    self.set_state(PlaybackState::Play);
                }
                self.report(StatusEvent::Connect).await?;
            }
            StrmCommand::Pause => self.pause(strm.replay_gain).await?,
            StrmCommand::Unpause => self.unpause(strm.replay_gain).await?,
            StrmCommand::Stop => {
                self.flush_output();
                self.set_state(PlaybackState::Stopped);
                self.wake_pump();
                self.report(StatusEvent::Flushed).await?;
            }
            StrmCommand::Flush => {
                self.flush_output();
                self.report(StatusEvent::Flushed).await?;
            }
            StrmCommand::Skip => self.skip_ahead(strm.replay_gain),
            StrmCommand::Unknown(code) => {
                debug!("Unhandled strm command {:?}", code as char);
            }
        }

        if let Some(header) = &strm.http_header {
            self.start_stream(&strm, header).await?;
        }
        Ok(())
    }

    async fn pause(&self, interval_ms: u32) -> Result<(), ProtocolError> {
        if let Err(e) = self.with_output(|o| o.pause()) {
            warn!("Failed to pause output: {}", e);
        }

        // a stopped session stays stopped
        let stopped = self.state().is_stopped();

        if interval_ms == 0 {
            if !stopped {
                let next = if self.pump_running() {
                    PlaybackState::Pause
                } else {
                    PlaybackState::Paused
                };
                self.set_state(next);
            }
            return self.report(StatusEvent::Paused).await;
        }

        // pause for an interval, then carry on without telling the server
        if !stopped {
            self.set_state(PlaybackState::Paused);
        }
        info!("Pausing for {} ms", interval_ms);
        tokio::time::sleep(Duration::from_millis(interval_ms as u64)).await;

        if let Err(e) = self.with_output(|o| o.unpause()) {
            warn!("Failed to unpause output: {}", e);
        }
        if !stopped && self.state().is_paused() {
            self.set_state(PlaybackState::Playing);
        }
        self.wake_pump();
        Ok(())
    }

    async fn unpause(&self, at_jiffies: u32) -> Result<(), ProtocolError> {
        let state = self.state();
        if !state.is_paused() {
            debug!("Unpause ignored while {}", state);
            return Ok(());
        }

        if at_jiffies != 0 {
            while self.clock().jiffies() < at_jiffies {
                tokio::time::sleep(UNPAUSE_POLL_INTERVAL).await;
            }
        }

        if let Err(e) = self.with_output(|o| o.unpause()) {
            warn!("Failed to unpause output: {}", e);
        }
        self.set_state(PlaybackState::Playing);
        self.wake_pump();
        self.report(StatusEvent::Resumed).await
    }

    fn skip_ahead(&self, ms: u32) {
        let skipped = self.with_output(|output| {
            let frames = ms as u64 * output.sample_rate() as u64 / 1000;
            output.skip_frames(frames)
        });
        match skipped {
            Ok(frames) => debug!("Skipped {} frames ({} ms requested)", frames, ms),
            Err(e) => warn!("Failed to skip ahead: {}", e),
        }
    }

    fn apply_gain(&self, gain: &AudioGain) {
        let (left, right) = gain.linear();
        debug!("Output gain {:.3}/{:.3}", left, right);
        self.with_output(|o| o.set_gain(left, right));
    }

    async fn start_stream(self: &Arc<Self>, strm: &Strm, header: &Bytes) -> Result<(), ProtocolError> {
        let format = match strm.pcm_format() {
            Some(format) if strm.format == FORMAT_PCM => format,
            _ => {
                warn!(
                    "Unsupported stream format {:?} ({:?}/{:?}/{:?}/{:?})",
                    strm.format as char,
                    strm.pcm_sample_size as char,
                    strm.pcm_sample_rate as char,
                    strm.pcm_channels as char,
                    strm.pcm_endian as char
                );
                return self.report(StatusEvent::NotSupported).await;
            }
        };

        let request = match StreamRequest::parse(header) {
            Ok(request) => request,
            Err(e) => {
                warn!("Cannot start stream: {}", e);
                return self.report(StatusEvent::NotSupported).await;
            }
        };

        let host = if strm.server_ip.is_unspecified() {
            self.server_ip()
        } else {
            IpAddr::V4(strm.server_ip)
        };

        let session = StreamSession {
            request,
            host,
            port: strm.server_port,
            format,
            seamless: strm.is_seamless(),
            generation: self.next_generation(),
        };
        // a parked pump from the previous stream has to notice it is stale
        self.wake_pump();

        info!(
            "Starting stream {}:{}{} as {}",
            session.host, session.port, session.request.path, session.format
        );
        self.report(StatusEvent::Headers).await?;
        self.set_state(PlaybackState::Playing);

        let player = Arc::clone(self);
        tokio::spawn(async move {
            pump::run(player, session).await;
        });
        Ok(())
    }
}
