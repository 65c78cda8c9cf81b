//! Stream pump
//!
//! One pump task per stream: it pulls PCM from the HTTP body into the
//! read-ahead buffer and pushes whole chunks of frames into the device,
//! parking while the session is paused.
//!
//! ```text
//!   HTTP body ──read──► StreamBuffer ──chunk──► AudioOutput
//!                            ▲                      │ partial accept
//!                            └──────── unread ──────┘
//! ```

use std::net::IpAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::audio::PcmFormat;
use crate::constants::{DEVICE_RETRY_INTERVAL, DRAIN_POLL_INTERVAL};
use crate::error::AudioError;
use crate::network::http::{open_stream, StreamRequest};
use crate::player::{PlaybackState, Player};
use crate::protocol::StatusEvent;

/// Everything a pump needs to know about its stream
#[derive(Debug, Clone)]
pub struct StreamSession {
    pub request: StreamRequest,
    pub host: IpAddr,
    pub port: u16,
    pub format: PcmFormat,
    /// Reconfigure by draining instead of dropping queued audio
    pub seamless: bool,
    pub generation: u64,
}

/// Why a pump stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// Body fully played
    Finished,
    /// Session stopped by the server
    Stopped,
    /// A newer stream took over
    Superseded,
    /// Device refused the stream format
    Unsupported,
    /// Device failed and was reopened
    DeviceFailed,
    /// Reading the body failed
    SourceFailed,
    /// Request failed or was not answered with 200
    NotOpened,
}

/// Fetch the stream and play it to the end
pub async fn run(player: Arc<Player>, session: StreamSession) -> PumpExit {
    let body = match open_stream(&player.http, &session.request, session.host, session.port).await {
        Ok(Some(body)) => body,
        Ok(None) => return PumpExit::NotOpened,
        Err(e) => {
            warn!("Stream request failed: {}", e);
            return PumpExit::NotOpened;
        }
    };

    // the session may have moved on while the request was in flight
    if let Some(exit) = interrupted(&player, session.generation) {
        info!("Stream {} dropped before playback: {:?}", session.request.path, exit);
        return exit;
    }

    let exit = stream_body(&player, &session, body).await;
    info!("Stream {} ended: {:?}", session.request.path, exit);
    exit
}

/// Play an already opened stream body
pub async fn stream_body<R>(player: &Arc<Player>, session: &StreamSession, body: R) -> PumpExit
where
    R: AsyncRead + Unpin,
{
    // a stale pump must not report or touch the live session's state
    if let Some(exit) = interrupted(player, session.generation) {
        return exit;
    }
    player.with_output(|o| o.reset_frames_written());
    player.begin_stream(session.generation);
    player.report_or_log(StatusEvent::Established).await;

    let chunk_len = session.format.frame_bytes() * player.config.chunk_frames;
    if let Some(exit) = interrupted(player, session.generation) {
        player.end_stream(session.generation);
        return exit;
    }
    player.report_or_log(StatusEvent::BufferThreshold).await;

    let exit = pump_loop(player, session, body, chunk_len).await;
    player.end_stream(session.generation);
    exit
}

async fn pump_loop<R>(
    player: &Arc<Player>,
    session: &StreamSession,
    mut body: R,
    chunk_len: usize,
) -> PumpExit
where
    R: AsyncRead + Unpin,
{
    let frame_bytes = session.format.frame_bytes();
    let mut incoming = vec![0u8; chunk_len];
    let mut chunk = vec![0u8; chunk_len];
    let mut new_track = true;
    let mut eof = false;

    loop {
        // read ahead while there is room; only wait on the body when less
        // than a chunk is buffered
        if !eof {
            let (buffered, free) = {
                let buffer = player.buffer.lock();
                (buffer.len(), buffer.free())
            };
            let room = free.min(chunk_len);
            if room > 0 {
                let read = if buffered < chunk_len {
                    Some(body.read(&mut incoming[..room]).await)
                } else {
                    body.read(&mut incoming[..room]).now_or_never()
                };
                match read {
                    None => {}
                    Some(Ok(0)) => {
                        debug!("Stream body complete");
                        eof = true;
                    }
                    Some(Ok(n)) => {
                        // the session may have moved on while the read was pending
                        if let Some(exit) = interrupted(player, session.generation) {
                            return exit;
                        }
                        player.buffer.lock().write(&incoming[..n]);
                        player.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                    }
                    Some(Err(e)) => {
                        warn!("Stream read failed: {}", e);
                        return PumpExit::SourceFailed;
                    }
                }
            }
        }

        if let Some(exit) = wait_while_paused(player, session.generation).await {
            return exit;
        }

        let taken = player.buffer.lock().read(&mut chunk);
        if taken < frame_bytes {
            if eof {
                return finish(player).await;
            }
            player.buffer.lock().unread(taken);
            continue;
        }

        let configured = player.with_output(|o| o.is_configured_for(&session.format));
        if new_track || !configured {
            if session.seamless && !configured {
                if let Some(exit) = settle_queued(player, session).await {
                    return exit;
                }
            }
            if let Err(e) = prepare_output(player, session) {
                warn!("Cannot play {}: {}", session.format, e);
                return unsupported(player).await;
            }
            if new_track {
                player.report_or_log(StatusEvent::TrackStarted).await;
                new_track = false;
            }
        }

        match player.with_output(|o| o.write(&chunk[..taken])) {
            Ok(accepted) => {
                if accepted < taken {
                    player.buffer.lock().unread(taken - accepted);
                }
                if accepted == 0 {
                    tokio::time::sleep(DEVICE_RETRY_INTERVAL).await;
                }
            }
            Err(AudioError::NotConfigured) => {
                // flushed after setup; the next pass renegotiates the device
                debug!("Output format reset mid-stream");
                player.buffer.lock().unread(taken);
            }
            Err(e) if e.is_format_error() => {
                warn!("Device rejected stream: {}", e);
                return unsupported(player).await;
            }
            Err(e) => {
                error!("Output write failed: {}", e);
                if let Err(e) = player.with_output(|o| o.reopen()) {
                    error!("Failed to reopen output: {}", e);
                }
                return PumpExit::DeviceFailed;
            }
        }

        tokio::task::yield_now().await;
    }
}

fn interrupted(player: &Player, generation: u64) -> Option<PumpExit> {
    if !player.is_current(generation) {
        Some(PumpExit::Superseded)
    } else if player.state().is_stopped() {
        Some(PumpExit::Stopped)
    } else {
        None
    }
}

/// Park while the session is paused; returns the exit reason once the pump
/// must stop
async fn wait_while_paused(player: &Player, generation: u64) -> Option<PumpExit> {
    loop {
        if !player.is_current(generation) {
            return Some(PumpExit::Superseded);
        }

        let parked = {
            let mut state = player.state.write();
            match *state {
                PlaybackState::Stopped => return Some(PumpExit::Stopped),
                PlaybackState::Pause | PlaybackState::Paused => {
                    *state = PlaybackState::Paused;
                    player.parked.store(true, Ordering::Release);
                    true
                }
                PlaybackState::Play | PlaybackState::Playing => false,
            }
        };
        if !parked {
            return None;
        }

        debug!("Stream parked");
        player.resume.notified().await;
    }
}

/// Wait for the previous track's queued audio to play out.
///
/// The output lock is only taken to sample the device delay. Gives up after
/// twice the queued duration so a stalled device cannot hold the stream.
async fn settle_queued(player: &Player, session: &StreamSession) -> Option<PumpExit> {
    let (queued, rate) = player.with_output(|o| match o.format() {
        Some(format) => (o.delay().unwrap_or(0), format.sample_rate),
        None => (0, session.format.sample_rate),
    });
    if queued == 0 {
        return None;
    }

    let budget = Duration::from_millis(queued * 2000 / rate.max(1) as u64 + 100);
    let deadline = Instant::now() + budget;
    debug!("Draining {} queued frames before reconfiguring", queued);

    loop {
        if let Some(exit) = interrupted(player, session.generation) {
            return Some(exit);
        }
        match player.with_output(|o| o.delay()) {
            Ok(0) => return None,
            Ok(left) if Instant::now() >= deadline => {
                warn!("Output still holds {} frames, reconfiguring anyway", left);
                return None;
            }
            Ok(_) => tokio::time::sleep(DRAIN_POLL_INTERVAL).await,
            Err(e) => {
                warn!("Failed to settle output before reconfiguring: {}", e);
                return None;
            }
        }
    }
}

/// Negotiate the device for this stream
fn prepare_output(player: &Player, session: &StreamSession) -> Result<(), AudioError> {
    player.with_output(|output| {
        if output.is_configured_for(&session.format) {
            return Ok(());
        }

        if !session.seamless {
            if let Err(e) = output.drop_pending() {
                warn!("Failed to drop output before reconfiguring: {}", e);
            }
        }

        output.configure(&session.format)?;
        if let Err(e) = output.drain() {
            warn!("Failed to drain output: {}", e);
        }
        Ok(())
    })
}

async fn unsupported(player: &Player) -> PumpExit {
    player.report_or_log(StatusEvent::NotSupported).await;
    player.set_state(PlaybackState::Stopped);
    player.with_output(|o| o.reset_format());
    PumpExit::Unsupported
}

async fn finish(player: &Player) -> PumpExit {
    player.report_or_log(StatusEvent::DecoderReady).await;
    player.set_state(PlaybackState::Stopped);
    player.report_or_log(StatusEvent::Underrun).await;
    PumpExit::Finished
}

impl Player {
    fn begin_stream(&self, generation: u64) {
        self.buffer.lock().reset();
        self.buffer_opened.store(true, Ordering::Release);
        self.bytes_received.store(0, Ordering::Relaxed);
        self.active_pump.store(generation, Ordering::Release);
    }

    fn end_stream(&self, generation: u64) {
        if let Err(current) =
            self.active_pump
                .compare_exchange(generation, 0, Ordering::AcqRel, Ordering::Acquire)
        {
            debug!("Stream {} ended after stream {} took over", generation, current);
        }
    }
}
