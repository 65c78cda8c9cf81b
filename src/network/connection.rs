//! Control connection
//!
//! Connects to the server, introduces the player with `HELO` and feeds every
//! frame to the [`Player`]. Whenever the connection breaks or goes quiet
//! for longer than the read timeout the session is torn down and the client
//! reconnects after a short delay.

use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::error::{Error, NetworkError, ProtocolError};
use crate::player::Player;
use crate::protocol::{read_server_frame, Bye, Helo};

/// Where and how to stay connected
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub server: SocketAddr,
    pub read_timeout: Duration,
    pub reconnect_delay: Duration,
}

/// SlimProto client
pub struct Client {
    player: Arc<Player>,
    config: ConnectionConfig,
    hello: BytesMut,
}

impl Client {
    /// Create a client; fails when the handshake cannot be encoded
    pub fn new(player: Arc<Player>, config: ConnectionConfig, helo: &Helo) -> Result<Self, ProtocolError> {
        let hello = helo.encode()?;
        Ok(Self {
            player,
            config,
            hello,
        })
    }

    pub fn player(&self) -> &Arc<Player> {
        &self.player
    }

    /// Stay connected until the task is dropped
    pub async fn run(&self) {
        loop {
            let reason = self.serve_connection().await;
            warn!("Control connection to {} ended: {}", self.config.server, reason);

            self.player.reset_after_disconnect();
            tokio::time::sleep(self.config.reconnect_delay).await;
        }
    }

    /// One connection lifetime; returns why it ended
    pub async fn serve_connection(&self) -> Error {
        let stream = match TcpStream::connect(self.config.server).await {
            Ok(stream) => stream,
            Err(e) => {
                return NetworkError::ConnectionFailed(format!("{}: {}", self.config.server, e)).into()
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }
        info!("Connected to {}", self.config.server);
        self.player.set_server_ip(self.config.server.ip());

        let (reader, writer) = stream.into_split();
        self.player.status().attach(Box::new(writer)).await;

        let reason = match self.player.status().send(&self.hello).await {
            Ok(()) => {
                debug!("Sent HELO ({} bytes)", self.hello.len());
                self.read_frames(BufReader::new(reader)).await
            }
            Err(e) => e,
        };

        self.player.status().detach().await;
        reason.into()
    }

    async fn read_frames<R>(&self, mut reader: R) -> ProtocolError
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        loop {
            let frame = match tokio::time::timeout(self.config.read_timeout, read_server_frame(&mut reader)).await {
                Ok(Ok(frame)) => frame,
                Ok(Err(e)) => return e.into(),
                Err(_) => return ProtocolError::Timeout(self.config.read_timeout),
            };

            if let Err(e) = self.player.handle_frame(frame).await {
                return e;
            }
        }
    }

    /// Tell the server the player is going away
    pub async fn say_goodbye(&self) -> Result<(), ProtocolError> {
        let bye = Bye { upgrade: false }.encode();
        self.player.status().send(&bye).await?;
        info!("Sent BYE!");
        Ok(())
    }
}
