//! Server discovery
//!
//! Broadcasts `eNAME\0JSON\0` to the discovery port and waits for a datagram
//! starting with `E`. The reply carries tag/length/value fields such as
//! `NAME` and `JSON`; the server address is taken from the sender.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::constants::{DEFAULT_SLIMPROTO_PORT, DISCOVERY_PORT};
use crate::error::NetworkError;

const DISCOVERY_REQUEST: &[u8] = b"eNAME\0JSON\0";
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(1);

/// Find a server on the local network.
///
/// When the discovery port is already taken the server is assumed to run on
/// this machine.
pub async fn discover(attempts: u32) -> Result<SocketAddr, NetworkError> {
    let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, DISCOVERY_PORT)).await {
        Ok(socket) => socket,
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
            info!("Discovery port in use, assuming the server runs on this machine");
            return Ok(SocketAddr::new(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                DEFAULT_SLIMPROTO_PORT,
            ));
        }
        Err(e) => return Err(NetworkError::Discovery(e.to_string())),
    };
    socket
        .set_broadcast(true)
        .map_err(|e| NetworkError::Discovery(e.to_string()))?;

    let target = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), DISCOVERY_PORT);
    let server = discover_on(&socket, target, attempts, DISCOVERY_TIMEOUT).await?;
    Ok(SocketAddr::new(server, DEFAULT_SLIMPROTO_PORT))
}

/// Run the request/response exchange on `socket`, returning the responder
pub async fn discover_on(
    socket: &UdpSocket,
    target: SocketAddr,
    attempts: u32,
    timeout: Duration,
) -> Result<IpAddr, NetworkError> {
    let mut datagram = [0u8; 1500];

    for attempt in 1..=attempts {
        debug!("Discovery attempt {}/{} to {}", attempt, attempts, target);
        if let Err(e) = socket.send_to(DISCOVERY_REQUEST, target).await {
            warn!("Discovery request failed: {}", e);
            continue;
        }

        match tokio::time::timeout(timeout, socket.recv_from(&mut datagram)).await {
            Ok(Ok((len, from))) if len > 0 && datagram[0] == b'E' => {
                let name = parse_response(&datagram[1..len])
                    .into_iter()
                    .find(|(tag, _)| tag == "NAME")
                    .map(|(_, value)| value)
                    .unwrap_or_default();
                info!("Discovered server {:?} at {}", name, from.ip());
                return Ok(from.ip());
            }
            Ok(Ok((len, from))) => debug!("Ignoring {} byte datagram from {}", len, from),
            Ok(Err(e)) => warn!("Discovery receive failed: {}", e),
            Err(_) => debug!("No discovery response within {:?}", timeout),
        }
    }

    Err(NetworkError::Discovery(format!(
        "no server answered after {} attempts",
        attempts
    )))
}

/// Split a discovery response body into `(tag, value)` pairs
pub fn parse_response(mut body: &[u8]) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    while body.len() >= 5 {
        let tag = String::from_utf8_lossy(&body[..4]).into_owned();
        let len = body[4] as usize;
        let end = (5 + len).min(body.len());
        let value = String::from_utf8_lossy(&body[5..end]).into_owned();
        fields.push((tag, value));
        body = &body[end..];
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response() {
        let fields = parse_response(b"NAME\x07kitchenJSON\x049000");
        assert_eq!(
            fields,
            vec![
                ("NAME".to_string(), "kitchen".to_string()),
                ("JSON".to_string(), "9000".to_string()),
            ]
        );
        assert!(parse_response(b"NAM").is_empty());
    }

    #[tokio::test]
    async fn test_discover_on_loopback() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = server.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (len, from) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], DISCOVERY_REQUEST);
            server.send_to(b"ENAME\x04test", from).await.unwrap();
        });

        let found = discover_on(&client, target, 3, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(found, IpAddr::V4(Ipv4Addr::LOCALHOST));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_discover_gives_up() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = silent.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let result = discover_on(&client, target, 2, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(NetworkError::Discovery(_))));
    }
}
