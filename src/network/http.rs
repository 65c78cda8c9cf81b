//! HTTP stream fetch
//!
//! The server hands the player a ready-made HTTP request in the `strm`
//! frame. Only the method and path of its request line are used; the
//! request is re-issued with reqwest against the stream host.

use futures_util::TryStreamExt;
use reqwest::{Method, StatusCode};
use std::net::IpAddr;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::{debug, info};

use crate::error::NetworkError;

/// Body of a stream response as a byte reader
pub type StreamBody = Box<dyn AsyncRead + Send + Unpin>;

/// Method and path taken from the request line the server sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub method: Method,
    pub path: String,
}

impl StreamRequest {
    /// Parse the first line of `header`, e.g. `GET /stream.pcm?player=.. HTTP/1.0`
    pub fn parse(header: &[u8]) -> Result<Self, NetworkError> {
        let text = std::str::from_utf8(header)
            .map_err(|_| NetworkError::InvalidRequestHeader("not UTF-8".into()))?;
        let line = text.lines().next().unwrap_or_default();
        let mut fields = line.split_whitespace();

        let (method, path) = match (fields.next(), fields.next()) {
            (Some(method), Some(path)) => (method, path),
            _ => {
                return Err(NetworkError::InvalidRequestHeader(format!(
                    "malformed request line {:?}",
                    line
                )))
            }
        };

        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| NetworkError::InvalidRequestHeader(format!("bad method {:?}", method)))?;
        if !path.starts_with('/') {
            return Err(NetworkError::InvalidRequestHeader(format!(
                "bad path {:?}",
                path
            )));
        }

        Ok(Self {
            method,
            path: path.to_string(),
        })
    }

    pub fn url(&self, host: IpAddr, port: u16) -> String {
        match host {
            IpAddr::V4(ip) => format!("http://{}:{}{}", ip, port, self.path),
            IpAddr::V6(ip) => format!("http://[{}]:{}{}", ip, port, self.path),
        }
    }
}

/// Issue `request` against `host:port`.
///
/// Returns `Ok(None)` when the server answered with anything but 200.
pub async fn open_stream(
    client: &reqwest::Client,
    request: &StreamRequest,
    host: IpAddr,
    port: u16,
) -> Result<Option<StreamBody>, NetworkError> {
    let url = request.url(host, port);
    debug!("{} {}", request.method, url);

    let response = client
        .request(request.method.clone(), &url)
        .send()
        .await
        .map_err(|e| NetworkError::Http(format!("{}: {}", url, e)))?;

    if response.status() != StatusCode::OK {
        info!("Stream {} answered {}", url, response.status());
        return Ok(None);
    }

    let stream = response.bytes_stream().map_err(std::io::Error::other);
    Ok(Some(Box::new(StreamReader::new(Box::pin(stream)))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_parse_request_line() {
        let req = StreamRequest::parse(
            b"GET /stream.pcm?player=00:00:00:00:00:02 HTTP/1.0\r\nHost: x\r\n\r\n",
        )
        .unwrap();
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.path, "/stream.pcm?player=00:00:00:00:00:02");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(StreamRequest::parse(b"").is_err());
        assert!(StreamRequest::parse(b"GET").is_err());
        assert!(StreamRequest::parse(b"GET stream.pcm HTTP/1.0").is_err());
        assert!(StreamRequest::parse(&[0xff, 0xfe, 0x20, 0x2f]).is_err());
    }

    #[test]
    fn test_url() {
        let req = StreamRequest::parse(b"GET /s.pcm HTTP/1.0").unwrap();
        assert_eq!(
            req.url(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), 9000),
            "http://10.0.0.5:9000/s.pcm"
        );
        assert_eq!(
            req.url(IpAddr::V6(Ipv6Addr::LOCALHOST), 9000),
            "http://[::1]:9000/s.pcm"
        );
    }
}
