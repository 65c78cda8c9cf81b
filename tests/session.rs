//! End-to-end sessions against a fake control server and a fake HTTP
//! stream server on loopback, playing into the null output driver.

use bytes::Bytes;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use slim_pcm_player::{
    audio::{AudioOutput, NullBackend, NullHandle, PcmFormat, SampleEncoding},
    config::StreamConfig,
    network::{Client, ConnectionConfig},
    player::{PlaybackState, Player},
    protocol::{read_client_frame, Helo, Stat, StatusEvent, Strm, StrmCommand},
};

const STEP: Duration = Duration::from_secs(5);

struct Harness {
    player: Arc<Player>,
    handle: NullHandle,
    control: TcpStream,
    hello: Vec<u8>,
}

async fn start_session() -> Harness {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server = listener.local_addr().unwrap();

    let backend = NullBackend::new();
    let handle = backend.handle();
    let mut output = AudioOutput::open(Box::new(backend), "null").unwrap();
    let max_rate = output.max_sample_rate().unwrap();

    let player = Player::new(
        output,
        StreamConfig {
            buffer_size: 64 * 1024,
            chunk_frames: 256,
        },
    );
    let helo = Helo {
        device_id: 12,
        revision: 255,
        mac: [0, 0, 0, 0, 0, 2],
        uuid: [7; 16],
        wlan_channels: [0, 0],
        bytes_received: 0,
        language: *b"en",
        capabilities: Helo::capabilities("squeezeplay", "SlimRs", max_rate),
    };
    let client = Client::new(
        player.clone(),
        ConnectionConfig {
            server,
            read_timeout: Duration::from_secs(30),
            reconnect_delay: Duration::from_millis(50),
        },
        &helo,
    )
    .unwrap();
    tokio::spawn(async move { client.run().await });

    let (mut control, _) = tokio::time::timeout(STEP, listener.accept())
        .await
        .unwrap()
        .unwrap();
    let (tag, hello) = read_client_frame(&mut control).await.unwrap();
    assert_eq!(&tag, b"HELO");

    Harness {
        player,
        handle,
        control,
        hello: hello.to_vec(),
    }
}

impl Harness {
    async fn send(&mut self, strm: &Strm) {
        self.control.write_all(&strm.encode()).await.unwrap();
    }

    async fn next_event(&mut self) -> StatusEvent {
        let (tag, payload) = tokio::time::timeout(STEP, read_client_frame(&mut self.control))
            .await
            .expect("status report in time")
            .unwrap();
        assert_eq!(&tag, b"STAT");
        Stat::decode(&payload).unwrap().event
    }

    async fn events(&mut self, count: usize) -> Vec<StatusEvent> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.next_event().await);
        }
        out
    }

    async fn wait_for_pump_exit(&self) {
        for _ in 0..500 {
            if !self.player.pump_running() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("pump did not exit");
    }
}

/// Serve one HTTP request; `release` holds the body open until fired
async fn http_server(
    status_line: &'static str,
    body: Vec<u8>,
    release: Option<oneshot::Receiver<Vec<u8>>>,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 512];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
        }
        assert!(request.starts_with(b"GET /stream.pcm?player=00:00:00:00:00:02 "));

        let head = format!("{}\r\nContent-Type: audio/L16\r\nConnection: close\r\n\r\n", status_line);
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(&body).await.unwrap();
        socket.flush().await.unwrap();

        if let Some(release) = release {
            if let Ok(rest) = release.await {
                let _ = socket.write_all(&rest).await;
            }
        }
    });

    addr
}

fn stream_start(http: SocketAddr) -> Strm {
    let mut strm = Strm::new(StrmCommand::Start);
    strm.autostart = b'1';
    strm.format = b'p';
    strm.pcm_sample_size = b'1';
    strm.pcm_sample_rate = b'3';
    strm.pcm_channels = b'2';
    strm.pcm_endian = b'1';
    strm.server_port = http.port();
    strm.server_ip = Ipv4Addr::LOCALHOST;
    strm.http_header = Some(Bytes::from_static(
        b"GET /stream.pcm?player=00:00:00:00:00:02 HTTP/1.0\r\n\r\n",
    ));
    strm
}

#[tokio::test]
async fn test_hello_advertises_capabilities() {
    let session = start_session().await;

    assert_eq!(session.hello.len(), 36 + 59);
    assert_eq!(session.hello[0], 12);
    assert_eq!(&session.hello[2..8], &[0, 0, 0, 0, 0, 2]);
    assert_eq!(
        &session.hello[36..],
        b"model=squeezeplay,modelName=SlimRs,pcm,MaxSampleRate=192000"
    );
}

#[tokio::test]
async fn test_plain_start_acknowledged() {
    let mut session = start_session().await;

    session.send(&Strm::new(StrmCommand::Start)).await;

    assert_eq!(session.next_event().await, StatusEvent::Connect);
    assert_eq!(session.player.state(), PlaybackState::Play);
}

#[tokio::test]
async fn test_stream_plays_to_end() {
    let mut session = start_session().await;
    let body: Vec<u8> = (0..44_100u32 * 4).map(|i| i as u8).collect();
    let http = http_server("HTTP/1.0 200 OK", body.clone(), None).await;

    session.send(&stream_start(http)).await;

    assert_eq!(
        session.events(7).await,
        vec![
            StatusEvent::Connect,
            StatusEvent::Headers,
            StatusEvent::Established,
            StatusEvent::BufferThreshold,
            StatusEvent::TrackStarted,
            StatusEvent::DecoderReady,
            StatusEvent::Underrun,
        ]
    );

    let stats = session.handle.stats();
    assert_eq!(stats.bytes_written, body.len());
    assert_eq!(
        stats.format,
        Some(PcmFormat::new(SampleEncoding::S16Le, 44_100, 2))
    );
    assert_eq!(session.player.state(), PlaybackState::Stopped);
    assert_eq!(session.player.bytes_received(), body.len() as u64);
}

#[tokio::test]
async fn test_stop_mid_stream() {
    let mut session = start_session().await;
    let (release, held) = oneshot::channel();
    let http = http_server("HTTP/1.0 200 OK", vec![0u8; 8192], Some(held)).await;

    session.send(&stream_start(http)).await;
    assert_eq!(
        session.events(5).await,
        vec![
            StatusEvent::Connect,
            StatusEvent::Headers,
            StatusEvent::Established,
            StatusEvent::BufferThreshold,
            StatusEvent::TrackStarted,
        ]
    );

    let drops_before = session.handle.stats().drops;
    session.send(&Strm::new(StrmCommand::Stop)).await;
    assert_eq!(session.next_event().await, StatusEvent::Flushed);
    assert_eq!(session.player.state(), PlaybackState::Stopped);
    assert!(session.handle.stats().drops > drops_before);

    // let the pump see the stop
    let _ = release.send(vec![0u8; 4096]);
    session.wait_for_pump_exit().await;

    let mut status = Strm::new(StrmCommand::Status);
    status.replay_gain = 42;
    session.send(&status).await;
    assert_eq!(session.next_event().await, StatusEvent::Timer);
}

#[tokio::test]
async fn test_pause_and_resume_mid_stream() {
    let mut session = start_session().await;
    let (release, held) = oneshot::channel();
    let http = http_server("HTTP/1.0 200 OK", vec![0u8; 4096], Some(held)).await;

    session.send(&stream_start(http)).await;
    session.events(5).await;

    session.send(&Strm::new(StrmCommand::Pause)).await;
    assert_eq!(session.next_event().await, StatusEvent::Paused);
    assert!(session.player.state().is_paused());
    assert!(session.handle.stats().paused);

    // more data arrives, the pump parks instead of finishing
    let _ = release.send(vec![0u8; 4096]);
    for _ in 0..100 {
        if session.player.state() == PlaybackState::Paused {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(session.player.state(), PlaybackState::Paused);

    session.send(&Strm::new(StrmCommand::Unpause)).await;
    assert_eq!(
        session.events(3).await,
        vec![
            StatusEvent::Resumed,
            StatusEvent::DecoderReady,
            StatusEvent::Underrun,
        ]
    );
    assert_eq!(session.handle.stats().bytes_written, 8192);
}

#[tokio::test]
async fn test_http_error_stops_after_headers() {
    let mut session = start_session().await;
    let http = http_server("HTTP/1.0 404 Not Found", Vec::new(), None).await;

    session.send(&stream_start(http)).await;
    assert_eq!(
        session.events(2).await,
        vec![StatusEvent::Connect, StatusEvent::Headers]
    );
    session.wait_for_pump_exit().await;

    session.send(&Strm::new(StrmCommand::Status)).await;
    assert_eq!(session.next_event().await, StatusEvent::Timer);
    assert_eq!(session.handle.stats().bytes_written, 0);
}

#[tokio::test]
async fn test_unsupported_format_rejected() {
    let mut session = start_session().await;
    let mut strm = stream_start("127.0.0.1:9".parse().unwrap());
    strm.pcm_sample_rate = b'z';

    session.send(&strm).await;

    assert_eq!(
        session.events(2).await,
        vec![StatusEvent::Connect, StatusEvent::NotSupported]
    );
}

#[tokio::test]
async fn test_reconnects_after_server_drops() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server = listener.local_addr().unwrap();

    let backend = NullBackend::new();
    let output = AudioOutput::open(Box::new(backend), "null").unwrap();
    let player = Player::new(output, StreamConfig::default());
    let helo = Helo {
        device_id: 12,
        revision: 255,
        mac: [0, 0, 0, 0, 0, 2],
        uuid: [0; 16],
        wlan_channels: [0, 0],
        bytes_received: 0,
        language: *b"en",
        capabilities: Helo::capabilities("squeezeplay", "SlimRs", 96_000),
    };
    let client = Client::new(
        player,
        ConnectionConfig {
            server,
            read_timeout: Duration::from_secs(30),
            reconnect_delay: Duration::from_millis(20),
        },
        &helo,
    )
    .unwrap();
    tokio::spawn(async move { client.run().await });

    for _ in 0..2 {
        let (mut control, _) = tokio::time::timeout(STEP, listener.accept())
            .await
            .unwrap()
            .unwrap();
        let (tag, payload) = read_client_frame(&mut control).await.unwrap();
        assert_eq!(&tag, b"HELO");
        assert_eq!(payload.len(), 36 + 58);
        drop(control);
    }
}
