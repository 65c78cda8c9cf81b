//! SlimProto frame definitions
//!
//! Server to client frames start with a big-endian u16 length (covering the
//! 4-byte tag and the payload) followed by the tag. Client to server frames
//! start with the tag followed by a big-endian u32 payload length. All
//! multi-byte fields are big-endian and every layout is fixed-width.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::Ipv4Addr;

use crate::audio::format::PcmFormat;
use crate::error::{FrameError, ProtocolError};

/// Fixed part of a `strm` payload
pub const STRM_FIXED_LEN: usize = 24;

/// Declared length of the fixed-form `audg` frame (tag included)
pub const AUDG_FRAME_LEN: u16 = 26;

/// Payload length of every `STAT` frame
pub const STAT_PAYLOAD_LEN: u32 = 53;

/// Total size of an encoded `STAT` frame
pub const STAT_FRAME_LEN: usize = 8 + STAT_PAYLOAD_LEN as usize;

/// Fixed fields of a `HELO` payload preceding the capability string
pub const HELO_FIXED_LEN: usize = 36;

/// Capability string lengths a `HELO` frame can carry
pub const HELO_CAPABILITY_LENGTHS: [usize; 2] = [58, 59];

/// `strm` format byte for raw PCM
pub const FORMAT_PCM: u8 = b'p';

/// `strm` flags bit asking to continue on the running output
pub const FLAG_SEAMLESS: u8 = 0x40;

/// Sub-command of a `strm` frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrmCommand {
    /// `t`: echo the timestamp back
    Status,
    /// `s`
    Start,
    /// `p`
    Pause,
    /// `u`
    Unpause,
    /// `q`
    Stop,
    /// `f`
    Flush,
    /// `a`
    Skip,
    Unknown(u8),
}

impl StrmCommand {
    pub fn from_byte(b: u8) -> Self {
        match b {
            b't' => StrmCommand::Status,
            b's' => StrmCommand::Start,
            b'p' => StrmCommand::Pause,
            b'u' => StrmCommand::Unpause,
            b'q' => StrmCommand::Stop,
            b'f' => StrmCommand::Flush,
            b'a' => StrmCommand::Skip,
            other => StrmCommand::Unknown(other),
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            StrmCommand::Status => b't',
            StrmCommand::Start => b's',
            StrmCommand::Pause => b'p',
            StrmCommand::Unpause => b'u',
            StrmCommand::Stop => b'q',
            StrmCommand::Flush => b'f',
            StrmCommand::Skip => b'a',
            StrmCommand::Unknown(b) => *b,
        }
    }
}

/// Stream control frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strm {
    pub command: StrmCommand,
    pub autostart: u8,
    pub format: u8,
    pub pcm_sample_size: u8,
    pub pcm_sample_rate: u8,
    pub pcm_channels: u8,
    pub pcm_endian: u8,
    pub threshold: u8,
    pub spdif_enable: u8,
    pub transition_period: u8,
    pub transition_type: u8,
    pub flags: u8,
    pub output_threshold: u8,
    pub reserved: u8,
    /// Timestamp, pause interval, skip duration or resume tick, depending on `command`
    pub replay_gain: u32,
    pub server_port: u16,
    pub server_ip: Ipv4Addr,
    /// Trailing HTTP request to issue for the stream
    pub http_header: Option<Bytes>,
}

impl Strm {
    /// A frame with every field zeroed apart from the command
    pub fn new(command: StrmCommand) -> Self {
        Self {
            command,
            autostart: b'0',
            format: 0,
            pcm_sample_size: 0,
            pcm_sample_rate: 0,
            pcm_channels: 0,
            pcm_endian: 0,
            threshold: 0,
            spdif_enable: 0,
            transition_period: 0,
            transition_type: 0,
            flags: 0,
            output_threshold: 0,
            reserved: 0,
            replay_gain: 0,
            server_port: 0,
            server_ip: Ipv4Addr::UNSPECIFIED,
            http_header: None,
        }
    }

    /// PCM layout declared by the code bytes
    pub fn pcm_format(&self) -> Option<PcmFormat> {
        PcmFormat::from_strm_codes(
            self.pcm_sample_size,
            self.pcm_sample_rate,
            self.pcm_channels,
            self.pcm_endian,
        )
    }

    pub fn is_seamless(&self) -> bool {
        self.flags & FLAG_SEAMLESS != 0
    }

    /// Decode a `strm` payload (tag and length already consumed)
    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() < STRM_FIXED_LEN {
            return Err(FrameError::Short {
                expected: STRM_FIXED_LEN,
                actual: payload.len(),
            });
        }

        let mut buf = payload;
        let command = StrmCommand::from_byte(buf.get_u8());
        let autostart = buf.get_u8();
        let format = buf.get_u8();
        let pcm_sample_size = buf.get_u8();
        let pcm_sample_rate = buf.get_u8();
        let pcm_channels = buf.get_u8();
        let pcm_endian = buf.get_u8();
        let threshold = buf.get_u8();
        let spdif_enable = buf.get_u8();
        let transition_period = buf.get_u8();
        let transition_type = buf.get_u8();
        let flags = buf.get_u8();
        let output_threshold = buf.get_u8();
        let reserved = buf.get_u8();
        let replay_gain = buf.get_u32();
        let server_port = buf.get_u16();
        let server_ip = Ipv4Addr::from(buf.get_u32());

        let http_header = (!buf.is_empty()).then(|| Bytes::copy_from_slice(buf));

        Ok(Self {
            command,
            autostart,
            format,
            pcm_sample_size,
            pcm_sample_rate,
            pcm_channels,
            pcm_endian,
            threshold,
            spdif_enable,
            transition_period,
            transition_type,
            flags,
            output_threshold,
            reserved,
            replay_gain,
            server_port,
            server_ip,
            http_header,
        })
    }

    /// Encode as the server sends it, length prefix included
    pub fn encode(&self) -> BytesMut {
        let header_len = self.http_header.as_ref().map(|h| h.len()).unwrap_or(0);
        let mut dst = BytesMut::with_capacity(6 + STRM_FIXED_LEN + header_len);

        dst.put_u16((4 + STRM_FIXED_LEN + header_len) as u16);
        dst.put_slice(b"strm");
        dst.put_u8(self.command.as_byte());
        dst.put_u8(self.autostart);
        dst.put_u8(self.format);
        dst.put_u8(self.pcm_sample_size);
        dst.put_u8(self.pcm_sample_rate);
        dst.put_u8(self.pcm_channels);
        dst.put_u8(self.pcm_endian);
        dst.put_u8(self.threshold);
        dst.put_u8(self.spdif_enable);
        dst.put_u8(self.transition_period);
        dst.put_u8(self.transition_type);
        dst.put_u8(self.flags);
        dst.put_u8(self.output_threshold);
        dst.put_u8(self.reserved);
        dst.put_u32(self.replay_gain);
        dst.put_u16(self.server_port);
        dst.put_u32(u32::from(self.server_ip));
        if let Some(header) = &self.http_header {
            dst.put_slice(header);
        }
        dst
    }
}

/// Volume frame in its fixed 26-byte form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioGain {
    /// 0-128
    pub old_left: u32,
    pub old_right: u32,
    /// Digital volume control enabled
    pub dvc: u8,
    pub preamp: u8,
    /// 16.16 fixed point
    pub new_left: u32,
    pub new_right: u32,
    pub sequence: u32,
}

impl AudioGain {
    pub const PAYLOAD_LEN: usize = AUDG_FRAME_LEN as usize - 4;

    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() < Self::PAYLOAD_LEN {
            return Err(FrameError::Short {
                expected: Self::PAYLOAD_LEN,
                actual: payload.len(),
            });
        }

        let mut buf = payload;
        Ok(Self {
            old_left: buf.get_u32(),
            old_right: buf.get_u32(),
            dvc: buf.get_u8(),
            preamp: buf.get_u8(),
            new_left: buf.get_u32(),
            new_right: buf.get_u32(),
            sequence: buf.get_u32(),
        })
    }

    pub fn encode(&self) -> BytesMut {
        let mut dst = BytesMut::with_capacity(2 + AUDG_FRAME_LEN as usize);
        dst.put_u16(AUDG_FRAME_LEN);
        dst.put_slice(b"audg");
        dst.put_u32(self.old_left);
        dst.put_u32(self.old_right);
        dst.put_u8(self.dvc);
        dst.put_u8(self.preamp);
        dst.put_u32(self.new_left);
        dst.put_u32(self.new_right);
        dst.put_u32(self.sequence);
        dst
    }

    /// Linear left/right gain
    pub fn linear(&self) -> (f32, f32) {
        (
            self.new_left as f32 / 65_536.0,
            self.new_right as f32 / 65_536.0,
        )
    }
}

/// A decoded server frame
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Strm(Strm),
    Audg(AudioGain),
    /// Frame read in full and discarded
    Ignored { tag: [u8; 4], len: usize },
}

/// Event code carried by a `STAT` frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusEvent {
    /// STMc: connect acknowledged
    Connect,
    /// STMd: decoder ready for the next track
    DecoderReady,
    /// STMe: stream connection established
    Established,
    /// STMf: output flushed
    Flushed,
    /// STMh: HTTP headers handled
    Headers,
    /// STMl: buffer threshold reached
    BufferThreshold,
    /// STMn: format not supported
    NotSupported,
    /// STMp: paused
    Paused,
    /// STMr: resumed
    Resumed,
    /// STMs: track started
    TrackStarted,
    /// STMt: timestamp reply
    Timer,
    /// STMu: output underrun, track fully played
    Underrun,
}

impl StatusEvent {
    pub fn code(&self) -> &'static [u8; 4] {
        match self {
            StatusEvent::Connect => b"STMc",
            StatusEvent::DecoderReady => b"STMd",
            StatusEvent::Established => b"STMe",
            StatusEvent::Flushed => b"STMf",
            StatusEvent::Headers => b"STMh",
            StatusEvent::BufferThreshold => b"STMl",
            StatusEvent::NotSupported => b"STMn",
            StatusEvent::Paused => b"STMp",
            StatusEvent::Resumed => b"STMr",
            StatusEvent::TrackStarted => b"STMs",
            StatusEvent::Timer => b"STMt",
            StatusEvent::Underrun => b"STMu",
        }
    }

    pub fn from_code(code: &[u8]) -> Option<Self> {
        let event = match code {
            b"STMc" => StatusEvent::Connect,
            b"STMd" => StatusEvent::DecoderReady,
            b"STMe" => StatusEvent::Established,
            b"STMf" => StatusEvent::Flushed,
            b"STMh" => StatusEvent::Headers,
            b"STMl" => StatusEvent::BufferThreshold,
            b"STMn" => StatusEvent::NotSupported,
            b"STMp" => StatusEvent::Paused,
            b"STMr" => StatusEvent::Resumed,
            b"STMs" => StatusEvent::TrackStarted,
            b"STMt" => StatusEvent::Timer,
            b"STMu" => StatusEvent::Underrun,
            _ => return None,
        };
        Some(event)
    }
}

/// Player status report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub event: StatusEvent,
    pub crlf_count: u8,
    pub mas_initialized: u8,
    pub mas_mode: u8,
    pub buffer_size: u32,
    pub buffer_fullness: u32,
    pub bytes_received: u64,
    /// 0-100, larger values mean wired
    pub signal_strength: u16,
    pub jiffies: u32,
    pub output_buffer_size: u32,
    pub output_buffer_fullness: u32,
    pub elapsed_seconds: u32,
    pub voltage: u16,
    pub elapsed_millis: u32,
    /// Echo of the `strm t` timestamp
    pub server_timestamp: u32,
    pub error_code: u16,
}

impl Stat {
    /// Signal strength reported by a wired player
    pub const WIRED: u16 = 65_534;

    pub fn new(event: StatusEvent) -> Self {
        Self {
            event,
            crlf_count: 0,
            mas_initialized: 0,
            mas_mode: 0,
            buffer_size: 0,
            buffer_fullness: 0,
            bytes_received: 0,
            signal_strength: Self::WIRED,
            jiffies: 0,
            output_buffer_size: 0,
            output_buffer_fullness: 0,
            elapsed_seconds: 0,
            voltage: 0,
            elapsed_millis: 0,
            server_timestamp: 0,
            error_code: 0,
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(STAT_FRAME_LEN);
        dst.put_slice(b"STAT");
        dst.put_u32(STAT_PAYLOAD_LEN);
        dst.put_slice(self.event.code());
        dst.put_u8(self.crlf_count);
        dst.put_u8(self.mas_initialized);
        dst.put_u8(self.mas_mode);
        dst.put_u32(self.buffer_size);
        dst.put_u32(self.buffer_fullness);
        dst.put_u64(self.bytes_received);
        dst.put_u16(self.signal_strength);
        dst.put_u32(self.jiffies);
        dst.put_u32(self.output_buffer_size);
        dst.put_u32(self.output_buffer_fullness);
        dst.put_u32(self.elapsed_seconds);
        dst.put_u16(self.voltage);
        dst.put_u32(self.elapsed_millis);
        dst.put_u32(self.server_timestamp);
        dst.put_u16(self.error_code);
    }

    /// Decode a `STAT` payload (tag and length already consumed)
    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() < STAT_PAYLOAD_LEN as usize {
            return Err(FrameError::Short {
                expected: STAT_PAYLOAD_LEN as usize,
                actual: payload.len(),
            });
        }

        let mut buf = payload;
        let code = buf.copy_to_bytes(4);
        let event = StatusEvent::from_code(&code)
            .ok_or_else(|| FrameError::UnknownEvent(String::from_utf8_lossy(&code).into_owned()))?;

        Ok(Self {
            event,
            crlf_count: buf.get_u8(),
            mas_initialized: buf.get_u8(),
            mas_mode: buf.get_u8(),
            buffer_size: buf.get_u32(),
            buffer_fullness: buf.get_u32(),
            bytes_received: buf.get_u64(),
            signal_strength: buf.get_u16(),
            jiffies: buf.get_u32(),
            output_buffer_size: buf.get_u32(),
            output_buffer_fullness: buf.get_u32(),
            elapsed_seconds: buf.get_u32(),
            voltage: buf.get_u16(),
            elapsed_millis: buf.get_u32(),
            server_timestamp: buf.get_u32(),
            error_code: buf.get_u16(),
        })
    }
}

/// Capability handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Helo {
    pub device_id: u8,
    pub revision: u8,
    pub mac: [u8; 6],
    pub uuid: [u8; 16],
    pub wlan_channels: [u8; 2],
    pub bytes_received: u64,
    pub language: [u8; 2],
    pub capabilities: String,
}

impl Helo {
    /// Build the capability string advertised to the server
    pub fn capabilities(model: &str, model_name: &str, max_sample_rate: u32) -> String {
        format!(
            "model={},modelName={},pcm,MaxSampleRate={}",
            model, model_name, max_sample_rate
        )
    }

    /// Encode the frame, selecting the layout matching the capability length
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let caps = self.capabilities.as_bytes();
        if !HELO_CAPABILITY_LENGTHS.contains(&caps.len()) {
            return Err(ProtocolError::UnsupportedCapabilityLength(caps.len()));
        }

        let payload_len = HELO_FIXED_LEN + caps.len();
        let mut dst = BytesMut::with_capacity(8 + payload_len);
        dst.put_slice(b"HELO");
        dst.put_u32(payload_len as u32);
        dst.put_u8(self.device_id);
        dst.put_u8(self.revision);
        dst.put_slice(&self.mac);
        dst.put_slice(&self.uuid);
        dst.put_slice(&self.wlan_channels);
        dst.put_u64(self.bytes_received);
        dst.put_slice(&self.language);
        dst.put_slice(caps);
        Ok(dst)
    }
}

/// Farewell sent on shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bye {
    pub upgrade: bool,
}

impl Bye {
    pub fn encode(&self) -> BytesMut {
        let mut dst = BytesMut::with_capacity(9);
        dst.put_slice(b"BYE!");
        dst.put_u32(1);
        dst.put_u8(self.upgrade as u8);
        dst
    }
}
