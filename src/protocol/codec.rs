//! Reading and writing frames on the control connection

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::FrameError;
use crate::protocol::frames::{AudioGain, ServerFrame, Strm, AUDG_FRAME_LEN};

/// Read until `buf` is full or the stream ends, returning the bytes read
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

async fn read_exact_or_short<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    let n = read_full(reader, buf).await?;
    if n < buf.len() {
        return Err(FrameError::Short {
            expected: buf.len(),
            actual: n,
        });
    }
    Ok(())
}

/// Read one server frame.
///
/// Frames of unknown type, and `audg` frames not in the fixed form, are read
/// in full and returned as [`ServerFrame::Ignored`].
pub async fn read_server_frame<R>(reader: &mut R) -> Result<ServerFrame, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 6];
    match read_full(reader, &mut header).await? {
        0 => return Err(FrameError::Closed),
        6 => {}
        actual => return Err(FrameError::Short { expected: 6, actual }),
    }

    let len = u16::from_be_bytes([header[0], header[1]]);
    if len < 4 {
        return Err(FrameError::InvalidLength(len));
    }
    let tag = [header[2], header[3], header[4], header[5]];

    let mut payload = vec![0u8; len as usize - 4];
    read_exact_or_short(reader, &mut payload).await?;

    decode_server_frame(tag, len, &payload)
}

/// Decode a server frame from its tag, declared length and payload
pub fn decode_server_frame(tag: [u8; 4], len: u16, payload: &[u8]) -> Result<ServerFrame, FrameError> {
    match &tag {
        b"strm" => Ok(ServerFrame::Strm(Strm::decode(payload)?)),
        b"audg" if len == AUDG_FRAME_LEN => Ok(ServerFrame::Audg(AudioGain::decode(payload)?)),
        _ => Ok(ServerFrame::Ignored {
            tag,
            len: payload.len(),
        }),
    }
}

/// Read one client frame (tag and payload), as a server would
pub async fn read_client_frame<R>(reader: &mut R) -> Result<([u8; 4], BytesMut), FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 8];
    match read_full(reader, &mut header).await? {
        0 => return Err(FrameError::Closed),
        8 => {}
        actual => return Err(FrameError::Short { expected: 8, actual }),
    }

    let tag = [header[0], header[1], header[2], header[3]];
    let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;

    let mut payload = BytesMut::zeroed(len);
    read_exact_or_short(reader, &mut payload).await?;
    Ok((tag, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frames::*;
    use bytes::{BufMut, Bytes};
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_strm_with_http_header() {
        let mut strm = Strm::new(StrmCommand::Start);
        strm.format = FORMAT_PCM;
        strm.pcm_sample_size = b'1';
        strm.pcm_sample_rate = b'3';
        strm.pcm_channels = b'2';
        strm.pcm_endian = b'1';
        strm.server_port = 9000;
        strm.http_header = Some(Bytes::from_static(b"GET /stream.pcm HTTP/1.0\r\n\r\n"));

        let encoded = strm.encode();
        assert_eq!(u16::from_be_bytes([encoded[0], encoded[1]]) as usize, 28 + 28);

        let frame = read_server_frame(&mut &encoded[..]).await.unwrap();
        assert_eq!(frame, ServerFrame::Strm(strm));
    }

    #[tokio::test]
    async fn test_audg_fixed_form_decoded() {
        let gain = AudioGain {
            old_left: 46,
            old_right: 46,
            dvc: 1,
            preamp: 255,
            new_left: 0x8000,
            new_right: 0x10000,
            sequence: 0,
        };
        let encoded = gain.encode();

        let frame = read_server_frame(&mut &encoded[..]).await.unwrap();
        assert_eq!(frame, ServerFrame::Audg(gain));
        assert_eq!(gain.linear(), (0.5, 1.0));
    }

    #[tokio::test]
    async fn test_other_frames_drained() {
        let mut wire = BytesMut::new();
        // Variable-length audg
        wire.put_u16(4 + 10);
        wire.put_slice(b"audg");
        wire.put_slice(&[0u8; 10]);
        // Unknown tag
        wire.put_u16(4 + 3);
        wire.put_slice(b"vers");
        wire.put_slice(b"7.9");
        wire.put_slice(&Strm::new(StrmCommand::Status).encode());

        let mut reader = &wire[..];
        assert_eq!(
            read_server_frame(&mut reader).await.unwrap(),
            ServerFrame::Ignored { tag: *b"audg", len: 10 }
        );
        assert_eq!(
            read_server_frame(&mut reader).await.unwrap(),
            ServerFrame::Ignored { tag: *b"vers", len: 3 }
        );
        assert!(matches!(
            read_server_frame(&mut reader).await.unwrap(),
            ServerFrame::Strm(Strm { command: StrmCommand::Status, .. })
        ));
        assert!(matches!(read_server_frame(&mut reader).await, Err(FrameError::Closed)));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_short() {
        let encoded = Strm::new(StrmCommand::Start).encode();
        let truncated = &encoded[..encoded.len() - 5];

        let err = read_server_frame(&mut &truncated[..]).await.unwrap_err();
        assert!(matches!(err, FrameError::Short { expected: 24, actual: 19 }));

        let err = read_server_frame(&mut &encoded[..3]).await.unwrap_err();
        assert!(matches!(err, FrameError::Short { expected: 6, actual: 3 }));
    }

    #[tokio::test]
    async fn test_strm_shorter_than_fixed_part() {
        let mut wire = BytesMut::new();
        wire.put_u16(4 + 10);
        wire.put_slice(b"strm");
        wire.put_slice(&[b's'; 10]);

        let err = read_server_frame(&mut &wire[..]).await.unwrap_err();
        assert!(matches!(err, FrameError::Short { expected: 24, actual: 10 }));
    }

    #[test]
    fn test_helo_layouts() {
        let mut helo = Helo {
            device_id: 12,
            revision: 255,
            mac: [0, 0, 0, 0, 0, 2],
            uuid: [0; 16],
            wlan_channels: [0; 2],
            bytes_received: 0,
            language: [0; 2],
            capabilities: Helo::capabilities("squeezeplay", "SlimRs", 192_000),
        };
        assert_eq!(helo.capabilities.len(), 59);
        let encoded = helo.encode().unwrap();
        assert_eq!(encoded.len(), 8 + 36 + 59);
        assert_eq!(&encoded[..4], b"HELO");
        assert_eq!(&encoded[4..8], &95u32.to_be_bytes());
        assert_eq!(&encoded[10..16], &[0, 0, 0, 0, 0, 2]);
        assert!(encoded.ends_with(b"MaxSampleRate=192000"));

        helo.capabilities = Helo::capabilities("squeezeplay", "SlimRs", 96_000);
        assert_eq!(helo.encode().unwrap().len(), 8 + 36 + 58);

        helo.capabilities = Helo::capabilities("squeezeplay", "SlimRs", 8_000);
        assert!(matches!(
            helo.encode(),
            Err(crate::error::ProtocolError::UnsupportedCapabilityLength(57))
        ));
    }

    #[test]
    fn test_bye_layout() {
        assert_eq!(&Bye::default().encode()[..], b"BYE!\x00\x00\x00\x01\x00");
    }

    #[tokio::test]
    async fn test_stat_read_back() {
        let mut stat = Stat::new(StatusEvent::Timer);
        stat.server_timestamp = 0xDEADBEEF;
        stat.jiffies = 1234;
        let mut wire = BytesMut::new();
        stat.encode(&mut wire);

        let (tag, payload) = read_client_frame(&mut &wire[..]).await.unwrap();
        assert_eq!(&tag, b"STAT");
        assert_eq!(Stat::decode(&payload).unwrap(), stat);
    }

    fn any_event() -> impl Strategy<Value = StatusEvent> {
        prop_oneof![
            Just(StatusEvent::Connect),
            Just(StatusEvent::DecoderReady),
            Just(StatusEvent::Flushed),
            Just(StatusEvent::NotSupported),
            Just(StatusEvent::Timer),
            Just(StatusEvent::Underrun),
        ]
    }

    proptest! {
        #[test]
        fn stat_layout_is_fixed(
            event in any_event(),
            buffer_fullness in any::<u32>(),
            bytes_received in any::<u64>(),
            jiffies in any::<u32>(),
            elapsed_seconds in any::<u32>(),
            elapsed_millis in 0u32..1000,
            server_timestamp in any::<u32>(),
        ) {
            let mut stat = Stat::new(event);
            stat.buffer_fullness = buffer_fullness;
            stat.bytes_received = bytes_received;
            stat.jiffies = jiffies;
            stat.elapsed_seconds = elapsed_seconds;
            stat.elapsed_millis = elapsed_millis;
            stat.server_timestamp = server_timestamp;

            let mut wire = BytesMut::new();
            stat.encode(&mut wire);

            prop_assert_eq!(wire.len(), STAT_FRAME_LEN);
            prop_assert_eq!(&wire[4..8], &STAT_PAYLOAD_LEN.to_be_bytes()[..]);
            prop_assert_eq!(&wire[8..12], &event.code()[..]);
            prop_assert_eq!(Stat::decode(&wire[8..]).unwrap(), stat);
        }
    }
}
