//! PCM format model
//!
//! The server describes raw PCM with single ASCII code bytes in the `strm`
//! frame. This module maps those codes onto a concrete sample layout and
//! provides the byte math the pump and the devices rely on.

use std::fmt;

/// Sample encoding of interleaved PCM data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleEncoding {
    S8,
    S16Le,
    S16Be,
    S24_3Le,
    S24_3Be,
    S32Le,
    S32Be,
}

impl SampleEncoding {
    /// Bytes occupied by one sample
    pub fn bytes(&self) -> usize {
        match self {
            SampleEncoding::S8 => 1,
            SampleEncoding::S16Le | SampleEncoding::S16Be => 2,
            SampleEncoding::S24_3Le | SampleEncoding::S24_3Be => 3,
            SampleEncoding::S32Le | SampleEncoding::S32Be => 4,
        }
    }

    /// Decode one sample to a normalized f32 in [-1.0, 1.0).
    ///
    /// `bytes` must hold at least [`SampleEncoding::bytes`] bytes.
    pub fn decode(&self, bytes: &[u8]) -> f32 {
        match self {
            SampleEncoding::S8 => bytes[0] as i8 as f32 / 128.0,
            SampleEncoding::S16Le => i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32_768.0,
            SampleEncoding::S16Be => i16::from_be_bytes([bytes[0], bytes[1]]) as f32 / 32_768.0,
            SampleEncoding::S24_3Le => {
                let v = i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) >> 8;
                v as f32 / 8_388_608.0
            }
            SampleEncoding::S24_3Be => {
                let v = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], 0]) >> 8;
                v as f32 / 8_388_608.0
            }
            SampleEncoding::S32Le => {
                i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32 / 2_147_483_648.0
            }
            SampleEncoding::S32Be => {
                i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32 / 2_147_483_648.0
            }
        }
    }
}

impl fmt::Display for SampleEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleEncoding::S8 => "S8",
            SampleEncoding::S16Le => "S16_LE",
            SampleEncoding::S16Be => "S16_BE",
            SampleEncoding::S24_3Le => "S24_3LE",
            SampleEncoding::S24_3Be => "S24_3BE",
            SampleEncoding::S32Le => "S32_LE",
            SampleEncoding::S32Be => "S32_BE",
        };
        f.write_str(name)
    }
}

/// Hardware-facing description of a PCM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PcmFormat {
    pub encoding: SampleEncoding,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFormat {
    pub fn new(encoding: SampleEncoding, sample_rate: u32, channels: u16) -> Self {
        Self {
            encoding,
            sample_rate,
            channels,
        }
    }

    /// Bytes in one interleaved frame
    pub fn frame_bytes(&self) -> usize {
        self.encoding.bytes() * self.channels as usize
    }

    /// Translate the `strm` PCM code bytes into a format.
    ///
    /// Returns `None` for any code this player cannot render.
    pub fn from_strm_codes(sample_size: u8, sample_rate: u8, channels: u8, endian: u8) -> Option<Self> {
        let channels = match channels {
            b'1' => 1,
            b'2' => 2,
            _ => return None,
        };

        let sample_rate = match sample_rate {
            b'0' => 11_025,
            b'1' => 22_050,
            b'2' => 32_000,
            b'3' => 44_100,
            b'4' => 48_000,
            b'5' => 8_000,
            b'6' => 12_000,
            b'7' => 16_000,
            b'8' => 24_000,
            b'9' => 96_000,
            b':' => 88_200,
            b';' => 192_000,
            b'<' => 176_400,
            _ => return None,
        };

        let encoding = match (endian, sample_size) {
            (b'0' | b'1', b'0') => SampleEncoding::S8,
            (b'0', b'1') => SampleEncoding::S16Be,
            (b'0', b'2') => SampleEncoding::S24_3Be,
            (b'0', b'3') => SampleEncoding::S32Be,
            (b'1', b'1') => SampleEncoding::S16Le,
            (b'1', b'2') => SampleEncoding::S24_3Le,
            (b'1', b'3') => SampleEncoding::S32Le,
            _ => return None,
        };

        Some(Self::new(encoding, sample_rate, channels))
    }
}

impl fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}Hz {}ch", self.encoding, self.sample_rate, self.channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strm_codes() {
        let format = PcmFormat::from_strm_codes(b'1', b'3', b'2', b'1').unwrap();
        assert_eq!(format, PcmFormat::new(SampleEncoding::S16Le, 44_100, 2));
        assert_eq!(format.frame_bytes(), 4);

        let format = PcmFormat::from_strm_codes(b'2', b';', b'2', b'0').unwrap();
        assert_eq!(format.encoding, SampleEncoding::S24_3Be);
        assert_eq!(format.sample_rate, 192_000);
        assert_eq!(format.frame_bytes(), 6);
    }

    #[test]
    fn test_unknown_codes_rejected() {
        assert!(PcmFormat::from_strm_codes(b'1', b'?', b'2', b'1').is_none());
        assert!(PcmFormat::from_strm_codes(b'1', b'3', b'6', b'1').is_none());
        assert!(PcmFormat::from_strm_codes(b'9', b'3', b'2', b'1').is_none());
    }

    #[test]
    fn test_sample_decoding() {
        assert_eq!(SampleEncoding::S16Le.decode(&[0x00, 0x40]), 0.5);
        assert_eq!(SampleEncoding::S16Be.decode(&[0x80, 0x00]), -1.0);
        assert_eq!(SampleEncoding::S24_3Le.decode(&[0x00, 0x00, 0xC0]), -0.5);
        assert_eq!(SampleEncoding::S24_3Be.decode(&[0x40, 0x00, 0x00]), 0.5);
        assert_eq!(SampleEncoding::S8.decode(&[0x40]), 0.5);
    }
}
