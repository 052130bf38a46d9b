//! 16-bit PCM RIFF/WAV writer with a fixed 44-byte header.
//!
//! The header goes out with zero sizes when recording starts; `finalize`
//! seeks back and patches the RIFF and data sizes.

use std::io::{Seek, SeekFrom, Write};

use crate::recorder::RecorderError;

pub const HEADER_LEN: usize = 44;
const RIFF_SIZE_OFFSET: u64 = 4;
const DATA_SIZE_OFFSET: u64 = 40;
/// Largest data chunk whose RIFF size still fits in a u32
const MAX_DATA_BYTES: u64 = u32::MAX as u64 - 36;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

/// Header fields read back from a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedHeader {
    pub header: WavHeader,
    pub riff_size: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub data_size: u32,
}

impl WavHeader {
    pub fn pcm16(channels: u16, sample_rate: u32) -> Self {
        Self { channels, sample_rate, bits_per_sample: 16 }
    }

    pub fn block_align(&self) -> u16 {
        self.channels * self.bits_per_sample / 8
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }

    pub fn encode(&self, data_size: u32) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(b"RIFF");
        out[4..8].copy_from_slice(&(36u32.saturating_add(data_size)).to_le_bytes());
        out[8..12].copy_from_slice(b"WAVE");
        out[12..16].copy_from_slice(b"fmt ");
        out[16..20].copy_from_slice(&16u32.to_le_bytes());
        out[20..22].copy_from_slice(&1u16.to_le_bytes()); // PCM
        out[22..24].copy_from_slice(&self.channels.to_le_bytes());
        out[24..28].copy_from_slice(&self.sample_rate.to_le_bytes());
        out[28..32].copy_from_slice(&self.byte_rate().to_le_bytes());
        out[32..34].copy_from_slice(&self.block_align().to_le_bytes());
        out[34..36].copy_from_slice(&self.bits_per_sample.to_le_bytes());
        out[36..40].copy_from_slice(b"data");
        out[40..44].copy_from_slice(&data_size.to_le_bytes());
        out
    }

    /// Parse a canonical 44-byte PCM header
    pub fn parse(bytes: &[u8]) -> Option<ParsedHeader> {
        if bytes.len() < HEADER_LEN
            || &bytes[0..4] != b"RIFF"
            || &bytes[8..12] != b"WAVE"
            || &bytes[12..16] != b"fmt "
            || &bytes[36..40] != b"data"
        {
            return None;
        }
        let u16_at = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);
        let u32_at = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        if u32_at(16) != 16 || u16_at(20) != 1 {
            return None;
        }
        Some(ParsedHeader {
            header: WavHeader {
                channels: u16_at(22),
                sample_rate: u32_at(24),
                bits_per_sample: u16_at(34),
            },
            riff_size: u32_at(4),
            byte_rate: u32_at(28),
            block_align: u16_at(32),
            data_size: u32_at(40),
        })
    }
}

/// Convert a float sample to 16-bit PCM, clamping out-of-range input
#[inline]
pub fn sample_to_i16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

pub struct WavWriter<W: Write + Seek> {
    inner: W,
    header: WavHeader,
    data_bytes: u64,
}

impl<W: Write + Seek> WavWriter<W> {
    /// Write the provisional header
    pub fn new(mut inner: W, header: WavHeader) -> Result<Self, RecorderError> {
        inner.write_all(&header.encode(0))?;
        Ok(Self { inner, header, data_bytes: 0 })
    }

    pub fn header(&self) -> WavHeader {
        self.header
    }

    pub fn data_bytes(&self) -> u64 {
        self.data_bytes
    }

    pub fn frames(&self) -> u64 {
        self.data_bytes / self.header.block_align().max(1) as u64
    }

    /// Append interleaved samples
    pub fn write_samples(&mut self, samples: &[f32]) -> Result<(), RecorderError> {
        let bytes = samples.len() as u64 * 2;
        if self.data_bytes + bytes > MAX_DATA_BYTES {
            return Err(RecorderError::ContainerFull);
        }
        let mut scratch = [0u8; 1024];
        for chunk in samples.chunks(scratch.len() / 2) {
            for (pair, &sample) in scratch.chunks_exact_mut(2).zip(chunk) {
                pair.copy_from_slice(&sample_to_i16(sample).to_le_bytes());
            }
            self.inner.write_all(&scratch[..chunk.len() * 2])?;
        }
        self.data_bytes += bytes;
        Ok(())
    }

    /// Patch both size fields and flush. Returns the inner writer and the
    /// number of data bytes written.
    pub fn finalize(mut self) -> Result<(W, u64), RecorderError> {
        let data_size = self.data_bytes as u32;
        self.inner.seek(SeekFrom::Start(RIFF_SIZE_OFFSET))?;
        self.inner.write_all(&(36 + data_size).to_le_bytes())?;
        self.inner.seek(SeekFrom::Start(DATA_SIZE_OFFSET))?;
        self.inner.write_all(&data_size.to_le_bytes())?;
        self.inner.seek(SeekFrom::End(0))?;
        self.inner.flush()?;
        Ok((self.inner, self.data_bytes))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_header_layout() {
        let header = WavHeader::pcm16(2, 44100);
        let bytes = header.encode(0);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 36);
        assert_eq!(u32::from_le_bytes(bytes[28..32].try_into().unwrap()), 44100 * 2 * 2);
        assert_eq!(u16::from_le_bytes(bytes[32..34].try_into().unwrap()), 4);
        assert_eq!(u16::from_le_bytes(bytes[34..36].try_into().unwrap()), 16);
        assert_eq!(&bytes[36..40], b"data");
    }

    #[test]
    fn test_finalize_patches_sizes() {
        let mut writer = WavWriter::new(Cursor::new(Vec::new()), WavHeader::pcm16(2, 48000)).unwrap();
        writer.write_samples(&[0.0, 0.5, -0.5, 1.0, -1.0, 2.0]).unwrap();
        assert_eq!(writer.frames(), 3);
        let (cursor, data_bytes) = writer.finalize().unwrap();
        let bytes = cursor.into_inner();

        assert_eq!(data_bytes, 12);
        assert_eq!(bytes.len(), HEADER_LEN + 12);
        let parsed = WavHeader::parse(&bytes).unwrap();
        assert_eq!(parsed.data_size, 12);
        assert_eq!(parsed.riff_size, 36 + 12);
        assert_eq!(parsed.header, WavHeader::pcm16(2, 48000));

        let samples: Vec<i16> = bytes[HEADER_LEN..]
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(samples, vec![0, 16384, -16384, 32767, -32767, 32767]);
    }

    #[test]
    fn test_sample_conversion() {
        assert_eq!(sample_to_i16(0.0), 0);
        assert_eq!(sample_to_i16(1.5), i16::MAX);
        assert_eq!(sample_to_i16(-1.5), -i16::MAX);
        assert_eq!(sample_to_i16(f32::NAN), 0);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(WavHeader::parse(b"RIFX").is_none());
        let mut bytes = WavHeader::pcm16(1, 8000).encode(0);
        bytes[20] = 3;
        assert!(WavHeader::parse(&bytes).is_none());
    }
}
