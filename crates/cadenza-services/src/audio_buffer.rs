//! Fixed-shape interleaved sample buffer

use cadenza_core::EngineFormat;

/// Interleaved f32 block of `frames * channels` samples.
///
/// The shape is fixed at construction; no method changes the length, so a
/// buffer allocated at track creation is never reallocated on the audio thread.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    channels: usize,
}

impl AudioBuffer {
    pub fn new(frames: usize, channels: usize) -> Self {
        let channels = channels.max(1);
        Self {
            samples: vec![0.0; frames * channels],
            channels,
        }
    }

    pub fn for_format(format: &EngineFormat) -> Self {
        Self::new(format.buffer_frames as usize, format.channels as usize)
    }

    /// Build from existing interleaved samples; trailing partial frames are dropped
    pub fn from_interleaved(mut samples: Vec<f32>, channels: usize) -> Self {
        let channels = channels.max(1);
        samples.truncate(samples.len() / channels * channels);
        Self { samples, channels }
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.samples
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    pub fn silence(&mut self) {
        self.samples.fill(0.0);
    }

    /// Copy from `src`, zero-filling whatever `src` does not cover
    pub fn copy_from(&mut self, src: &[f32]) {
        let n = src.len().min(self.samples.len());
        self.samples[..n].copy_from_slice(&src[..n]);
        self.samples[n..].fill(0.0);
    }

    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    pub fn is_finite(&self) -> bool {
        self.samples.iter().all(|s| s.is_finite())
    }

    pub fn frames_iter(&self) -> std::slice::ChunksExact<'_, f32> {
        self.samples.chunks_exact(self.channels)
    }

    pub fn frames_iter_mut(&mut self) -> std::slice::ChunksExactMut<'_, f32> {
        self.samples.chunks_exact_mut(self.channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape() {
        let buf = AudioBuffer::for_format(&EngineFormat::new(44100, 2, 256));
        assert_eq!(buf.frames(), 256);
        assert_eq!(buf.channels(), 2);
        assert_eq!(buf.len(), 512);
    }

    #[test]
    fn test_copy_from_short_source_zero_fills() {
        let mut buf = AudioBuffer::new(4, 2);
        buf.as_mut_slice().fill(1.0);
        buf.copy_from(&[0.5, 0.5, 0.25]);
        assert_eq!(buf.as_slice(), &[0.5, 0.5, 0.25, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn test_from_interleaved_drops_partial_frame() {
        let buf = AudioBuffer::from_interleaved(vec![0.1, 0.2, 0.3], 2);
        assert_eq!(buf.frames(), 1);
        assert_eq!(buf.peak(), 0.2);
    }
}
