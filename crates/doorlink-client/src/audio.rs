//! Microphone capture boundary.
//!
//! Capture itself happens outside this crate. These helpers turn float
//! samples into the 16-bit little-endian PCM chunks that
//! [`DeviceSession::send_audio`](crate::DeviceSession::send_audio) frames on
//! channel 0.

/// Sample rate expected by the lock, in Hz.
pub const SAMPLE_RATE: u32 = 24_000;

/// Samples per chunk; 100 ms at [`SAMPLE_RATE`].
pub const DEFAULT_CHUNK_SAMPLES: usize = 2_400;

/// Clamps to `[-1, 1]` and scales onto the asymmetric `i16` range.
pub fn quantize_sample(sample: f32) -> i16 {
    let s = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

pub fn quantize(samples: &[f32]) -> Vec<i16> {
    samples.iter().copied().map(quantize_sample).collect()
}

/// Serializes samples as 16-bit little-endian PCM.
pub fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Reads raw 32-bit little-endian float samples. A trailing partial sample
/// is ignored.
pub fn f32_samples(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Accumulates float samples into fixed-size quantized chunks.
#[derive(Debug, Clone)]
pub struct PcmChunker {
    chunk_samples: usize,
    buffer: Vec<i16>,
}

impl Default for PcmChunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SAMPLES)
    }
}

impl PcmChunker {
    /// A chunk size of zero is treated as one sample.
    pub fn new(chunk_samples: usize) -> Self {
        let chunk_samples = chunk_samples.max(1);
        Self {
            chunk_samples,
            buffer: Vec::with_capacity(chunk_samples),
        }
    }

    pub fn chunk_samples(&self) -> usize {
        self.chunk_samples
    }

    /// Samples held back waiting for a full chunk.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Adds samples and returns every chunk completed by them.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<i16>> {
        let mut chunks = Vec::new();
        for &sample in samples {
            self.buffer.push(quantize_sample(sample));
            if self.buffer.len() == self.chunk_samples {
                let full = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.chunk_samples));
                chunks.push(full);
            }
        }
        chunks
    }

    /// Returns the partial chunk, if any, emptying the buffer.
    pub fn flush(&mut self) -> Option<Vec<i16>> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}
