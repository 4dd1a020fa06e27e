//! Growable sample buffer for one incoming PCM stream
//!
//! The host delivers 16-bit little-endian mono samples over a byte stream that
//! can be split at arbitrary offsets, so a trailing odd byte is held back until
//! its partner arrives.

use crate::constants::BYTES_PER_SAMPLE;

/// Unconsumed samples of one stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleBuffer {
    samples: Vec<i16>,
    /// Low byte of a sample whose high byte has not arrived yet
    partial: Option<u8>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_samples(samples: Vec<i16>) -> Self {
        Self {
            samples,
            partial: None,
        }
    }

    /// Append raw little-endian bytes as received from the socket
    pub fn extend_from_le_bytes(&mut self, mut bytes: &[u8]) {
        if let Some(lo) = self.partial.take() {
            match bytes.split_first() {
                Some((&hi, rest)) => {
                    self.samples.push(i16::from_le_bytes([lo, hi]));
                    bytes = rest;
                }
                None => {
                    self.partial = Some(lo);
                    return;
                }
            }
        }

        let chunks = bytes.chunks_exact(BYTES_PER_SAMPLE);
        if let [odd] = chunks.remainder() {
            self.partial = Some(*odd);
        }
        self.samples
            .extend(chunks.map(|pair| i16::from_le_bytes([pair[0], pair[1]])));
    }

    /// Number of complete samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty() && self.partial.is_none()
    }

    /// Number of buffered bytes, including a pending odd byte
    pub fn byte_len(&self) -> usize {
        self.samples.len() * BYTES_PER_SAMPLE + usize::from(self.partial.is_some())
    }

    /// Append `count` zero bytes
    pub fn pad_bytes(&mut self, mut count: usize) {
        if count == 0 {
            return;
        }
        if let Some(lo) = self.partial.take() {
            self.samples.push(i16::from_le_bytes([lo, 0]));
            count -= 1;
        }
        let new_len = self.samples.len() + count / BYTES_PER_SAMPLE;
        self.samples.resize(new_len, 0);
        if count % BYTES_PER_SAMPLE == 1 {
            self.partial = Some(0);
        }
    }

    /// Append `count` samples of silence
    pub fn pad_samples(&mut self, count: usize) {
        self.pad_bytes(count * BYTES_PER_SAMPLE);
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [i16] {
        &mut self.samples
    }

    /// Drop the first `count` samples
    pub fn consume(&mut self, count: usize) {
        let count = count.min(self.samples.len());
        self.samples.drain(..count);
    }

    /// Drop everything, including a pending odd byte
    pub fn clear(&mut self) {
        self.samples.clear();
        self.partial = None;
    }
}
