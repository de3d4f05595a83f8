/*!
Frame data structure and raw frame decoding.

The grab console saves each acquisition as a headerless buffer of 16-bit
samples. [`decode`] turns such a buffer into a [`Frame`] of exactly
`pixel_count` samples; trailing bytes are ignored.
*/

use crate::error::DecodeError;
use crate::protocol::{ByteOrder, BYTES_PER_SAMPLE, FRAME_BYTE_ORDER};
use serde::Serialize;
use std::path::Path;

/// One line-scan acquisition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    samples: Vec<u16>,
}

impl Frame {
    /// Create a frame from already decoded samples
    pub fn new(samples: Vec<u16>) -> Self {
        Self { samples }
    }

    /// Decode a frame from a raw byte buffer
    pub fn from_bytes(data: &[u8], pixel_count: usize) -> Result<Self, DecodeError> {
        decode(data, pixel_count)
    }

    /// Load and decode a frame file written by the grab console
    pub fn from_file<P: AsRef<Path>>(path: P, pixel_count: usize) -> Result<Self, DecodeError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| DecodeError::Io {
            path: path.display().to_string(),
            source,
        })?;

        decode(&data, pixel_count)
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the frame holds no samples
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Borrow the samples
    pub fn samples(&self) -> &[u16] {
        &self.samples
    }

    /// Consume the frame, returning its samples
    pub fn into_samples(self) -> Vec<u16> {
        self.samples
    }

    /// Arithmetic mean of all samples, 0.0 for an empty frame
    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.samples.iter().map(|&s| u64::from(s)).sum();
        sum as f64 / self.samples.len() as f64
    }

    /// Encode the frame in the frame-file format
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * BYTES_PER_SAMPLE);
        for &sample in &self.samples {
            let pair = match FRAME_BYTE_ORDER {
                ByteOrder::Little => sample.to_le_bytes(),
                ByteOrder::Big => sample.to_be_bytes(),
            };
            bytes.extend_from_slice(&pair);
        }
        bytes
    }
}

impl AsRef<[u16]> for Frame {
    fn as_ref(&self) -> &[u16] {
        &self.samples
    }
}

/// Decode `pixel_count` samples from the start of `buffer`.
///
/// Fails with [`DecodeError::TruncatedFrame`] if `buffer` holds fewer than
/// `2 * pixel_count` bytes. Never allocates more than `pixel_count` samples.
pub fn decode(buffer: &[u8], pixel_count: usize) -> Result<Frame, DecodeError> {
    let expected = pixel_count * BYTES_PER_SAMPLE;
    if buffer.len() < expected {
        return Err(DecodeError::TruncatedFrame {
            expected,
            actual: buffer.len(),
        });
    }

    let samples = buffer[..expected]
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| {
            let pair = [pair[0], pair[1]];
            match FRAME_BYTE_ORDER {
                ByteOrder::Little => u16::from_le_bytes(pair),
                ByteOrder::Big => u16::from_be_bytes(pair),
            }
        })
        .collect();

    Ok(Frame { samples })
}
