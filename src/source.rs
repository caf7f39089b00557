// Copyright 2022-2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Module for input source handling.

use super::component::FileType;
use super::error::SourceError;
use super::error::SourceErrorReason;

/// Reorder interleaved samples into a deinterleaved pattern.
pub fn deinterleave(interleaved: &[i32], channels: usize, dest: &mut [i32]) {
    let samples = dest.len() / channels;
    let src_samples = interleaved.len() / channels;
    for t in 0..samples {
        for ch in 0..channels {
            dest[samples * ch + t] = if t < src_samples {
                interleaved[channels * t + ch]
            } else {
                0i32
            }
        }
    }
}

/// Reusable buffer for multi-channel blocks.
#[derive(Clone, Debug)]
pub struct FrameBuf {
    samples: Vec<i32>,
    channels: usize,
    size: usize,
}

impl FrameBuf {
    /// Constructs `FrameBuf` of the specified size.
    pub fn with_size(channels: usize, size: usize) -> Self {
        Self {
            samples: vec![0i32; size * channels],
            channels,
            size,
        }
    }

    /// Returns the size in the number of inter-channel samples.
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Fill first samples from the interleaved slice, and resets rest.
    pub fn fill_from_interleaved(&mut self, interleaved: &[i32]) {
        deinterleave(interleaved, self.channels, &mut self.samples);
    }

    /// Returns the number of channels
    pub const fn channels(&self) -> usize {
        self.channels
    }

    /// Returns samples from the given channel.
    pub fn channel_slice(&self, ch: usize) -> &[i32] {
        &self.samples[ch * self.size..(ch + 1) * self.size]
    }

    /// Returns the internal representation of multichannel signals.
    #[cfg(test)]
    pub fn raw_slice(&self) -> &[i32] {
        &self.samples
    }
}

/// Trait for the sample producers fed to the encoder.
pub trait Source {
    /// Returns the number of channels.
    fn channels(&self) -> usize;
    /// Returns the number of bits per sample;
    fn bits_per_sample(&self) -> usize;
    /// Returns the sample format recorded in the stream header if known.
    fn file_type(&self) -> Option<FileType> {
        None
    }
    /// Reads samples to the buffer.
    ///
    /// Returns the number of inter-channel samples read. Zero means the end
    /// of the source.
    #[allow(clippy::missing_errors_doc)]
    fn read_samples(&mut self, dest: &mut FrameBuf) -> Result<usize, SourceError>;
    /// Returns length of source if it's defined.
    fn len_hint(&self) -> Option<usize> {
        None
    }
}

/// Source with preloaded samples.
#[derive(Clone, Debug)]
pub struct PreloadedSignal {
    pub channels: usize,
    pub bits_per_sample: usize,
    pub file_type: Option<FileType>,
    pub samples: Vec<i32>,
    pub read_head: usize,
}

impl PreloadedSignal {
    /// Constructs `PreloadedSignal` from interleaved samples.
    ///
    /// # Examples
    ///
    /// ```
    /// # use shnenc::source::*;
    /// let signal = PreloadedSignal::from_samples(&[1, -1, 2, -2], 2, 16);
    /// assert_eq!(signal.len(), 2);
    /// ```
    pub fn from_samples(samples: &[i32], channels: usize, bits_per_sample: usize) -> Self {
        Self {
            channels,
            bits_per_sample,
            file_type: None,
            samples: samples.to_owned(),
            read_head: 0,
        }
    }

    /// Sets the sample format recorded in the stream header.
    #[must_use]
    pub fn with_file_type(self, file_type: FileType) -> Self {
        Self {
            file_type: Some(file_type),
            ..self
        }
    }

    /// Returns sample buffer as a raw slice.
    pub fn as_raw_slice(&self) -> &[i32] {
        &self.samples
    }

    /// Gets the length in inter-channel samples
    pub fn len(&self) -> usize {
        self.samples.len() / self.channels
    }

    /// Returns `true` if the source contains no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Source for PreloadedSignal {
    fn channels(&self) -> usize {
        self.channels
    }

    fn bits_per_sample(&self) -> usize {
        self.bits_per_sample
    }

    fn file_type(&self) -> Option<FileType> {
        self.file_type
    }

    fn read_samples(&mut self, dest: &mut FrameBuf) -> Result<usize, SourceError> {
        if dest.channels() != self.channels {
            return Err(SourceError::by_reason(SourceErrorReason::InvalidBuffer));
        }
        let to_read = dest.size() * self.channels;
        let begin = std::cmp::min(self.read_head * self.channels, self.samples.len());
        let end = std::cmp::min(begin + to_read, self.samples.len());
        let src = &self.samples[begin..end];

        dest.fill_from_interleaved(src);
        let read = src.len() / self.channels;
        self.read_head += read;
        Ok(read)
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.len())
    }
}

#[cfg(test)]
#[allow(clippy::pedantic, clippy::nursery, clippy::needless_range_loop)]
mod tests {
    use super::*;

    #[test]
    fn reading_and_deinterleaving() {
        let mut signal = vec![];
        let block_size = 512;
        let channels = 4;
        for t in 0..block_size {
            for ch in 0..channels {
                signal.push(ch as i32 * 1000 + t as i32);
            }
        }
        let mut src = PreloadedSignal::from_samples(&signal, channels, 16);
        let mut framebuf = FrameBuf::with_size(channels, block_size);
        let read = src.read_samples(&mut framebuf).unwrap();
        assert_eq!(read, block_size);
        for ch in 0..channels {
            for t in 0..block_size {
                assert_eq!(framebuf.channel_slice(ch)[t], ch as i32 * 1000 + t as i32);
            }
        }
        assert_eq!(framebuf.raw_slice().len(), block_size * channels);
    }

    #[test]
    fn sequential_read_with_short_tail() {
        let signal: Vec<i32> = (0..10).collect();
        let mut src = PreloadedSignal::from_samples(&signal, 2, 8);
        let mut framebuf = FrameBuf::with_size(2, 3);
        assert_eq!(src.read_samples(&mut framebuf).unwrap(), 3);
        assert_eq!(framebuf.channel_slice(0), &[0, 2, 4]);
        assert_eq!(src.read_samples(&mut framebuf).unwrap(), 2);
        assert_eq!(framebuf.channel_slice(1), &[7, 9, 0]);
        assert_eq!(src.read_samples(&mut framebuf).unwrap(), 0);
    }

    #[test]
    fn channel_mismatch_is_error() {
        let mut src = PreloadedSignal::from_samples(&[0; 8], 2, 16);
        let mut framebuf = FrameBuf::with_size(1, 4);
        assert!(src.read_samples(&mut framebuf).is_err());
    }
}
