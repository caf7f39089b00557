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

//! A module for signal sources for "shnenc-bin".

use std::io::Cursor;
use std::path::Path;

use shnenc::component::FileType;
use shnenc::error::SourceError;
use shnenc::error::SourceErrorReason;
use shnenc::source::FrameBuf;
use shnenc::source::Source;

/// `shnenc::source::Source` backed by a WAV file loaded in memory.
///
/// hound is only used to parse the WAV header and to locate the first
/// sample. The bytes before and after the sample data are kept so they can
/// be stored verbatim in the compressed stream.
#[allow(clippy::module_name_repetitions)]
pub struct WavSource {
    spec: hound::WavSpec,
    bytes: Vec<u8>,
    data_start: usize,
    data_end: usize,
    bytes_per_sample: usize,
    current_offset: usize,
    interleaved: Vec<i32>,
}

impl WavSource {
    /// Constructs `WavSource` from `path`.
    ///
    /// # Errors
    ///
    /// The function fails when file is not found or has invalid format. Only
    /// 8-bit and 16-bit integer PCM are supported since those are the sample
    /// formats a Shorten stream can describe.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(bytes)
    }

    /// Constructs `WavSource` from the content of a WAV file.
    ///
    /// # Errors
    ///
    /// Same as [`WavSource::from_path`].
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, Box<dyn std::error::Error>> {
        let reader = hound::WavReader::new(Cursor::new(&bytes))?;
        let spec = reader.spec();
        let duration = reader.duration() as usize;
        let data_start = reader.into_inner().position() as usize;

        if spec.sample_format != hound::SampleFormat::Int
            || !(spec.bits_per_sample == 8 || spec.bits_per_sample == 16)
        {
            return Err(Box::new(SourceError::by_reason(
                SourceErrorReason::UnsupportedFormat,
            )));
        }
        let bytes_per_sample = spec.bits_per_sample as usize / 8;
        let data_end = data_start + duration * spec.channels as usize * bytes_per_sample;
        if data_end > bytes.len() {
            return Err(Box::new(SourceError::by_reason(
                SourceErrorReason::InvalidFormat,
            )));
        }
        Ok(Self {
            spec,
            bytes,
            data_start,
            data_end,
            bytes_per_sample,
            current_offset: data_start,
            interleaved: vec![],
        })
    }

    /// Returns the bytes before the first sample.
    pub fn head(&self) -> &[u8] {
        &self.bytes[..self.data_start]
    }

    /// Returns the bytes after the last sample.
    pub fn tail(&self) -> &[u8] {
        &self.bytes[self.data_end..]
    }

    pub fn file_size(&self) -> usize {
        self.bytes.len()
    }

    pub fn duration_as_secs(&self) -> f32 {
        let frame_bytes = self.bytes_per_sample * self.spec.channels as usize;
        ((self.data_end - self.data_start) / frame_bytes) as f32 / self.spec.sample_rate as f32
    }
}

impl Source for WavSource {
    #[inline]
    fn channels(&self) -> usize {
        self.spec.channels as usize
    }

    #[inline]
    fn bits_per_sample(&self) -> usize {
        self.spec.bits_per_sample as usize
    }

    fn file_type(&self) -> Option<FileType> {
        // 8-bit wav is not in two's complement.
        Some(if self.bytes_per_sample == 1 {
            FileType::U8
        } else {
            FileType::S16LH
        })
    }

    fn read_samples(&mut self, dest: &mut FrameBuf) -> Result<usize, SourceError> {
        let frame_bytes = self.bytes_per_sample * self.channels();
        let available = (self.data_end - self.current_offset) / frame_bytes;
        let to_read = std::cmp::min(available, dest.size());
        let end = self.current_offset + to_read * frame_bytes;
        let data = &self.bytes[self.current_offset..end];

        self.interleaved.clear();
        if self.bytes_per_sample == 1 {
            self.interleaved.extend(data.iter().map(|b| i32::from(*b)));
        } else {
            self.interleaved.extend(
                data.chunks_exact(2)
                    .map(|b| i32::from(i16::from_le_bytes([b[0], b[1]]))),
            );
        }
        dest.fill_from_interleaved(&self.interleaved);
        self.current_offset = end;
        Ok(to_read)
    }

    fn len_hint(&self) -> Option<usize> {
        Some((self.data_end - self.data_start) / (self.bytes_per_sample * self.channels()))
    }
}
