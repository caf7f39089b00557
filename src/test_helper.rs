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

#![allow(clippy::missing_panics_doc)]

use std::io::Write;

use rand::distributions::Distribution;
use rand::distributions::Uniform;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::NamedTempFile;

use super::coding;
use super::config;
use super::decoder;
use super::source::PreloadedSignal;
use super::source::Source;

/// Generates a sinusoid with uniform noise in `[-noise_width, noise_width]`.
pub fn sinusoid_plus_noise(
    block_size: usize,
    period: usize,
    amplitude: f32,
    noise_width: i32,
    seed: u64,
) -> Vec<i32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Uniform::from(-noise_width..=noise_width);
    let mut ret = Vec::with_capacity(block_size);
    for t in 0..block_size {
        let phase = 2.0 * std::f32::consts::PI * t as f32 / period as f32;
        let sin = (amplitude * phase.sin()).round() as i32;
        ret.push(sin + noise.sample(&mut rng));
    }
    ret
}

/// Generates uniform white noise in `[-amplitude, amplitude)`.
pub fn white_noise(len: usize, amplitude: i32, seed: u64) -> Vec<i32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let dist = Uniform::from(-amplitude..amplitude);
    (0..len).map(|_| dist.sample(&mut rng)).collect()
}

/// Generates a constant signal with uniform noise in `[-noise_width, noise_width]`.
pub fn constant_plus_noise(len: usize, constant: i32, noise_width: i32, seed: u64) -> Vec<i32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Uniform::from(-noise_width..=noise_width);
    (0..len).map(|_| constant + noise.sample(&mut rng)).collect()
}

/// Interleaves per-channel signals of the same length.
pub fn interleave(channel_signals: &[Vec<i32>]) -> Vec<i32> {
    let len = channel_signals[0].len();
    let mut ret = Vec::with_capacity(len * channel_signals.len());
    for t in 0..len {
        for ch in channel_signals {
            ret.push(ch[t]);
        }
    }
    ret
}

/// Runs an integrity test over the encoder.
///
/// This encodes `src` with `head` and `tail` passed through, stores the
/// stream in a temporary file, decodes it, and compares the samples and the
/// pass-through bytes with the originals.
pub fn integrity_test(
    config: &config::Encoder,
    src: &PreloadedSignal,
    head: &[u8],
    tail: &[u8],
) -> Vec<u8> {
    let bytes = coding::encode_with_verbatim(config, src.clone(), head, tail)
        .expect("Encoding failed.");

    let mut file = NamedTempFile::new().expect("Failed to create temp file.");
    file.write_all(&bytes).expect("File write failed.");
    let path = file.into_temp_path();
    let loaded = std::fs::read(&path).expect("File read failed.");
    assert_eq!(loaded, bytes);

    let decoded = decoder::decode(&loaded).expect("Decoding failed.");
    assert_eq!(decoded.header().channels(), src.channels());

    let channels = src.channels();
    let expected = src.as_raw_slice();
    let actual = decoded.samples();
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert_eq!(
            a,
            e,
            "Failed at t={} of ch={}",
            i / channels,
            i % channels
        );
    }

    let mut passthrough = head.to_vec();
    passthrough.extend_from_slice(tail);
    assert_eq!(decoded.verbatim_bytes(), &passthrough[..]);
    bytes
}
