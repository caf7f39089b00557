// Copyright 2023-2024 Google LLC
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

#![no_main]

use arbitrary::Arbitrary;
use arbitrary::Unstructured;
use libfuzzer_sys::fuzz_target;

use shnenc::config;
use shnenc::constant;
use shnenc::error::Verify;
use shnenc::lpc::Window;
use shnenc::source::PreloadedSignal;

fn arbitrary_window_config(u: &mut Unstructured) -> Result<Window, arbitrary::Error> {
    match u.int_in_range(0..=1usize)? {
        0 => Ok(Window::Rectangle),
        1 => {
            let alpha = u.int_in_range(0..=i16::MAX)? as f32 / i16::MAX as f32;
            Ok(Window::Tukey { alpha })
        }
        _ => unreachable!(),
    }
}

fn arbitrary_config(u: &mut Unstructured) -> Result<config::Encoder, arbitrary::Error> {
    let version = u.int_in_range(1..=3u8)?;
    let mut config = config::Encoder::for_version(version);
    config.block_size = u.int_in_range(1..=1024usize)?;
    config.max_lpc_order = u.int_in_range(0..=32usize)?;
    if config.max_lpc_order >= config.block_size {
        config.max_lpc_order = 0;
    }
    config.mean_blocks = u.int_in_range(0..=8usize)?;
    config.multithread = false;
    config.fixed.max_order = u.int_in_range(0..=3usize)?;
    config.rice.max_parameter = u.int_in_range(0..=constant::rice::MAX_RICE_PARAMETER)?;
    config.qlpc.window = arbitrary_window_config(u)?;
    Ok(config)
}

fuzz_target!(|data: &[u8]| {
    let mut u = Unstructured::new(data);
    let Ok(config) = arbitrary_config(&mut u) else {
        return;
    };
    assert!(config.verify().is_ok());
    let Ok(channels) = u.int_in_range(1..=4usize) else {
        return;
    };
    let Ok(bits) = u.int_in_range(4..=24u32) else {
        return;
    };
    let mut signal = vec![];
    while let Ok(v) = i32::arbitrary(&mut u) {
        if u.is_empty() {
            break;
        }
        signal.push(v >> (32 - bits));
    }
    signal.truncate(signal.len() / channels * channels);

    let src = PreloadedSignal::from_samples(&signal, channels, bits as usize);
    let bytes = shnenc::encode(&config, src).expect("encoding failed");
    let decoded = shnenc::decode(&bytes).expect("decoding failed");
    assert_eq!(decoded.samples(), &signal[..]);
});
