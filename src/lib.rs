// Copyright 2022 Google LLC
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

#![doc = include_str!("../README.md")]
// Note that clippy attributes should be in sync with those declared in "main.rs"
#![warn(clippy::all, clippy::nursery, clippy::pedantic, clippy::cargo)]
// Some of clippy::pedantic rules are actually useful, so use it with a lot of
// ad-hoc exceptions.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::missing_const_for_fn,
    clippy::multiple_crate_versions,
    clippy::must_use_candidate,
    clippy::wildcard_dependencies
)]
// Some from restriction lint-group
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::create_dir,
    clippy::dbg_macro,
    clippy::empty_structs_with_brackets,
    clippy::exit,
    clippy::if_then_some_else_none,
    clippy::impl_trait_in_params,
    clippy::let_underscore_must_use,
    clippy::lossy_float_literal,
    clippy::multiple_inherent_impl,
    clippy::print_stdout,
    clippy::rc_buffer,
    clippy::rc_mutex,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::separated_literal_suffix,
    clippy::str_to_string,
    clippy::string_add,
    clippy::string_to_string,
    clippy::try_err,
    clippy::unnecessary_self_imports,
    clippy::wildcard_enum_match_arm
)]

pub mod bitshift;
pub mod bitsink;
pub mod bitsource;
pub(crate) mod coding;
pub mod component;
pub mod config;
pub mod constant;
pub mod decoder;
pub mod error;
pub(crate) mod history;
pub mod lpc;
#[cfg(feature = "par")]
pub(crate) mod par;
pub mod predictor;
pub mod rice;
pub mod seek;
pub mod source;

#[cfg(test)]
pub(crate) mod test_helper;

#[cfg(feature = "mimalloc")]
use mimalloc::MiMalloc;
#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// import global entry points
pub use coding::encode;
pub use coding::encode_with_verbatim;
pub use decoder::decode;

#[cfg(test)]
mod test {
    // end-to-end, but transparent test.
    use super::*;
    use rstest::rstest;

    use source::PreloadedSignal;

    const CONFIGS: [&str; 6] = [
        "",
        r"
block_size = 512
        ",
        r"
block_size = 123
max_lpc_order = 8
        ",
        r"
max_lpc_order = 32
mean_blocks = 0
[qlpc]
order_search_width = 2
        ",
        r"
multithread = false
max_lpc_order = 4
        ",
        r"
block_size = 64
[fixed]
max_order = 1
[rice]
max_parameter = 8
        ",
    ];

    #[rstest]
    fn e2e_with_generated_sinusoids(
        #[values(1, 2, 3, 5)] channels: usize,
        #[values(CONFIGS[0], CONFIGS[1], CONFIGS[2], CONFIGS[3], CONFIGS[4], CONFIGS[5])]
        config: &str,
    ) {
        let signal_len = 4123;
        let channel_signals: Vec<Vec<i32>> = (0..channels)
            .map(|ch| {
                test_helper::sinusoid_plus_noise(signal_len, 36, 10000.0, 123, ch as u64)
            })
            .collect();
        let signal = test_helper::interleave(&channel_signals);
        let config: config::Encoder = toml::from_str(config).expect("config parsing error");
        let src = PreloadedSignal::from_samples(&signal, channels, 16);
        test_helper::integrity_test(&config, &src, b"RIFF header", b"trailer");
    }

    #[rstest]
    fn e2e_for_each_version(#[values(1, 2, 3)] version: u8, #[values(0, 16)] max_lpc_order: usize) {
        let config = config::Encoder {
            max_lpc_order,
            ..config::Encoder::for_version(version)
        };
        let left = test_helper::sinusoid_plus_noise(3000, 50, 8000.0, 40, 1);
        let right = test_helper::constant_plus_noise(3000, -1500, 3, 2);
        let signal = test_helper::interleave(&[left, right]);
        let src = PreloadedSignal::from_samples(&signal, 2, 16);
        let bytes = test_helper::integrity_test(&config, &src, &[], &[]);
        assert_eq!(bytes[4], version);
    }

    #[rstest]
    fn e2e_with_unsigned_file_types(
        #[values(component::FileType::U8, component::FileType::U16LH)] file_type: component::FileType,
    ) {
        let center = file_type.initial_offset();
        let signal: Vec<i32> = test_helper::sinusoid_plus_noise(2000, 40, 100.0, 2, 9)
            .into_iter()
            .map(|v| v + center)
            .collect();
        let src = PreloadedSignal::from_samples(&signal, 1, 16).with_file_type(file_type);
        test_helper::integrity_test(&config::Encoder::default(), &src, &[], &[]);
    }

    #[test]
    fn e2e_with_shifted_and_silent_blocks() {
        let mut signal = vec![];
        for t in 0..256 * 12 {
            let block = t / 256;
            let v = match block % 4 {
                0 => 0,
                1 => (t as i32 % 97 - 48) << 3,
                2 => (t as i32 % 31 - 15) << 9,
                _ => t as i32 % 101 - 50,
            };
            signal.push(v);
        }
        let src = PreloadedSignal::from_samples(&signal, 1, 24);
        let bytes = test_helper::integrity_test(&config::Encoder::default(), &src, &[], &[]);
        // long silence compresses to a few bits per block.
        assert!(bytes.len() < signal.len());
    }

    #[test]
    fn e2e_with_extreme_samples() {
        let mut signal = test_helper::white_noise(2000, 1 << 23, 11);
        signal[5] = 1 << 24;
        signal[6] = -(1 << 24);
        let config = config::Encoder {
            max_lpc_order: 16,
            ..config::Encoder::default()
        };
        let src = PreloadedSignal::from_samples(&signal, 1, 24);
        test_helper::integrity_test(&config, &src, &[], &[]);
    }

    #[rstest]
    fn unsupported_versions_are_rejected(#[values(0, 4, 255)] version: u8) {
        let signal = test_helper::white_noise(300, 1000, 5);
        let src = PreloadedSignal::from_samples(&signal, 1, 16);
        let mut bytes = encode(&config::Encoder::default(), src).expect("encoding failed");
        assert!(decode(&bytes).is_ok());
        bytes[4] = version;
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, crate::error::DecodeError::Format(_)));
    }

    #[test]
    fn empty_source_yields_valid_stream() {
        let src = PreloadedSignal::from_samples(&[], 2, 16);
        let bytes = test_helper::integrity_test(&config::Encoder::default(), &src, b"head", &[]);
        assert_eq!(bytes.len() % 4, (4 + 1) % 4);
    }

    #[test]
    fn decoded_original_bytes_restore_container() {
        let signal = test_helper::white_noise(600, 1 << 15, 3);
        let src = PreloadedSignal::from_samples(&signal, 2, 16);
        let bytes = encode_with_verbatim(&config::Encoder::default(), src, b"HEAD", b"TAIL")
            .expect("encoding failed");
        let decoded = decode(&bytes).expect("decoding failed");
        let original = decoded.original_bytes();
        assert_eq!(&original[..4], b"HEAD");
        assert_eq!(&original[original.len() - 4..], b"TAIL");
        assert_eq!(original.len(), 8 + 600 * 2);
        let first = i16::from_le_bytes([original[4], original[5]]);
        assert_eq!(i32::from(first), signal[0]);
    }

    #[test]
    fn seek_entries_from_decoding_are_serializable() {
        let signal = test_helper::sinusoid_plus_noise(256 * 250, 64, 2000.0, 4, 8);
        let src = PreloadedSignal::from_samples(&signal, 1, 16);
        let bytes = encode(&config::Encoder::default(), src).expect("encoding failed");
        let decoded = decode(&bytes).expect("decoding failed");
        let entries = decoded.seek_entries().to_vec();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].sample_number, 256 * 200);

        let table = seek::SeekTable::new(bytes.len(), entries);
        let mut file = bytes.clone();
        table.append_to(&mut file);
        let (stream_len, found) = seek::SeekTable::find_appended(&file).expect("table not found");
        assert_eq!(stream_len, bytes.len());
        assert_eq!(found, table);
        // trailing table doesn't affect decoding.
        assert_eq!(decode(&file).expect("decoding failed").samples(), &signal[..]);
    }
}
