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

// Note that clippy attributes should be in sync with those declared in "lib.rs"
#![warn(clippy::all, clippy::nursery, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::multiple_crate_versions,
    clippy::must_use_candidate
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

use std::fs::File;
use std::io::Write;
use std::time::Instant;

use clap::Parser;
use log::info;

use shnenc::config;
use shnenc::error::EncodeError;
use shnenc::error::Verify;
use shnenc::seek::SeekTable;

mod display;
mod source;

use display::Progress;
use source::WavSource;

/// Shorten encoder.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path for the output Shorten file.
    #[clap(short, long)]
    output: String,
    /// Path for the input WAV file.
    source: String,
    /// If set, load config from the specified file.
    #[clap(short, long)]
    config: Option<String>,
    /// If set, dump the config used to the specified path.
    #[clap(long)]
    dump_config: Option<String>,
    /// If set, append a seek table to the output.
    #[clap(long)]
    seek_table: bool,
}

/// Exit codes of the encoder process.
enum ExitCode {
    #[allow(dead_code)]
    Normal = 0,
    InvalidConfig = -1,
}

fn run_encoder(encoder_config: &config::Encoder, source: WavSource) -> Result<Vec<u8>, EncodeError> {
    let head = source.head().to_vec();
    let tail = source.tail().to_vec();
    shnenc::encode_with_verbatim(encoder_config, source, &head, &tail)
}

/// Decodes `stream` and appends a seek table built from the decoder states.
///
/// Returns the number of entries appended.
#[allow(clippy::expect_used)]
fn append_seek_table(stream: &mut Vec<u8>) -> usize {
    let decoded = shnenc::decode(stream).expect("Failed to decode the encoded stream.");
    let table = SeekTable::new(stream.len(), decoded.seek_entries().to_vec());
    table.append_to(stream);
    table.entries.len()
}

fn log_build_constants() {
    info!(
        target: "shnenc-bin::build_info::jsonl",
        "{{ version: \"{}\", features: \"{}\", profile: \"{}\", rustc: \"{}\" }}",
        shnenc::constant::build_info::CRATE_VERSION,
        shnenc::constant::build_info::FEATURES,
        shnenc::constant::build_info::BUILD_PROFILE,
        shnenc::constant::build_info::RUSTC_VERSION,
    );
}

#[allow(clippy::let_underscore_must_use)]
fn main_body(args: Args) -> Result<(), i32> {
    let io_info = display::IoArgs::new(&args.config, &args.source, &args.output);
    let _ = display::show_banner();
    log_build_constants();
    let encoder_config = args.config.map_or_else(config::Encoder::default, |path| {
        let conf_str = std::fs::read_to_string(path).expect("Config file read error.");
        toml::from_str(&conf_str).expect("Config file syntax error.")
    });
    if let Err(e) = encoder_config.verify() {
        eprintln!("Error: {}", e.within("encoder_config"));
        return Err(ExitCode::InvalidConfig as i32);
    }

    let _ = display::show_progress(&io_info, &Progress::Started);

    let source = WavSource::from_path(&args.source).expect("Failed to load input source.");
    let source_bytes = source.file_size();
    let source_duration_secs = source.duration_as_secs();
    let encoder_start = Instant::now();

    let mut stream = run_encoder(&encoder_config, source).expect("Encoder error.");
    let seek_entries = args.seek_table.then(|| append_seek_table(&mut stream));

    if let Some(path) = args.dump_config {
        let mut file = File::create(path).expect("Failed to create a file.");
        file.write_all(toml::to_string(&encoder_config).unwrap().as_bytes())
            .expect("File write failed.");
    }

    let mut file = File::create(args.output).expect("Failed to create a file.");
    file.write_all(&stream)
        .expect("Failed to write a bitstream to the file.");

    let encode_time = encoder_start.elapsed();
    let _ = display::show_progress(
        &io_info,
        &Progress::Done {
            encode_time,
            bytes_written: stream.len(),
            source_bytes,
            source_duration_secs,
            seek_entries,
        },
    );
    Ok(())
}

#[allow(clippy::expect_used)]
fn main() -> Result<(), i32> {
    env_logger::Builder::from_env("SHNENC_LOG")
        .format_timestamp(None)
        .init();
    main_body(Args::parse())
}
