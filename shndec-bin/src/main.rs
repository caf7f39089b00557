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
use std::sync::Arc;

use clap::Parser;
use log::info;

use shnenc::seek::SeekEntry;
use shnenc::seek::SeekTable;

use termcolor::ColorChoice;
use termcolor::ColorSpec;
use termcolor::StandardStream;
use termcolor::WriteColor;

/// Version of the decoder binary.
const CRATE_VERSION: &str = match option_env!("CARGO_PKG_VERSION") {
    Some(v) => v,
    None => "unknown",
};

/// Exit codes of the decoder process.
enum ExitCode {
    #[allow(dead_code)]
    Normal = 0,
    DecodeFailed = -1,
}

/// Shorten decoder.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path for the output file restored from the stream.
    #[clap(short, long)]
    output: Option<String>,
    /// If set, show a summary of the seek table.
    #[clap(long)]
    seek_table: bool,
    /// Path for the input Shorten file.
    source: String,
}

/// Obtains `termcolor::StandardStream` for the default outputs.
fn terminal_output() -> Arc<termcolor::StandardStream> {
    Arc::new(StandardStream::stderr(ColorChoice::Auto))
}

/// Shows program banner.
///
/// # Errors
///
/// Propagates unknown I/O errors.
pub fn show_banner() -> Result<(), std::io::Error> {
    let termout = terminal_output();
    let mut termout = termout.lock();
    termout.set_color(ColorSpec::new().set_bold(true))?;
    write!(termout, "\n{:>10} ", "shndec")?;
    termout.reset()?;
    writeln!(
        termout,
        "(decCLI v{}, engine v{})",
        CRATE_VERSION,
        shnenc::constant::build_info::CRATE_VERSION,
    )?;
    termout.set_color(ColorSpec::new().set_dimmed(true))?;
    writeln!(
        termout,
        "{:>10} [{}]",
        "",
        shnenc::constant::build_info::FEATURES
    )?;
    termout.reset()
}

/// Shows a summary of seek entries.
///
/// # Errors
///
/// Propagates unknown I/O errors.
fn show_seek_summary(origin: &str, entries: &[SeekEntry]) -> Result<(), std::io::Error> {
    let termout = terminal_output();
    let mut termout = termout.lock();
    termout.set_color(ColorSpec::new().set_bold(true))?;
    write!(termout, "{:>10} ", "Seek")?;
    termout.reset()?;
    writeln!(termout, "{} entries ({origin})", entries.len())?;
    for entry in entries {
        writeln!(
            termout,
            "{:>10} sample={} byte={} bit={} shift={}",
            "",
            entry.sample_number,
            entry.byte_offset,
            entry.bit_offset,
            entry.bitshift
        )?;
    }
    Ok(())
}

#[allow(clippy::let_underscore_must_use)]
fn main_body(args: Args) -> Result<(), i32> {
    let _ = show_banner();

    let bytes = std::fs::read(&args.source).expect("Could not read the input file.");
    let appended = SeekTable::find_appended(&bytes);
    let decoded = match shnenc::decode(&bytes) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Error: {e}");
            return Err(ExitCode::DecodeFailed as i32);
        }
    };
    let header = decoded.header();
    info!(
        "Decoded {} samples of {} channels (version {}, {:?}).",
        decoded.samples().len() / header.channels(),
        header.channels(),
        header.version(),
        header.file_type(),
    );

    if args.seek_table {
        let _ = match appended {
            Some((_, ref table)) => show_seek_summary("appended", &table.entries),
            None => show_seek_summary("recomputed", decoded.seek_entries()),
        };
    }

    if let Some(path) = args.output {
        let mut file = File::create(path).expect("Failed to create file.");
        file.write_all(decoded.original_bytes())
            .expect("Failed to write");
    }

    Ok(())
}

fn main() -> Result<(), i32> {
    env_logger::Builder::from_env("SHNENC_LOG")
        .format_timestamp(None)
        .init();
    main_body(Args::parse())
}
