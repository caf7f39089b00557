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

//! A module for a fancy output for "shnenc-bin".

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use termcolor::Color;
use termcolor::ColorChoice;
use termcolor::ColorSpec;
use termcolor::StandardStream;
use termcolor::WriteColor;

const CRATE_VERSION: &str = match option_env!("CARGO_PKG_VERSION") {
    Some(v) => v,
    None => "unknown",
};
const DEFAULT_CONFIG_NAME: &str = "[default]";
const UNKNOWN_CONFIG_NAME: &str = "[unknown]";
const UNKNOWN_INPUT_NAME: &str = "[unknown]";
const UNKNOWN_OUTPUT_NAME: &str = "[unknown]";

fn file_name_or<P: AsRef<Path>>(path: P, fallback: &str) -> String {
    path.as_ref().file_name().map_or_else(
        || fallback.to_owned(),
        |s| s.to_string_lossy().to_string(),
    )
}

// might be better if we handle Args and Config directly.
pub struct IoArgs {
    config_path: Option<PathBuf>,
    input_path: PathBuf,
    output_path: PathBuf,
}

impl IoArgs {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>, R: AsRef<Path>>(
        config_path: &Option<P>,
        input_path: Q,
        output_path: R,
    ) -> Self {
        Self {
            config_path: config_path.as_ref().map(|x| x.as_ref().to_path_buf()),
            input_path: input_path.as_ref().to_path_buf(),
            output_path: output_path.as_ref().to_path_buf(),
        }
    }

    pub fn output_name(&self) -> String {
        file_name_or(&self.output_path, UNKNOWN_OUTPUT_NAME)
    }

    pub fn input_name(&self) -> String {
        file_name_or(&self.input_path, UNKNOWN_INPUT_NAME)
    }

    pub fn config_name(&self) -> String {
        self.config_path.as_ref().map_or_else(
            || DEFAULT_CONFIG_NAME.to_owned(),
            |p| {
                p.file_stem().map_or_else(
                    || UNKNOWN_CONFIG_NAME.to_owned(),
                    |n| n.to_string_lossy().to_string(),
                )
            },
        )
    }
}

pub enum Progress {
    Started,
    Done {
        encode_time: Duration,
        bytes_written: usize,
        source_bytes: usize,
        source_duration_secs: f32,
        seek_entries: Option<usize>,
    },
}

fn terminal_output() -> Arc<termcolor::StandardStream> {
    Arc::new(StandardStream::stderr(ColorChoice::Auto))
}

/// Show the initial banner.
pub fn show_banner() -> Result<(), std::io::Error> {
    let termout = terminal_output();
    let mut termout = termout.lock();
    termout.set_color(ColorSpec::new().set_bold(true))?;
    write!(termout, "\n{:>10} ", "shnenc")?;
    termout.reset()?;
    writeln!(
        termout,
        "(engine v{}, CLI v{})",
        shnenc::constant::build_info::CRATE_VERSION,
        CRATE_VERSION
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

pub fn show_progress(io: &IoArgs, progress: &Progress) -> Result<(), std::io::Error> {
    let termout = terminal_output();
    let mut termout = termout.lock();
    match *progress {
        Progress::Started => {
            termout.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)).set_bold(true))?;
            write!(termout, "{:>10} ", "Encoding")?;
            termout.reset()?;
            writeln!(
                termout,
                "{} => {} [{}]",
                io.input_name(),
                io.output_name(),
                io.config_name()
            )
        }
        Progress::Done {
            encode_time,
            bytes_written,
            source_bytes,
            source_duration_secs,
            seek_entries,
        } => {
            termout.set_color(ColorSpec::new().set_fg(Some(Color::Green)).set_bold(true))?;
            write!(termout, "{:>10} ", "Encoded")?;
            termout.reset()?;
            let ratio = bytes_written as f32 / std::cmp::max(1, source_bytes) as f32;
            let speed = source_duration_secs / encode_time.as_secs_f32().max(f32::EPSILON);
            writeln!(
                termout,
                "{} [{} bytes, {:.1}% of input, x{:.1} realtime]",
                io.output_name(),
                bytes_written,
                ratio * 100.0,
                speed,
            )?;
            if let Some(n) = seek_entries {
                termout.set_color(ColorSpec::new().set_dimmed(true))?;
                writeln!(termout, "{:>10} seek table with {} entries appended", "", n)?;
                termout.reset()?;
            }
            writeln!(termout)
        }
    }
}
