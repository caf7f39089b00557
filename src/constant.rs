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

//! Format constants.

#![allow(dead_code)] // it's okay if some format constants are not used.

// Constants sorted in an alphabetical-order.  Top-level constants first, and
// then sub-modules. Constants that are used only in a specific sub-module or
// its caller should be placed in the corresponding submodule.

/// Default length of a block.
pub const DEFAULT_BLOCK_SIZE: usize = 256;

/// Maximum length of a block supported.
pub const MAX_BLOCK_SIZE: usize = 65535;

/// Maximum number of channels.
pub const MAX_CHANNELS: usize = 64;

/// Maximum bits-per-sample accepted by the encoder.
pub const MAX_BITS_PER_SAMPLE: usize = 24;

/// Minimum number of history samples kept for each channel.
pub const NWRAP: usize = 3;

/// The number of bits in the internal sample representation.
pub const NBITPERLONG: u32 = 32;

/// Sub-module containing constants related to build-time information.
pub mod build_info {
    mod built {
        include!(concat!(env!("OUT_DIR"), "/built.rs"));
    }

    pub const CRATE_VERSION: &str = built::PKG_VERSION;
    pub const FEATURES: &str = built::FEATURES_STR;
    pub const BUILD_PROFILE: &str = built::PROFILE;
    pub const RUSTC_VERSION: &str = built::RUSTC_VERSION;
}

/// Constants related to keys for the environment variables.
pub(crate) mod envvar_key {
    /// Environment variable name for specifying the number of threads.
    pub const DEFAULT_PARALLELISM: &str = "SHNENC_WORKERS";
}

/// Widths of the Rice parameters used for the coded fields.
///
/// Unless stated otherwise, each field is written with
/// [`BitSink::put_unsigned`] using the width as `k`.
///
/// [`BitSink::put_unsigned`]: crate::bitsink::BitSink::put_unsigned
pub mod field {
    /// Function codes.
    pub const FNSIZE: usize = 2;
    /// Rice parameter of a residual block.
    pub const ENERGYSIZE: usize = 3;
    /// Bitshift value.
    pub const BITSHIFTSIZE: usize = 2;
    /// Largest bitshift a stream can carry.
    pub const MAX_BITSHIFT: u32 = 31;
    /// Bit-length prefix of a ulong code.
    pub const ULONGSIZE: usize = 2;
    /// Skipped header bytes.
    pub const XBYTESIZE: usize = 7;
    /// Length of a verbatim chunk.
    pub const VERBATIM_CKSIZE_SIZE: usize = 5;
    /// Each byte in a verbatim chunk.
    pub const VERBATIM_BYTE_SIZE: usize = 8;
}

/// Function codes that start each command in a stream.
pub mod fncode {
    pub const DIFF0: u32 = 0;
    pub const DIFF1: u32 = 1;
    pub const DIFF2: u32 = 2;
    pub const DIFF3: u32 = 3;
    pub const QUIT: u32 = 4;
    pub const BLOCKSIZE: u32 = 5;
    pub const BITSHIFT: u32 = 6;
    pub const QLPC: u32 = 7;
    pub const ZERO: u32 = 8;
    pub const VERBATIM: u32 = 9;
}

/// Constants related to par-mode (multithreading.)
pub mod par {
    /// The number of in-flight blocks allowed for each worker thread.
    pub const BLOCK_QUEUE_MULTIPLICITY: usize = 4;
}

/// Constants related to quantized linear predictive coding (QLPC).
pub mod qlpc {
    /// Maximum order of QLPC.
    pub const MAX_ORDER: usize = 64;

    /// Rice parameter used for the order field.
    pub const ORDER_FIELD_SIZE: usize = 2;

    /// Fixed quantization shift of the coefficients.
    pub const QUANT_SHIFT: usize = 5;

    /// Largest magnitude of a quantized coefficient the encoder emits.
    pub const MAX_COEF_MAGNITUDE: i32 = 1 << 15;

    /// Estimated number of bits for a coefficient, used in order selection.
    pub const ESTIMATED_BITS_PER_COEF: usize = 2 + QUANT_SHIFT;

    /// Default number of orders searched beyond the best order so far.
    pub const DEFAULT_ORDER_SEARCH_WIDTH: usize = 3;
}

/// Constants related to Rice coding.
pub mod rice {
    /// Maximum allowed value for the Rice parameter of residuals.
    pub const MAX_RICE_PARAMETER: usize = 24;

    /// Maximum Rice parameter of residuals a stream can carry.
    pub const MAX_CODED_PARAMETER: usize = 31;
}

/// Constants related to the seek table appended to (or stored beside) a
/// compressed stream.
pub mod seek {
    /// Revision number written to the header.
    pub const REVISION: u32 = 1;
    /// Size of the header record in bytes.
    pub const HEADER_SIZE: usize = 12;
    /// Size of the trailer record in bytes.
    pub const TRAILER_SIZE: usize = 12;
    /// Size of an entry record in bytes.
    pub const ENTRY_SIZE: usize = 80;
    /// Signature at the beginning of the header record.
    pub const HEADER_SIGNATURE: &[u8; 4] = b"SEEK";
    /// Signature at the end of the trailer record.
    pub const TRAILER_SIGNATURE: &[u8; 8] = b"SHNAMPSK";
    /// An entry is recorded for every this number of blocks in channel 0.
    pub const BLOCKS_PER_ENTRY: usize = 100;
}

/// Constants related to the stream envelope.
pub mod stream {
    /// Magic bytes at the head of a stream.
    pub const MAGIC: &[u8; 4] = b"ajkg";
    /// Version written by default.
    pub const FORMAT_VERSION: u8 = 2;
    /// Oldest version the decoder accepts.
    pub const MIN_SUPPORTED_VERSION: u8 = 1;
    /// Newest version the decoder accepts.
    pub const MAX_SUPPORTED_VERSION: u8 = 3;
    /// Default number of blocks averaged for the mean offset (version 1).
    pub const DEFAULT_V1_MEAN_BLOCKS: usize = 0;
    /// Default number of blocks averaged for the mean offset (version 2+).
    pub const DEFAULT_V2_MEAN_BLOCKS: usize = 4;
    /// Maximum number of blocks averaged for the mean offset.
    pub const MAX_MEAN_BLOCKS: usize = 1024;
    /// Maximum number of skipped bytes stored in a header.
    pub const MAX_SKIPPED_BYTES: usize = 1 << 16;
    /// Maximum length of a verbatim chunk in bytes.
    pub const VERBATIM_CHUNK_MAX: usize = 256;
}

/// Module for internal error messages.
///
/// Use `panic!` and those messages only for env-related unrecoverable errors.
/// It's okay to use them in tests, but it's not okay to add another variable
/// only for test functions.
pub(crate) mod panic_msg {
    pub const ARC_DESTRUCT_FAILED: &str = "INTERNAL ERROR: Arc destruction failed.";
    pub const DATA_INCONSISTENT: &str = "INTERNAL ERROR: Internal variable inconsistency detected.";
    pub const MPMC_SEND_FAILED: &str =
        "INTERNAL ERROR: Critical error occured in multi-thread communication channel.";
    pub const MPMC_RECV_FAILED: &str =
        "INTERNAL ERROR: Critical error occured in multi-thread communication channel.";
    pub const MUTEX_LOCK_FAILED: &str = "INTERNAL ERROR: Couldn't get lock for mutex.";
    pub const MUTEX_DROP_FAILED: &str = "INTERNAL ERROR: Couldn't discard mutex.";
    pub const THREAD_JOIN_FAILED: &str = "INTERNAL ERROR: Failed to wait thread termination.";
}
