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

use crate::constant::field::MAX_BITSHIFT;
use crate::constant::qlpc::MAX_COEF_MAGNITUDE;
use crate::constant::qlpc::MAX_ORDER as MAX_LPC_ORDER;
use crate::constant::rice::MAX_CODED_PARAMETER;
use crate::constant::stream::MAX_MEAN_BLOCKS;
use crate::constant::stream::MAX_SKIPPED_BYTES;
use crate::constant::stream::MAX_SUPPORTED_VERSION;
use crate::constant::stream::MIN_SUPPORTED_VERSION;
use crate::constant::stream::VERBATIM_CHUNK_MAX;
use crate::constant::MAX_BLOCK_SIZE;
use crate::constant::MAX_CHANNELS;
use crate::error::verify_range;
use crate::error::verify_true;
use crate::error::Verify;
use crate::error::VerifyError;

use super::datatype::Block;
use super::datatype::Qlpc;
use super::datatype::Residual;
use super::datatype::StreamHeader;
use super::datatype::Verbatim;

macro_rules! verify_block_size {
    ($varname:literal, $size:expr) => {
        verify_range!($varname, $size, 1..=MAX_BLOCK_SIZE)
    };
}
pub(crate) use verify_block_size;

impl Verify for StreamHeader {
    fn verify(&self) -> Result<(), VerifyError> {
        verify_range!(
            "version",
            self.version(),
            MIN_SUPPORTED_VERSION..=MAX_SUPPORTED_VERSION
        )?;
        verify_range!("channels", self.channels(), 1..=MAX_CHANNELS)?;
        verify_block_size!("block_size", self.block_size())?;
        verify_range!("max_lpc_order", self.max_lpc_order(), ..=MAX_LPC_ORDER)?;
        verify_range!("mean_blocks", self.mean_blocks(), ..=MAX_MEAN_BLOCKS)?;
        verify_range!(
            "skipped_bytes.len",
            self.skipped_bytes().len(),
            ..=MAX_SKIPPED_BYTES
        )
    }
}

impl Verify for Residual {
    fn verify(&self) -> Result<(), VerifyError> {
        verify_range!(
            "rice_parameter",
            self.rice_parameter(),
            ..=MAX_CODED_PARAMETER
        )?;
        verify_range!("values.len", self.len(), ..=MAX_BLOCK_SIZE)
    }
}

impl Verify for Qlpc {
    fn verify(&self) -> Result<(), VerifyError> {
        verify_range!("order", self.order(), 1..=MAX_LPC_ORDER)?;
        for (i, c) in self.coefs().iter().enumerate() {
            verify_true!(
                "coefs[{i}]",
                c.unsigned_abs() <= MAX_COEF_MAGNITUDE as u32,
                "must be representable with the coefficient code"
            )?;
        }
        self.residual().verify().map_err(|e| e.within("residual"))
    }
}

impl Verify for Verbatim {
    fn verify(&self) -> Result<(), VerifyError> {
        verify_range!("bytes.len", self.bytes().len(), ..=VERBATIM_CHUNK_MAX)
    }
}

impl Verify for Block {
    fn verify(&self) -> Result<(), VerifyError> {
        match self {
            Self::Diff0(r) | Self::Diff1(r) | Self::Diff2(r) | Self::Diff3(r) => {
                r.verify().map_err(|e| e.within("residual"))
            }
            Self::Qlpc(q) => q.verify().map_err(|e| e.within("qlpc")),
            Self::Verbatim(v) => v.verify().map_err(|e| e.within("verbatim")),
            Self::BitShift(s) => verify_range!("bitshift", *s, ..=MAX_BITSHIFT),
            Self::BlockSize(n) => verify_block_size!("block_size", *n as usize),
            Self::Zero | Self::Quit => Ok(()),
        }
    }
}
