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

use serde::Deserialize;
use serde::Serialize;

use crate::constant::fncode;
use crate::constant::qlpc::MAX_ORDER;
use crate::constant::stream::DEFAULT_V1_MEAN_BLOCKS;
use crate::constant::stream::DEFAULT_V2_MEAN_BLOCKS;
use crate::constant::stream::FORMAT_VERSION;
use crate::constant::DEFAULT_BLOCK_SIZE;
use crate::constant::NWRAP;
use crate::error::Verify;
use crate::error::VerifyError;

/// Sample format of the original file, as recorded in the stream header.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[non_exhaustive]
pub enum FileType {
    /// Sun audio (u-law), first revision.
    Au1,
    /// Signed 8-bit.
    S8,
    /// Unsigned 8-bit.
    U8,
    /// Signed 16-bit, big endian.
    S16HL,
    /// Unsigned 16-bit, big endian.
    U16HL,
    /// Signed 16-bit, little endian.
    #[default]
    S16LH,
    /// Unsigned 16-bit, little endian.
    U16LH,
    /// u-law companded 8-bit.
    Ulaw,
    /// Sun audio, second revision.
    Au2,
    /// Sun audio, third revision.
    Au3,
    /// A-law companded 8-bit.
    Alaw,
    /// RIFF WAVE container.
    RiffWave,
    /// AIFF container.
    Aiff,
}

impl FileType {
    const ALL: [Self; 13] = [
        Self::Au1,
        Self::S8,
        Self::U8,
        Self::S16HL,
        Self::U16HL,
        Self::S16LH,
        Self::U16LH,
        Self::Ulaw,
        Self::Au2,
        Self::Au3,
        Self::Alaw,
        Self::RiffWave,
        Self::Aiff,
    ];

    /// Returns the code stored in the stream header.
    ///
    /// # Examples
    ///
    /// ```
    /// # use shnenc::component::*;
    /// assert_eq!(FileType::S16LH.code(), 5);
    /// assert_eq!(FileType::from_code(5), Some(FileType::S16LH));
    /// assert_eq!(FileType::from_code(13), None);
    /// ```
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Looks up a `FileType` from the code stored in the stream header.
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Returns the value that the mean history of each channel starts with.
    pub const fn initial_offset(self) -> i32 {
        match self {
            Self::U8 => 0x80,
            Self::U16HL | Self::U16LH => 0x8000,
            _ => 0,
        }
    }

    /// Returns the number of bytes per sample for raw PCM types.
    pub const fn bytes_per_sample(self) -> Option<usize> {
        match self {
            Self::S8 | Self::U8 | Self::Ulaw | Self::Alaw => Some(1),
            Self::S16HL | Self::U16HL | Self::S16LH | Self::U16LH => Some(2),
            _ => None,
        }
    }
}

/// Header at the beginning of a stream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StreamHeader {
    version: u8,
    file_type: FileType,
    channels: usize,
    block_size: usize,
    max_lpc_order: usize,
    mean_blocks: usize,
    skipped: Vec<u8>,
}

impl StreamHeader {
    /// Constructs a header with the given parameters.
    ///
    /// # Errors
    ///
    /// Returns `VerifyError` if a parameter is out of the supported range.
    ///
    /// # Examples
    ///
    /// ```
    /// # use shnenc::component::*;
    /// let header = StreamHeader::new(2, FileType::S16LH, 2, 256, 0, 4).unwrap();
    /// assert_eq!(header.nwrap(), 3);
    /// assert!(StreamHeader::new(9, FileType::S16LH, 2, 256, 0, 4).is_err());
    /// ```
    pub fn new(
        version: u8,
        file_type: FileType,
        channels: usize,
        block_size: usize,
        max_lpc_order: usize,
        mean_blocks: usize,
    ) -> Result<Self, VerifyError> {
        let ret = Self {
            version,
            file_type,
            channels,
            block_size,
            max_lpc_order,
            mean_blocks,
            skipped: vec![],
        };
        ret.verify()?;
        Ok(ret)
    }

    /// Constructs a header without verification.
    pub(crate) const fn from_parts(
        version: u8,
        file_type: FileType,
        channels: usize,
        block_size: usize,
        max_lpc_order: usize,
        mean_blocks: usize,
        skipped: Vec<u8>,
    ) -> Self {
        Self {
            version,
            file_type,
            channels,
            block_size,
            max_lpc_order,
            mean_blocks,
            skipped,
        }
    }

    /// Constructs a default header for the given channel count.
    pub fn with_channels(channels: usize) -> Self {
        Self::from_parts(
            FORMAT_VERSION,
            FileType::default(),
            channels,
            DEFAULT_BLOCK_SIZE,
            0,
            if FORMAT_VERSION >= 2 {
                DEFAULT_V2_MEAN_BLOCKS
            } else {
                DEFAULT_V1_MEAN_BLOCKS
            },
            vec![],
        )
    }

    /// Sets the bytes skipped (copied as-is) from the head of the input.
    ///
    /// # Errors
    ///
    /// Returns `VerifyError` if the number of bytes is too large.
    pub fn set_skipped_bytes(&mut self, bytes: &[u8]) -> Result<(), VerifyError> {
        self.skipped = bytes.to_vec();
        self.verify()
    }

    #[inline]
    pub const fn version(&self) -> u8 {
        self.version
    }

    #[inline]
    pub const fn file_type(&self) -> FileType {
        self.file_type
    }

    #[inline]
    pub const fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    pub const fn max_lpc_order(&self) -> usize {
        self.max_lpc_order
    }

    /// Returns the number of blocks averaged for the mean offset.
    #[inline]
    pub const fn mean_blocks(&self) -> usize {
        self.mean_blocks
    }

    /// Returns bytes copied from the head of the input.
    #[inline]
    pub fn skipped_bytes(&self) -> &[u8] {
        &self.skipped
    }

    /// Returns the number of history samples kept per channel.
    #[inline]
    pub fn nwrap(&self) -> usize {
        std::cmp::max(NWRAP, self.max_lpc_order)
    }

    /// Returns the constant added to the QLPC prediction sum.
    #[inline]
    pub const fn qlpc_offset(&self) -> i32 {
        if self.version >= 2 {
            1 << crate::constant::qlpc::QUANT_SHIFT
        } else {
            0
        }
    }
}

/// Residual signal coded with a single Rice parameter.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Residual {
    rice_parameter: u8,
    values: Vec<i32>,
}

impl Residual {
    /// Constructs new `Residual`.
    ///
    /// # Errors
    ///
    /// Returns `VerifyError` if `rice_parameter` cannot be coded.
    pub fn new(rice_parameter: usize, values: &[i32]) -> Result<Self, VerifyError> {
        if rice_parameter > crate::constant::rice::MAX_CODED_PARAMETER {
            return Err(VerifyError::new(
                "rice_parameter",
                "must be less than or equal to 31",
            ));
        }
        let ret = Self::from_parts(rice_parameter as u8, values.to_vec());
        ret.verify()?;
        Ok(ret)
    }

    pub(crate) const fn from_parts(rice_parameter: u8, values: Vec<i32>) -> Self {
        Self {
            rice_parameter,
            values,
        }
    }

    /// Returns the Rice parameter.
    #[inline]
    pub fn rice_parameter(&self) -> usize {
        self.rice_parameter as usize
    }

    /// Returns the residual values.
    #[inline]
    pub fn values(&self) -> &[i32] {
        &self.values
    }

    /// Returns the number of residual values.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if there's no value.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Residual with quantized LPC coefficients.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Qlpc {
    coefs: heapless::Vec<i32, MAX_ORDER>,
    residual: Residual,
}

impl Qlpc {
    /// Constructs new `Qlpc`.
    ///
    /// # Errors
    ///
    /// Returns `VerifyError` if the order or a coefficient is out of range.
    pub fn new(coefs: &[i32], residual: Residual) -> Result<Self, VerifyError> {
        let mut stored = heapless::Vec::new();
        stored
            .extend_from_slice(coefs)
            .map_err(|()| VerifyError::new("coefs", "too many coefficients"))?;
        let ret = Self::from_parts(stored, residual);
        ret.verify()?;
        Ok(ret)
    }

    pub(crate) const fn from_parts(
        coefs: heapless::Vec<i32, MAX_ORDER>,
        residual: Residual,
    ) -> Self {
        Self { coefs, residual }
    }

    /// Returns the quantized coefficients.
    #[inline]
    pub fn coefs(&self) -> &[i32] {
        &self.coefs
    }

    /// Returns the prediction order.
    #[inline]
    pub fn order(&self) -> usize {
        self.coefs.len()
    }

    /// Returns a reference to the internal [`Residual`] component.
    #[inline]
    pub const fn residual(&self) -> &Residual {
        &self.residual
    }
}

/// Bytes passed through as-is (e.g. container headers).
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Verbatim {
    bytes: Vec<u8>,
}

impl Verbatim {
    /// Constructs new `Verbatim`.
    ///
    /// # Errors
    ///
    /// Returns `VerifyError` if `bytes` is longer than a chunk can hold.
    ///
    /// # Examples
    ///
    /// ```
    /// # use shnenc::component::*;
    /// assert!(Verbatim::new(b"RIFF").is_ok());
    /// assert!(Verbatim::new(&[0u8; 257]).is_err());
    /// ```
    pub fn new(bytes: &[u8]) -> Result<Self, VerifyError> {
        let ret = Self::from_bytes(bytes.to_vec());
        ret.verify()?;
        Ok(ret)
    }

    pub(crate) const fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Returns the bytes in this chunk.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// A command in a stream.
///
/// Each variant corresponds to one function code.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Block {
    /// Samples minus the mean offset.
    Diff0(Residual),
    /// First-order difference.
    Diff1(Residual),
    /// Second-order difference.
    Diff2(Residual),
    /// Third-order difference.
    Diff3(Residual),
    /// Quantized linear prediction.
    Qlpc(Qlpc),
    /// All samples in the block are zero.
    Zero,
    /// Pass-through bytes.
    Verbatim(Verbatim),
    /// New bitshift for the following blocks of the current channel.
    BitShift(u32),
    /// New block size for the following blocks.
    BlockSize(u32),
    /// End of the stream.
    Quit,
}

impl Block {
    /// Constructs a fixed polynomial block of `order`.
    ///
    /// # Panics
    ///
    /// Panics if `order > 3`.
    pub fn fixed(order: usize, residual: Residual) -> Self {
        match order {
            0 => Self::Diff0(residual),
            1 => Self::Diff1(residual),
            2 => Self::Diff2(residual),
            3 => Self::Diff3(residual),
            _ => panic!("fixed prediction order must be less than 4"),
        }
    }

    /// Returns the function code of this block.
    pub const fn function_code(&self) -> u32 {
        match self {
            Self::Diff0(_) => fncode::DIFF0,
            Self::Diff1(_) => fncode::DIFF1,
            Self::Diff2(_) => fncode::DIFF2,
            Self::Diff3(_) => fncode::DIFF3,
            Self::Qlpc(_) => fncode::QLPC,
            Self::Zero => fncode::ZERO,
            Self::Verbatim(_) => fncode::VERBATIM,
            Self::BitShift(_) => fncode::BITSHIFT,
            Self::BlockSize(_) => fncode::BLOCKSIZE,
            Self::Quit => fncode::QUIT,
        }
    }

    /// Returns true if this block carries samples of a channel.
    pub const fn is_audio(&self) -> bool {
        matches!(
            self,
            Self::Diff0(_)
                | Self::Diff1(_)
                | Self::Diff2(_)
                | Self::Diff3(_)
                | Self::Qlpc(_)
                | Self::Zero
        )
    }

    /// Returns the order of the fixed predictor if this is a DIFF block.
    pub const fn fixed_order(&self) -> Option<usize> {
        match self {
            Self::Diff0(_) => Some(0),
            Self::Diff1(_) => Some(1),
            Self::Diff2(_) => Some(2),
            Self::Diff3(_) => Some(3),
            _ => None,
        }
    }

    /// Returns the residual if this block has one.
    pub const fn residual(&self) -> Option<&Residual> {
        match self {
            Self::Diff0(r) | Self::Diff1(r) | Self::Diff2(r) | Self::Diff3(r) => Some(r),
            Self::Qlpc(q) => Some(q.residual()),
            _ => None,
        }
    }
}

impl From<Qlpc> for Block {
    fn from(q: Qlpc) -> Self {
        Self::Qlpc(q)
    }
}

impl From<Verbatim> for Block {
    fn from(v: Verbatim) -> Self {
        Self::Verbatim(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_codes_are_dense() {
        for (i, ft) in FileType::ALL.iter().enumerate() {
            assert_eq!(ft.code() as usize, i);
            assert_eq!(FileType::from_code(i as u32), Some(*ft));
        }
    }

    #[test]
    fn initial_offsets() {
        assert_eq!(FileType::U8.initial_offset(), 0x80);
        assert_eq!(FileType::U16LH.initial_offset(), 0x8000);
        assert_eq!(FileType::S16HL.initial_offset(), 0);
    }

    #[test]
    fn nwrap_follows_lpc_order() {
        let header = StreamHeader::new(2, FileType::S16LH, 1, 256, 32, 4).unwrap();
        assert_eq!(header.nwrap(), 32);
        assert_eq!(header.qlpc_offset(), 32);
        let header = StreamHeader::new(1, FileType::S16LH, 1, 256, 2, 0).unwrap();
        assert_eq!(header.nwrap(), 3);
        assert_eq!(header.qlpc_offset(), 0);
    }
}
