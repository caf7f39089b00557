// Copyright 2024 Google LLC
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

//! Abstract interface for bit-based input.

use super::constant::field::ULONGSIZE;
use super::constant::NBITPERLONG;
use super::error::DecodeError;
use super::error::FormatError;
use super::error::TruncationError;
use super::rice;

/// Trait for defining an input bitstream.
pub trait BitSource {
    /// Returns the offset of the seek head in the number of bits.
    fn current_bit_offset(&self) -> usize;

    /// Read unsigned integer from the next `bits` (<= 64) bits.
    ///
    /// # Errors
    ///
    /// Returns [`TruncationError`] if the input ends before `bits` bits.
    fn read_u64(&mut self, bits: usize) -> Result<u64, DecodeError>;

    /// Reads unary code (i.e. counts the number of leading "0"s before "1").
    ///
    /// # Errors
    ///
    /// Returns [`TruncationError`] if the terminating "1" is not found.
    fn read_unary_code(&mut self) -> Result<u64, DecodeError> {
        let mut ret = 0;
        while self.read_u64(1)? == 0 {
            ret += 1;
        }
        Ok(ret)
    }

    /// Reads `n` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`TruncationError`] if the input ends before `n` bytes.
    fn read_bytevec(&mut self, n: usize) -> Result<Vec<u8>, DecodeError> {
        let mut ret = Vec::with_capacity(n);
        for _i in 0..n {
            ret.push(self.read_u64(8)? as u8);
        }
        Ok(ret)
    }

    /// Reads a value coded with the unsigned Rice code of parameter `k`.
    ///
    /// # Errors
    ///
    /// Returns [`TruncationError`] on premature end of input, and
    /// [`FormatError`] if the value does not fit in 32 bits.
    fn get_unsigned(&mut self, k: usize) -> Result<u32, DecodeError> {
        let offset = self.current_bit_offset();
        if k > NBITPERLONG as usize {
            return Err(FormatError::new(offset, "Rice parameter is too large").into());
        }
        let high = self.read_unary_code()?;
        let low = self.read_u64(k)?;
        if high > (u64::from(u32::MAX) >> k) {
            return Err(FormatError::new(offset, "Rice code overflows 32 bits").into());
        }
        Ok(((high << k) | low) as u32)
    }

    /// Reads a value coded with the signed Rice code of parameter `k`.
    ///
    /// # Errors
    ///
    /// Same as [`BitSource::get_unsigned`].
    fn get_signed(&mut self, k: usize) -> Result<i32, DecodeError> {
        Ok(rice::decode_signbit(self.get_unsigned(k + 1)?))
    }

    /// Reads a raw 32-bit word.
    ///
    /// # Errors
    ///
    /// Returns [`TruncationError`] if the input ends before 32 bits.
    fn get_raw_word(&mut self) -> Result<u32, DecodeError> {
        Ok(self.read_u64(NBITPERLONG as usize)? as u32)
    }

    /// Reads a value coded with the self-delimiting header code.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError`] if the bit-length prefix exceeds 32.
    fn get_ulong(&mut self) -> Result<u32, DecodeError> {
        let offset = self.current_bit_offset();
        let nbit = self.get_unsigned(ULONGSIZE)?;
        if nbit > NBITPERLONG {
            return Err(FormatError::new(offset, "ulong bit-length exceeds 32").into());
        }
        self.get_unsigned(nbit as usize)
    }
}

/// `BitSource` that reads a bitstream from a byte slice.
#[derive(Clone, Debug)]
pub struct MemSource<'a> {
    bytes: &'a [u8],
    head: usize,
}

impl<'a> MemSource<'a> {
    /// Creates a source that reads from the beginning of `bytes`.
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, head: 0 }
    }

    /// Returns the underlying bytes.
    pub const fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    const fn total_bits(&self) -> usize {
        self.bytes.len() * 8
    }
}

impl<'a> BitSource for MemSource<'a> {
    fn current_bit_offset(&self) -> usize {
        self.head
    }

    fn read_u64(&mut self, bits: usize) -> Result<u64, DecodeError> {
        debug_assert!(bits <= 64);
        if bits == 0 {
            return Ok(0);
        }
        if self.head + bits > self.total_bits() {
            return Err(TruncationError::new(self.head, "a fixed-length field").into());
        }
        let mut ret = 0u64;
        let mut remaining = bits;
        while remaining > 0 {
            let byte = self.bytes[self.head >> 3];
            let avail = 8 - (self.head & 7);
            let take = std::cmp::min(avail, remaining);
            let chunk = (u16::from(byte) >> (avail - take)) & ((1u16 << take) - 1);
            ret = (ret << take) | u64::from(chunk);
            self.head += take;
            remaining -= take;
        }
        Ok(ret)
    }

    fn read_unary_code(&mut self) -> Result<u64, DecodeError> {
        let start = self.head;
        let mut ret = 0u64;
        loop {
            let idx = self.head >> 3;
            if idx >= self.bytes.len() {
                self.head = start;
                return Err(TruncationError::new(self.total_bits(), "a unary code").into());
            }
            let offset = self.head & 7;
            let byte = self.bytes[idx] << offset;
            if byte == 0 {
                ret += (8 - offset) as u64;
                self.head += 8 - offset;
                continue;
            }
            let zeros = byte.leading_zeros() as usize;
            ret += zeros as u64;
            self.head += zeros + 1;
            return Ok(ret);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitsink::BitSink;
    use crate::bitsink::ByteSink;

    #[test]
    fn reads_fields_across_bytes() {
        let bytes = [0b1011_0011, 0b1100_0101];
        let mut src = MemSource::new(&bytes);
        assert_eq!(src.read_u64(3).unwrap(), 0b101);
        assert_eq!(src.read_u64(7).unwrap(), 0b100_1111);
        assert_eq!(src.current_bit_offset(), 10);
        assert_eq!(src.read_u64(6).unwrap(), 0b00_0101);
        assert!(src.read_u64(1).unwrap_err().is_truncation());
    }

    #[test]
    fn unary_over_zero_bytes() {
        let bytes = [0x00, 0x00, 0x20];
        let mut src = MemSource::new(&bytes);
        assert_eq!(src.read_unary_code().unwrap(), 18);
        assert_eq!(src.current_bit_offset(), 19);
    }

    #[test]
    fn unary_truncated() {
        let bytes = [0x00, 0x00];
        let mut src = MemSource::new(&bytes);
        let err = src.read_unary_code().unwrap_err();
        assert!(err.is_truncation());
    }

    #[test]
    fn codes_read_back() {
        let mut sink = ByteSink::new();
        sink.put_unsigned(9, 2).unwrap();
        sink.put_signed(-77, 3).unwrap();
        sink.put_ulong(44100).unwrap();
        sink.put_raw_word(0xCAFE_F00D).unwrap();
        sink.put_ulong(0).unwrap();
        let bytes = sink.into_inner();

        let mut src = MemSource::new(&bytes);
        assert_eq!(src.get_unsigned(2).unwrap(), 9);
        assert_eq!(src.get_signed(3).unwrap(), -77);
        assert_eq!(src.get_ulong().unwrap(), 44100);
        assert_eq!(src.get_raw_word().unwrap(), 0xCAFE_F00D);
        assert_eq!(src.get_ulong().unwrap(), 0);
    }

    #[test]
    fn overflowing_rice_code_is_format_error() {
        let mut sink = ByteSink::new();
        // 4 << 31 does not fit in u32.
        sink.write_zeros(4).unwrap();
        sink.write_lsbs(1u8, 1).unwrap();
        sink.write_zeros(31).unwrap();
        let bytes = sink.into_inner();
        let mut src = MemSource::new(&bytes);
        let err = src.get_unsigned(31).unwrap_err();
        assert!(matches!(err, DecodeError::Format(_)));
    }
}
