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

//! Abstract interface for bit-based output.

use std::convert::Infallible;

use super::constant::field::ULONGSIZE;
use super::constant::NBITPERLONG;
use super::rice;

/// Trait for the bit-addressible unsigned integers.
///
/// This trait is sealed so a user cannot implement it. Currently, this trait
/// covers: [`u8`], [`u16`], [`u32`], and [`u64`].
pub trait Bits: seal_bits::Sealed {}

impl<T: seal_bits::Sealed> Bits for T {}

/// Storage-agnostic interface trait for bit-based output.
///
/// Bits are packed MSB-first. Variable-length codes used in a stream are
/// provided on top of the primitive methods (`put_*` methods.)
pub trait BitSink: Sized {
    /// Error type that may happen while writing bits to `BitSink`.
    type Error: std::error::Error;

    /// Returns the number of bits written so far.
    fn bit_len(&self) -> usize;

    /// Puts zeros to `BitSink` until the length aligns to the byte boundaries.
    ///
    /// # Returns
    ///
    /// The number of zeros put.
    ///
    /// # Errors
    ///
    /// It can emit errors describing backend issues.
    fn align_to_byte(&mut self) -> Result<usize, Self::Error>;

    /// Writes bytes after alignment, and returns padded bits.
    ///
    /// # Errors
    ///
    /// It can emit errors describing backend issues.
    ///
    /// # Examples
    ///
    /// ```
    /// # fn main() -> Result<(), std::convert::Infallible> {
    /// # use shnenc::bitsink::{ByteSink, BitSink};
    /// let mut sink = ByteSink::new();
    /// sink.write_lsbs(0xFFu8, 3)?;
    /// sink.write_bytes_aligned(b"ajkg")?;
    /// assert_eq!(sink.to_bitstring(), "11100000_01100001_01101010_01101011_01100111");
    /// # Ok(())}
    /// ```
    #[inline]
    fn write_bytes_aligned(&mut self, bytes: &[u8]) -> Result<usize, Self::Error> {
        let ret = self.align_to_byte()?;
        for b in bytes {
            self.write(*b)?;
        }
        Ok(ret)
    }

    /// Writes `n` LSBs to the sink.
    ///
    /// # Errors
    ///
    /// It can emit errors describing backend issues.
    fn write_lsbs<T: Bits>(&mut self, val: T, n: usize) -> Result<(), Self::Error>;

    /// Writes all bits in `val: Bits`.
    ///
    /// # Errors
    ///
    /// It can emit errors describing backend issues.
    #[inline]
    fn write<T: Bits>(&mut self, val: T) -> Result<(), Self::Error> {
        self.write_lsbs(val, T::BITS)
    }

    /// Writes `n`-bits of zeros.
    ///
    /// # Errors
    ///
    /// It can emit errors describing backend issues.
    #[inline]
    fn write_zeros(&mut self, n: usize) -> Result<(), Self::Error> {
        let mut n = n;
        while n > 64 {
            self.write(0u64)?;
            n -= 64;
        }
        self.write_lsbs(0u64, n)
    }

    /// Writes `value` with the unsigned Rice code of parameter `k`.
    ///
    /// The code is `value >> k` zeros, a terminating one, then the `k` LSBs
    /// of `value`.
    ///
    /// # Errors
    ///
    /// It can emit errors describing backend issues.
    ///
    /// # Examples
    ///
    /// ```
    /// # fn main() -> Result<(), std::convert::Infallible> {
    /// # use shnenc::bitsink::{ByteSink, BitSink};
    /// let mut sink = ByteSink::new();
    /// sink.put_unsigned(9, 2)?;
    /// assert_eq!(sink.to_bitstring(), "00101***");
    /// # Ok(())}
    /// ```
    #[inline]
    fn put_unsigned(&mut self, value: u32, k: usize) -> Result<(), Self::Error> {
        let value = u64::from(value);
        self.write_zeros((value >> k) as usize)?;
        self.write_lsbs(1u8, 1)?;
        self.write_lsbs(value, k)
    }

    /// Writes `value` with the signed Rice code of parameter `k`.
    ///
    /// The sign is folded into the LSB and the folded value is written with
    /// [`put_unsigned`] using the parameter `k + 1`.
    ///
    /// [`put_unsigned`]: BitSink::put_unsigned
    ///
    /// # Errors
    ///
    /// It can emit errors describing backend issues.
    ///
    /// # Examples
    ///
    /// ```
    /// # fn main() -> Result<(), std::convert::Infallible> {
    /// # use shnenc::bitsink::{ByteSink, BitSink};
    /// let mut sink = ByteSink::new();
    /// sink.put_signed(-1, 0)?;
    /// assert_eq!(sink.to_bitstring(), "11******");
    /// # Ok(())}
    /// ```
    #[inline]
    fn put_signed(&mut self, value: i32, k: usize) -> Result<(), Self::Error> {
        self.put_unsigned(rice::encode_signbit(value), k + 1)
    }

    /// Writes a raw 32-bit word, MSB first.
    ///
    /// # Errors
    ///
    /// It can emit errors describing backend issues.
    #[inline]
    fn put_raw_word(&mut self, value: u32) -> Result<(), Self::Error> {
        self.write(value)
    }

    /// Writes `value` with the self-delimiting code used for header fields.
    ///
    /// The bit length of `value` is written first with the unsigned Rice
    /// code, and then `value` itself with that bit length as the parameter.
    ///
    /// # Errors
    ///
    /// It can emit errors describing backend issues.
    ///
    /// # Examples
    ///
    /// ```
    /// # fn main() -> Result<(), std::convert::Infallible> {
    /// # use shnenc::bitsink::{ByteSink, BitSink};
    /// let mut sink = ByteSink::new();
    /// sink.put_ulong(5)?;
    /// // bitlen(5) = 3 -> "1" "11", then 5 with k=3 -> "1" "101"
    /// assert_eq!(sink.to_bitstring(), "1111101*");
    /// # Ok(())}
    /// ```
    #[inline]
    fn put_ulong(&mut self, value: u32) -> Result<(), Self::Error> {
        let nbit = NBITPERLONG - value.leading_zeros();
        self.put_unsigned(nbit, ULONGSIZE)?;
        self.put_unsigned(value, nbit as usize)
    }

    /// Writes the end-of-stream padding.
    ///
    /// A one bit is written, followed by zeros up to the next 32-bit word
    /// boundary counted from `origin_in_bits`.
    ///
    /// # Errors
    ///
    /// It can emit errors describing backend issues.
    ///
    /// # Examples
    ///
    /// ```
    /// # fn main() -> Result<(), std::convert::Infallible> {
    /// # use shnenc::bitsink::{ByteSink, BitSink};
    /// let mut sink = ByteSink::new();
    /// sink.write_lsbs(0u8, 3)?;
    /// sink.pad_to_word(0)?;
    /// assert_eq!(sink.len(), 32);
    /// assert_eq!(sink.as_slice(), &[0x10, 0x00, 0x00, 0x00]);
    /// # Ok(())}
    /// ```
    fn pad_to_word(&mut self, origin_in_bits: usize) -> Result<usize, Self::Error> {
        let word = NBITPERLONG as usize;
        let used = (self.bit_len() - origin_in_bits) % word;
        self.write_lsbs(1u8, 1)?;
        self.write_zeros(word - 1 - used)?;
        Ok(word - used)
    }
}

/// `BitSink` implementation based on [`Vec`] of [`u8`]s.
///
/// Since this type store code bits in [`u8`]s, the internal buffer can directly
/// be written to, e.g. [`std::io::Write`] via [`write_all`] method.
///
/// [`write_all`]: std::io::Write::write_all
#[derive(Clone, Debug, Default)]
pub struct ByteSink {
    storage: Vec<u8>,
    bitlength: usize,
}

#[inline]
const fn lsb_mask(n: usize) -> u64 {
    if n >= 64 {
        u64::MAX
    } else {
        (1u64 << n) - 1
    }
}

impl ByteSink {
    /// Creates new `ByteSink` instance with the default capacity.
    ///
    /// # Examples
    ///
    /// ```
    /// # use shnenc::bitsink::*;
    /// let sink = ByteSink::new();
    /// let empty: [u8; 0] = [];
    /// assert_eq!(&empty, sink.as_slice());
    /// ```
    pub const fn new() -> Self {
        Self {
            storage: vec![],
            bitlength: 0usize,
        }
    }

    /// Creates new `ByteSink` instance with the specified capacity (in bits).
    pub fn with_capacity(capacity_in_bits: usize) -> Self {
        Self {
            storage: Vec::with_capacity((capacity_in_bits >> 3) + 1),
            bitlength: 0usize,
        }
    }

    /// Returns the number of bits stored in the buffer.
    ///
    /// # Examples
    ///
    /// ```
    /// # use shnenc::bitsink::*;
    /// let mut sink = ByteSink::new();
    /// sink.write(0u64);
    /// sink.write_lsbs(0u8, 6);
    /// assert_eq!(sink.len(), 70)
    /// ```
    pub const fn len(&self) -> usize {
        self.bitlength
    }

    /// Checks if the buffer is empty.
    pub const fn is_empty(&self) -> bool {
        self.bitlength == 0
    }

    /// Returns the remaining number of bits in the last byte in `self.storage`.
    #[inline]
    const fn paddings(&self) -> usize {
        ((!self.bitlength).wrapping_add(1)) & 7
    }

    /// Returns bits in a string.
    ///
    /// This function formats an internal buffer state to a human-readable
    /// string. Each byte is shown in eight characters joined by `'_'`, and the
    /// last bits of the last byte that are not yet filled are shown as `'*'`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use shnenc::bitsink::*;
    /// let mut sink = ByteSink::new();
    /// sink.write_lsbs(0x068Au16, 13);
    /// assert_eq!(sink.to_bitstring(), "00110100_01010***");
    /// ```
    pub fn to_bitstring(&self) -> String {
        let mut ret = String::new();
        for b in &self.storage {
            ret.push_str(&format!("{b:08b}"));
            ret.push('_');
        }
        ret.pop();

        for _t in 0..self.paddings() {
            ret.pop();
        }
        for _t in 0..self.paddings() {
            ret.push('*');
        }
        ret
    }

    /// Consumes `ByteSink` and returns the internal buffer.
    #[inline]
    pub fn into_inner(self) -> Vec<u8> {
        self.storage
    }

    /// Returns a reference to the internal bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.storage
    }

    /// Appends all bits in `other` to `self`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use shnenc::bitsink::*;
    /// let mut head = ByteSink::new();
    /// head.write_lsbs(0x5u8, 3);
    /// let mut tail = ByteSink::new();
    /// tail.write_lsbs(0x1FFu16, 9);
    /// head.append(&tail);
    /// assert_eq!(head.to_bitstring(), "10111111_1111****");
    /// ```
    pub fn append(&mut self, other: &Self) {
        if self.paddings() == 0 {
            self.storage.extend_from_slice(&other.storage);
            self.bitlength += other.bitlength;
            return;
        }
        let full_bytes = other.bitlength >> 3;
        for b in &other.storage[..full_bytes] {
            self.push_bits(u64::from(*b), 8);
        }
        let rest = other.bitlength & 7;
        if rest > 0 {
            let last = u64::from(other.storage[full_bytes]) >> (8 - rest);
            self.push_bits(last, rest);
        }
    }

    /// Pushes `n` (< 64) LSBs of `val`, MSB first.
    #[inline]
    fn push_bits(&mut self, val: u64, n: usize) {
        let mut val = val & lsb_mask(n);
        let mut n = n;
        let pad = self.paddings();
        if pad > 0 {
            let take = pad.min(n);
            let head = (val >> (n - take)) as u8;
            if let Some(last) = self.storage.last_mut() {
                *last |= head << (pad - take);
            }
            n -= take;
            self.bitlength += take;
            val &= lsb_mask(n);
        }
        while n >= 8 {
            n -= 8;
            self.storage.push((val >> n) as u8);
            self.bitlength += 8;
        }
        if n > 0 {
            self.storage.push((val << (8 - n)) as u8);
            self.bitlength += n;
        }
    }
}

impl BitSink for ByteSink {
    type Error = Infallible;

    #[inline]
    fn bit_len(&self) -> usize {
        self.bitlength
    }

    #[inline]
    fn align_to_byte(&mut self) -> Result<usize, Self::Error> {
        let r = self.paddings();
        self.bitlength += r;
        Ok(r)
    }

    #[inline]
    fn write_bytes_aligned(&mut self, bytes: &[u8]) -> Result<usize, Self::Error> {
        let ret = self.align_to_byte()?;
        self.storage.extend_from_slice(bytes);
        self.bitlength += 8 * bytes.len();
        Ok(ret)
    }

    #[inline]
    fn write_lsbs<T: Bits>(&mut self, val: T, n: usize) -> Result<(), Self::Error> {
        if n == 0 {
            return Ok(());
        }
        let val: u64 = val.into();
        if n == 64 {
            self.push_bits(val >> 32, 32);
            self.push_bits(val, 32);
        } else {
            self.push_bits(val, n);
        }
        Ok(())
    }

    #[inline]
    fn write_zeros(&mut self, n: usize) -> Result<(), Self::Error> {
        let pad = self.paddings();
        if n <= pad {
            self.bitlength += n;
            return Ok(());
        }
        self.bitlength += pad;
        let n = n - pad;

        let bytes = (n + 7) >> 3;
        self.storage.resize(self.storage.len() + bytes, 0u8);
        self.bitlength += n;

        Ok(())
    }
}

mod seal_bits {
    use num_traits::PrimInt;
    pub trait Sealed: Into<u64> + PrimInt {
        /// The number of bits in the type.
        const BITS: usize = std::mem::size_of::<Self>() * 8;
    }

    impl Sealed for u8 {}
    impl Sealed for u16 {}
    impl Sealed for u32 {}
    impl Sealed for u64 {}
}
