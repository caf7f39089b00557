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

use super::super::bitsink::BitSink;
#[cfg(test)]
use super::super::bitsink::ByteSink;
use super::super::constant::field::BITSHIFTSIZE;
use super::super::constant::field::MAX_BITSHIFT;
use super::super::constant::field::ENERGYSIZE;
use super::super::constant::field::FNSIZE;
use super::super::constant::field::ULONGSIZE;
use super::super::constant::field::VERBATIM_BYTE_SIZE;
use super::super::constant::field::VERBATIM_CKSIZE_SIZE;
use super::super::constant::field::XBYTESIZE;
use super::super::constant::qlpc::ORDER_FIELD_SIZE;
use super::super::constant::qlpc::QUANT_SHIFT;
use super::super::constant::stream::MAGIC;
use super::super::constant::stream::VERBATIM_CHUNK_MAX;
use super::super::constant::NBITPERLONG;
use super::super::error::ConsistencyError;
use super::super::error::OutputError;
use super::super::rice;

use super::datatype::Block;
use super::datatype::Qlpc;
use super::datatype::Residual;
use super::datatype::StreamHeader;
use super::datatype::Verbatim;

pub mod seal_bit_repr {
    pub trait Sealed {}
    impl Sealed for super::StreamHeader {}
    impl Sealed for super::Block {}
    impl Sealed for super::Qlpc {}
    impl Sealed for super::Residual {}
    impl Sealed for super::Verbatim {}
}

/// Stream components that can be represented in a bit sequence.
pub trait BitRepr: seal_bit_repr::Sealed {
    /// Counts the number of bits required to store the component.
    fn count_bits(&self) -> usize;

    /// Writes the bit sequence to `BitSink`.
    ///
    /// # Errors
    ///
    /// This function returns error if `self` contains an invalid value that
    /// does not fit to the bitstream format, or if a `BitSink` method
    /// returned an error.
    fn write<S: BitSink>(&self, dest: &mut S) -> Result<(), OutputError<S>>;

    /// Test utility for obtaining bits as eight-bit separated `String`.
    #[cfg(test)]
    fn to_bitstring(&self) -> String {
        let mut sink = ByteSink::new();
        self.write(&mut sink).expect("No error expected");
        sink.to_bitstring()
    }

    #[cfg(test)]
    /// Checks if the number of bits actually written equals to the expected number of bits.
    ///
    /// # Errors
    ///
    /// If the check passed i.e. the number of bits actually written is as same as the expected
    /// number, it returns `Ok(bits)`. Otherwise, it returns `Err((expected_bits, actual_bits))`.
    fn verify_bit_counter(&self) -> Result<usize, (usize, usize)> {
        let expected = self.count_bits();
        let mut sink = ByteSink::new();
        self.write(&mut sink).expect("No error expected");
        if expected == sink.len() {
            Ok(expected)
        } else {
            Err((expected, sink.len()))
        }
    }
}

/// Returns the number of bits of the ulong code of `value`.
#[inline]
const fn ulong_bits(value: u32) -> usize {
    let nbit = NBITPERLONG - value.leading_zeros();
    rice::cost_unsigned(nbit, ULONGSIZE) + rice::cost_unsigned(value, nbit as usize)
}

#[inline]
fn checked_code<S: BitSink>(var: &str, value: usize) -> Result<u32, OutputError<S>> {
    u32::try_from(value).map_err(|_| {
        OutputError::Consistency(ConsistencyError::from_display(
            var,
            "must fit in 32 bits",
            &value,
        ))
    })
}

#[inline]
fn checked_max<S: BitSink>(var: &str, value: usize, max: usize) -> Result<u32, OutputError<S>> {
    if value > max {
        return Err(OutputError::Consistency(ConsistencyError::from_display(
            var,
            &format!("must be less than or equal to {max}"),
            &value,
        )));
    }
    checked_code(var, value)
}

impl BitRepr for StreamHeader {
    fn count_bits(&self) -> usize {
        let fields = [
            self.file_type().code(),
            self.channels() as u32,
            self.block_size() as u32,
            self.max_lpc_order() as u32,
            self.mean_blocks() as u32,
            self.skipped_bytes().len() as u32,
        ];
        let skipped: usize = self
            .skipped_bytes()
            .iter()
            .map(|b| rice::cost_unsigned(u32::from(*b), XBYTESIZE))
            .sum();
        8 * (MAGIC.len() + 1) + fields.iter().map(|v| ulong_bits(*v)).sum::<usize>() + skipped
    }

    fn write<S: BitSink>(&self, dest: &mut S) -> Result<(), OutputError<S>> {
        dest.write_bytes_aligned(MAGIC)
            .map_err(OutputError::<S>::from_sink)?;
        dest.write(self.version())
            .map_err(OutputError::<S>::from_sink)?;
        let fields = [
            self.file_type().code(),
            checked_code("channels", self.channels())?,
            checked_code("block_size", self.block_size())?,
            checked_code("max_lpc_order", self.max_lpc_order())?,
            checked_code("mean_blocks", self.mean_blocks())?,
            checked_code("skipped_bytes.len", self.skipped_bytes().len())?,
        ];
        for v in fields {
            dest.put_ulong(v).map_err(OutputError::<S>::from_sink)?;
        }
        for b in self.skipped_bytes() {
            dest.put_unsigned(u32::from(*b), XBYTESIZE)
                .map_err(OutputError::<S>::from_sink)?;
        }
        Ok(())
    }
}

impl BitRepr for Residual {
    /// Counts the bits of the energy field and the residual values.
    fn count_bits(&self) -> usize {
        rice::cost_unsigned(self.rice_parameter() as u32, ENERGYSIZE)
            + rice::block_cost(self.values(), self.rice_parameter())
    }

    fn write<S: BitSink>(&self, dest: &mut S) -> Result<(), OutputError<S>> {
        let k = self.rice_parameter();
        dest.put_unsigned(k as u32, ENERGYSIZE)
            .map_err(OutputError::<S>::from_sink)?;
        self.write_values(dest)
    }
}

impl Residual {
    fn write_values<S: BitSink>(&self, dest: &mut S) -> Result<(), OutputError<S>> {
        let k = self.rice_parameter();
        for v in self.values() {
            dest.put_signed(*v, k)
                .map_err(OutputError::<S>::from_sink)?;
        }
        Ok(())
    }
}

impl BitRepr for Qlpc {
    fn count_bits(&self) -> usize {
        let residual = self.residual();
        let coefs: usize = self
            .coefs()
            .iter()
            .map(|c| rice::cost_signed(*c, QUANT_SHIFT))
            .sum();
        rice::cost_unsigned(residual.rice_parameter() as u32, ENERGYSIZE)
            + rice::cost_unsigned(self.order() as u32, ORDER_FIELD_SIZE)
            + coefs
            + rice::block_cost(residual.values(), residual.rice_parameter())
    }

    fn write<S: BitSink>(&self, dest: &mut S) -> Result<(), OutputError<S>> {
        let residual = self.residual();
        dest.put_unsigned(residual.rice_parameter() as u32, ENERGYSIZE)
            .map_err(OutputError::<S>::from_sink)?;
        dest.put_unsigned(self.order() as u32, ORDER_FIELD_SIZE)
            .map_err(OutputError::<S>::from_sink)?;
        for c in self.coefs() {
            dest.put_signed(*c, QUANT_SHIFT)
                .map_err(OutputError::<S>::from_sink)?;
        }
        residual.write_values(dest)
    }
}

impl BitRepr for Verbatim {
    fn count_bits(&self) -> usize {
        rice::cost_unsigned(self.bytes().len() as u32, VERBATIM_CKSIZE_SIZE)
            + self
                .bytes()
                .iter()
                .map(|b| rice::cost_unsigned(u32::from(*b), VERBATIM_BYTE_SIZE))
                .sum::<usize>()
    }

    fn write<S: BitSink>(&self, dest: &mut S) -> Result<(), OutputError<S>> {
        let len = checked_max("verbatim.len", self.bytes().len(), VERBATIM_CHUNK_MAX)?;
        dest.put_unsigned(len, VERBATIM_CKSIZE_SIZE)
            .map_err(OutputError::<S>::from_sink)?;
        for b in self.bytes() {
            dest.put_unsigned(u32::from(*b), VERBATIM_BYTE_SIZE)
                .map_err(OutputError::<S>::from_sink)?;
        }
        Ok(())
    }
}

impl BitRepr for Block {
    fn count_bits(&self) -> usize {
        let payload = match self {
            Self::Diff0(r) | Self::Diff1(r) | Self::Diff2(r) | Self::Diff3(r) => r.count_bits(),
            Self::Qlpc(q) => q.count_bits(),
            Self::Verbatim(v) => v.count_bits(),
            Self::BitShift(s) => rice::cost_unsigned(*s, BITSHIFTSIZE),
            Self::BlockSize(n) => ulong_bits(*n),
            Self::Zero | Self::Quit => 0,
        };
        rice::cost_unsigned(self.function_code(), FNSIZE) + payload
    }

    fn write<S: BitSink>(&self, dest: &mut S) -> Result<(), OutputError<S>> {
        if let Self::BitShift(s) = self {
            checked_max("bitshift", *s as usize, MAX_BITSHIFT as usize)?;
        }
        dest.put_unsigned(self.function_code(), FNSIZE)
            .map_err(OutputError::<S>::from_sink)?;
        match self {
            Self::Diff0(r) | Self::Diff1(r) | Self::Diff2(r) | Self::Diff3(r) => r.write(dest),
            Self::Qlpc(q) => q.write(dest),
            Self::Verbatim(v) => v.write(dest),
            Self::BitShift(s) => dest
                .put_unsigned(*s, BITSHIFTSIZE)
                .map_err(OutputError::<S>::from_sink),
            Self::BlockSize(n) => dest.put_ulong(*n).map_err(OutputError::<S>::from_sink),
            Self::Zero | Self::Quit => Ok(()),
        }
    }
}
