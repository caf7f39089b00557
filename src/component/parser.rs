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

use nom::bytes::complete::tag as byte_tag;
use nom::combinator::verify;
use nom::error::ParseError;
use nom::number::complete::u8 as byte_u8;
use nom::IResult;

use crate::bitsource::BitSource;
use crate::component::Block;
use crate::component::FileType;
use crate::component::Qlpc;
use crate::component::Residual;
use crate::component::StreamHeader;
use crate::component::Verbatim;
use crate::constant::field::BITSHIFTSIZE;
use crate::constant::field::ENERGYSIZE;
use crate::constant::field::FNSIZE;
use crate::constant::field::MAX_BITSHIFT;
use crate::constant::field::VERBATIM_BYTE_SIZE;
use crate::constant::field::VERBATIM_CKSIZE_SIZE;
use crate::constant::field::XBYTESIZE;
use crate::constant::fncode;
use crate::constant::qlpc::MAX_ORDER;
use crate::constant::qlpc::ORDER_FIELD_SIZE;
use crate::constant::qlpc::QUANT_SHIFT;
use crate::constant::rice::MAX_CODED_PARAMETER;
use crate::constant::stream::MAGIC;
use crate::constant::stream::MAX_MEAN_BLOCKS;
use crate::constant::stream::MAX_SKIPPED_BYTES;
use crate::constant::stream::MAX_SUPPORTED_VERSION;
use crate::constant::stream::MIN_SUPPORTED_VERSION;
use crate::constant::stream::VERBATIM_CHUNK_MAX;
use crate::constant::MAX_BLOCK_SIZE;
use crate::constant::MAX_CHANNELS;
use crate::error::ConsistencyError;
use crate::error::DecodeError;
use crate::error::FormatError;

/// Recognizes the magic bytes and the version number at the stream head.
///
/// # Errors
///
/// Same as other nom parsers, this returns [`nom::Err`] if `input` doesn't
/// start with the magic, or if the version is not supported.
///
/// # Examples
///
/// ```
/// # use shnenc::component::parser::stream_prefix;
/// let (rest, version) = stream_prefix::<()>(b"ajkg\x02rest").unwrap();
/// assert_eq!(version, 2);
/// assert_eq!(rest, b"rest");
/// assert!(stream_prefix::<()>(b"ajkg\x07").is_err());
/// assert!(stream_prefix::<()>(b"fLaC\x02").is_err());
/// ```
pub fn stream_prefix<'a, E>(input: &'a [u8]) -> IResult<&'a [u8], u8, E>
where
    E: ParseError<&'a [u8]>,
{
    let (remaining_input, _) = byte_tag(&MAGIC[..])(input)?;
    verify(byte_u8, |v: &u8| {
        (MIN_SUPPORTED_VERSION..=MAX_SUPPORTED_VERSION).contains(v)
    })(remaining_input)
}

fn read_bounded_ulong<S: BitSource>(
    src: &mut S,
    name: &str,
    range: std::ops::RangeInclusive<usize>,
) -> Result<usize, DecodeError> {
    let loc = src.current_bit_offset();
    let v = src.get_ulong()? as usize;
    if range.contains(&v) {
        Ok(v)
    } else {
        Err(FormatError::new(loc, &format!("{name}={v} is out of range.")).into())
    }
}

/// Reads [`StreamHeader`] from the beginning of a stream.
///
/// `src` must be positioned at the first byte of the stream.
///
/// # Errors
///
/// Returns [`DecodeError`] if the magic is not found, if the version is
/// unsupported, or if a header field is out of range.
pub fn read_stream_header<S: BitSource>(src: &mut S) -> Result<StreamHeader, DecodeError> {
    let loc = src.current_bit_offset();
    let prefix = src.read_bytevec(MAGIC.len() + 1)?;
    let (_, version) = stream_prefix::<()>(&prefix).map_err(|_| {
        FormatError::new(loc, "magic not found or unsupported version.")
    })?;

    let ftype_loc = src.current_bit_offset();
    let ftype = src.get_ulong()?;
    let file_type = FileType::from_code(ftype)
        .ok_or_else(|| FormatError::new(ftype_loc, "unknown file type."))?;
    let channels = read_bounded_ulong(src, "channels", 1..=MAX_CHANNELS)?;
    let block_size = read_bounded_ulong(src, "block_size", 1..=MAX_BLOCK_SIZE)?;
    let max_lpc_order = read_bounded_ulong(src, "max_lpc_order", 0..=MAX_ORDER)?;
    let mean_blocks = read_bounded_ulong(src, "mean_blocks", 0..=MAX_MEAN_BLOCKS)?;
    let nskip = read_bounded_ulong(src, "skipped_bytes", 0..=MAX_SKIPPED_BYTES)?;
    let mut skipped = Vec::with_capacity(nskip);
    for _ in 0..nskip {
        let loc = src.current_bit_offset();
        let b = src.get_unsigned(XBYTESIZE)?;
        skipped.push(
            u8::try_from(b).map_err(|_| FormatError::new(loc, "skipped byte exceeds 255."))?,
        );
    }
    Ok(StreamHeader::from_parts(
        version,
        file_type,
        channels,
        block_size,
        max_lpc_order,
        mean_blocks,
        skipped,
    ))
}

fn read_rice_parameter<S: BitSource>(src: &mut S) -> Result<usize, DecodeError> {
    let loc = src.current_bit_offset();
    let k = src.get_unsigned(ENERGYSIZE)? as usize;
    if k > MAX_CODED_PARAMETER {
        return Err(FormatError::new(loc, "rice parameter is too large.").into());
    }
    Ok(k)
}

fn read_values<S: BitSource>(src: &mut S, k: usize, n: usize) -> Result<Vec<i32>, DecodeError> {
    let mut values = Vec::with_capacity(n);
    for _ in 0..n {
        values.push(src.get_signed(k)?);
    }
    Ok(values)
}

fn read_residual<S: BitSource>(src: &mut S, block_size: usize) -> Result<Residual, DecodeError> {
    let k = read_rice_parameter(src)?;
    let values = read_values(src, k, block_size)?;
    Ok(Residual::from_parts(k as u8, values))
}

fn read_qlpc<S: BitSource>(
    src: &mut S,
    block_size: usize,
    nwrap: usize,
) -> Result<Qlpc, DecodeError> {
    let k = read_rice_parameter(src)?;
    let loc = src.current_bit_offset();
    let order = src.get_unsigned(ORDER_FIELD_SIZE)? as usize;
    if order > nwrap || order > MAX_ORDER {
        return Err(FormatError::new(loc, "QLPC order exceeds the history length.").into());
    }
    let mut coefs = heapless::Vec::new();
    for _ in 0..order {
        // capacity is ensured by the order check above.
        let _ = coefs.push(src.get_signed(QUANT_SHIFT)?);
    }
    let values = read_values(src, k, block_size)?;
    Ok(Qlpc::from_parts(
        coefs,
        Residual::from_parts(k as u8, values),
    ))
}

fn read_verbatim<S: BitSource>(src: &mut S) -> Result<Verbatim, DecodeError> {
    let len = src.get_unsigned(VERBATIM_CKSIZE_SIZE)? as usize;
    if len > VERBATIM_CHUNK_MAX {
        return Err(ConsistencyError::from_display(
            "verbatim.len",
            &format!("must be less than or equal to {VERBATIM_CHUNK_MAX}"),
            &len,
        )
        .into());
    }
    let mut bytes = Vec::with_capacity(len);
    for _ in 0..len {
        let loc = src.current_bit_offset();
        let b = src.get_unsigned(VERBATIM_BYTE_SIZE)?;
        bytes.push(
            u8::try_from(b).map_err(|_| FormatError::new(loc, "verbatim byte exceeds 255."))?,
        );
    }
    Ok(Verbatim::from_bytes(bytes))
}

/// Reads a [`Block`] from the stream body.
///
/// `block_size` is the block size currently in effect and `nwrap` is the
/// number of history samples, which bounds the QLPC order.
///
/// # Errors
///
/// Returns [`DecodeError`] if the stream is truncated or malformed.
pub fn read_block<S: BitSource>(
    src: &mut S,
    block_size: usize,
    nwrap: usize,
) -> Result<Block, DecodeError> {
    let loc = src.current_bit_offset();
    let code = src.get_unsigned(FNSIZE)?;
    Ok(match code {
        fncode::DIFF0 => Block::Diff0(read_residual(src, block_size)?),
        fncode::DIFF1 => Block::Diff1(read_residual(src, block_size)?),
        fncode::DIFF2 => Block::Diff2(read_residual(src, block_size)?),
        fncode::DIFF3 => Block::Diff3(read_residual(src, block_size)?),
        fncode::QUIT => Block::Quit,
        fncode::BLOCKSIZE => {
            let loc = src.current_bit_offset();
            let n = src.get_ulong()?;
            if n == 0 || n as usize > MAX_BLOCK_SIZE {
                return Err(FormatError::new(loc, "block size out of range.").into());
            }
            Block::BlockSize(n)
        }
        fncode::BITSHIFT => {
            let s = src.get_unsigned(BITSHIFTSIZE)?;
            if s > MAX_BITSHIFT {
                return Err(ConsistencyError::from_display(
                    "bitshift",
                    &format!("must be less than or equal to {MAX_BITSHIFT}"),
                    &s,
                )
                .into());
            }
            Block::BitShift(s)
        }
        fncode::QLPC => Block::Qlpc(read_qlpc(src, block_size, nwrap)?),
        fncode::ZERO => Block::Zero,
        fncode::VERBATIM => Block::Verbatim(read_verbatim(src)?),
        _ => {
            return Err(FormatError::new(loc, &format!("unknown function code {code}.")).into());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::bitsink::BitSink;
    use crate::bitsink::ByteSink;
    use crate::bitsource::MemSource;
    use crate::component::BitRepr;

    #[test]
    fn header_round_trip() {
        let mut header = StreamHeader::new(2, FileType::U16HL, 3, 1000, 16, 4).unwrap();
        header.set_skipped_bytes(&[0, 1, 127, 128, 255]).unwrap();
        let mut sink = ByteSink::new();
        header.write(&mut sink).unwrap();
        let mut src = MemSource::new(sink.as_slice());
        assert_eq!(read_stream_header(&mut src).unwrap(), header);
    }

    #[test]
    fn bad_magic_and_version() {
        let mut src = MemSource::new(b"ajkh\x02\xff\xff");
        assert!(matches!(
            read_stream_header(&mut src),
            Err(DecodeError::Format(_))
        ));
        let mut src = MemSource::new(b"ajkg\x00\xff\xff");
        assert!(read_stream_header(&mut src).is_err());
        let mut src = MemSource::new(b"ajk");
        assert!(read_stream_header(&mut src).unwrap_err().is_truncation());
    }

    #[test]
    fn blocks_read_back() {
        let blocks = vec![
            Block::BlockSize(4),
            Block::BitShift(2),
            Block::Diff2(Residual::new(2, &[1, -5, 0, 77]).unwrap()),
            Block::Qlpc(Qlpc::new(&[50, -20], Residual::new(0, &[0, 1, -1, 2]).unwrap()).unwrap()),
            Block::Zero,
            Block::Verbatim(Verbatim::new(b"tail").unwrap()),
            Block::Quit,
        ];
        let mut sink = ByteSink::new();
        for b in &blocks {
            b.write(&mut sink).unwrap();
        }
        let mut src = MemSource::new(sink.as_slice());
        for b in &blocks {
            assert_eq!(&read_block(&mut src, 4, 3).unwrap(), b);
        }
    }

    #[test]
    fn qlpc_order_beyond_history_is_rejected() {
        let block = Block::Qlpc(
            Qlpc::new(&[1, 1, 1, 1], Residual::new(0, &[0]).unwrap()).unwrap(),
        );
        let mut sink = ByteSink::new();
        block.write(&mut sink).unwrap();
        let mut src = MemSource::new(sink.as_slice());
        assert!(matches!(
            read_block(&mut src, 1, 3),
            Err(DecodeError::Format(_))
        ));
    }

    #[test]
    fn out_of_range_fields_are_inconsistent() {
        let mut sink = ByteSink::new();
        sink.put_unsigned(fncode::BITSHIFT, FNSIZE).unwrap();
        sink.put_unsigned(40, BITSHIFTSIZE).unwrap();
        let mut src = MemSource::new(sink.as_slice());
        assert!(matches!(
            read_block(&mut src, 1, 3),
            Err(DecodeError::Consistency(ref e)) if e.var() == "bitshift"
        ));

        let mut sink = ByteSink::new();
        sink.put_unsigned(fncode::VERBATIM, FNSIZE).unwrap();
        sink.put_unsigned(300, VERBATIM_CKSIZE_SIZE).unwrap();
        for _ in 0..300 {
            sink.put_unsigned(7, VERBATIM_BYTE_SIZE).unwrap();
        }
        let mut src = MemSource::new(sink.as_slice());
        assert!(matches!(
            read_block(&mut src, 1, 3),
            Err(DecodeError::Consistency(ref e)) if e.var() == "verbatim.len"
        ));
    }

    #[test]
    fn extreme_rice_value_is_decoded() {
        // DIFF0 with k = 31 whose folded value is u32::MAX.
        let mut sink = ByteSink::new();
        sink.put_unsigned(fncode::DIFF0, FNSIZE).unwrap();
        sink.put_unsigned(31, ENERGYSIZE).unwrap();
        sink.put_unsigned(u32::MAX, 32).unwrap();
        let mut src = MemSource::new(sink.as_slice());
        let block = read_block(&mut src, 1, 3).unwrap();
        assert_eq!(block.residual().unwrap().values(), &[i32::MIN]);
    }

    #[test]
    fn unknown_function_code() {
        // code 10 with k=2: "00" "1" "10"
        let mut src = MemSource::new(&[0b1000_0011, 0b0000_0000]);
        assert_eq!(src.get_unsigned(0).unwrap(), 0);
        match read_block(&mut src, 1, 3) {
            Err(DecodeError::Format(e)) => assert_eq!(e.location_in_bits(), 1),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
