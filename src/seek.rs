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

//! Seek table that indexes decoder states in a compressed stream.
//!
//! A table is made of a 12-byte header, a sequence of 80-byte entries, and a
//! 12-byte trailer, all in little endian. It is either stored in a separate
//! file or appended to the stream, in which case the trailer signature at
//! the end of the file tells its presence.

use nom::bytes::complete::tag;
use nom::multi::count;
use nom::number::complete::le_i32;
use nom::number::complete::le_u16;
use nom::number::complete::le_u32;
use nom::IResult;

use super::constant::seek::ENTRY_SIZE;
use super::constant::seek::HEADER_SIGNATURE;
use super::constant::seek::HEADER_SIZE;
use super::constant::seek::REVISION;
use super::constant::seek::TRAILER_SIGNATURE;
use super::constant::seek::TRAILER_SIZE;
use super::error::FormatError;
use super::history::ChannelState;

/// Number of channels whose state is stored in an entry.
const STORED_CHANNELS: usize = 2;
/// Number of history samples stored per channel.
const STORED_HISTORY: usize = 3;
/// Number of mean offsets stored per channel.
const STORED_OFFSETS: usize = 4;

/// Header record of a seek table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SeekHeader {
    pub revision: u32,
    /// Size of the compressed stream in bytes, without the table.
    pub file_size: u32,
}

impl SeekHeader {
    fn write_to(&self, dest: &mut Vec<u8>) {
        dest.extend_from_slice(HEADER_SIGNATURE);
        dest.extend_from_slice(&self.revision.to_le_bytes());
        dest.extend_from_slice(&self.file_size.to_le_bytes());
    }
}

/// Trailer record of a seek table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SeekTrailer {
    /// Size of the whole table including the header and the trailer.
    pub table_size: u32,
}

impl SeekTrailer {
    fn write_to(&self, dest: &mut Vec<u8>) {
        dest.extend_from_slice(&self.table_size.to_le_bytes());
        dest.extend_from_slice(TRAILER_SIGNATURE);
    }
}

/// Decoder state captured before a block of channel 0.
///
/// The reader position is described in terms of 32-bit words as the
/// bitstream is defined as a sequence of big-endian words.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SeekEntry {
    /// Index of the first sample (per channel) of the block.
    pub sample_number: u32,
    /// Byte position of the next unread bit.
    pub byte_offset: u32,
    /// Byte position of the word holding the next unread bit.
    pub last_read_position: u32,
    /// Number of valid bytes in the word.
    pub byte_get: u16,
    /// Offset of `byte_offset` from `last_read_position`.
    pub buffer_offset: u16,
    /// Number of bits already consumed from the word.
    pub bit_offset: u16,
    /// The word itself.
    pub bit_buffer: u32,
    /// Bitshift in effect for channel 0.
    pub bitshift: u16,
    /// History samples of channels 0 and 1, newest first.
    pub history: [[i32; STORED_HISTORY]; STORED_CHANNELS],
    /// Mean offsets of channels 0 and 1, oldest first.
    pub offsets: [[i32; STORED_OFFSETS]; STORED_CHANNELS],
}

impl SeekEntry {
    /// Captures the state of a decoder reading `stream` at `bit_position`.
    pub(crate) fn capture(
        sample_number: usize,
        stream: &[u8],
        bit_position: usize,
        states: &[ChannelState],
    ) -> Self {
        let word_start = bit_position / 32 * 4;
        let byte_offset = bit_position / 8;
        let word_end = std::cmp::min(word_start + 4, stream.len());
        let mut word = [0u8; 4];
        if word_start < word_end {
            word[..word_end - word_start].copy_from_slice(&stream[word_start..word_end]);
        }

        let mut history = [[0i32; STORED_HISTORY]; STORED_CHANNELS];
        let mut offsets = [[0i32; STORED_OFFSETS]; STORED_CHANNELS];
        for (ch, state) in states.iter().take(STORED_CHANNELS).enumerate() {
            history[ch] = state.recent_history();
            for (dest, v) in offsets[ch].iter_mut().zip(state.offsets()) {
                *dest = *v;
            }
        }

        Self {
            sample_number: sample_number as u32,
            byte_offset: byte_offset as u32,
            last_read_position: word_start as u32,
            byte_get: word_end.saturating_sub(word_start) as u16,
            buffer_offset: (byte_offset - word_start) as u16,
            bit_offset: (bit_position % 32) as u16,
            bit_buffer: u32::from_be_bytes(word),
            bitshift: states.first().map_or(0, |s| s.bitshift() as u16),
            history,
            offsets,
        }
    }

    /// Returns the bit position of the reader.
    pub const fn bit_position(&self) -> usize {
        self.last_read_position as usize * 8 + self.bit_offset as usize
    }

    fn write_to(&self, dest: &mut Vec<u8>) {
        dest.extend_from_slice(&self.sample_number.to_le_bytes());
        dest.extend_from_slice(&self.byte_offset.to_le_bytes());
        dest.extend_from_slice(&self.last_read_position.to_le_bytes());
        dest.extend_from_slice(&self.byte_get.to_le_bytes());
        dest.extend_from_slice(&self.buffer_offset.to_le_bytes());
        dest.extend_from_slice(&self.bit_offset.to_le_bytes());
        dest.extend_from_slice(&self.bit_buffer.to_le_bytes());
        dest.extend_from_slice(&self.bitshift.to_le_bytes());
        for ch in &self.history {
            for v in ch {
                dest.extend_from_slice(&v.to_le_bytes());
            }
        }
        for ch in &self.offsets {
            for v in ch {
                dest.extend_from_slice(&v.to_le_bytes());
            }
        }
    }
}

/// Seek table with its entries sorted by `sample_number`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SeekTable {
    pub header: SeekHeader,
    pub entries: Vec<SeekEntry>,
}

impl SeekTable {
    /// Constructs a table for a stream of `file_size` bytes.
    pub fn new(file_size: usize, entries: Vec<SeekEntry>) -> Self {
        Self {
            header: SeekHeader {
                revision: REVISION,
                file_size: file_size as u32,
            },
            entries,
        }
    }

    /// Returns the size of the serialized table in bytes.
    pub fn byte_len(&self) -> usize {
        HEADER_SIZE + ENTRY_SIZE * self.entries.len() + TRAILER_SIZE
    }

    /// Returns the trailer record for this table.
    pub fn trailer(&self) -> SeekTrailer {
        SeekTrailer {
            table_size: self.byte_len() as u32,
        }
    }

    /// Serializes the table.
    ///
    /// # Examples
    ///
    /// ```
    /// # use shnenc::seek::*;
    /// let table = SeekTable::new(1234, vec![SeekEntry::default(); 2]);
    /// let bytes = table.to_bytes();
    /// assert_eq!(bytes.len(), 12 + 80 * 2 + 12);
    /// assert_eq!(&bytes[..4], b"SEEK");
    /// assert_eq!(&bytes[bytes.len() - 8..], b"SHNAMPSK");
    /// ```
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut ret = Vec::with_capacity(self.byte_len());
        self.header.write_to(&mut ret);
        for entry in &self.entries {
            entry.write_to(&mut ret);
        }
        self.trailer().write_to(&mut ret);
        ret
    }

    /// Appends the serialized table to `stream`.
    pub fn append_to(&self, stream: &mut Vec<u8>) {
        stream.extend_from_slice(&self.to_bytes());
    }

    /// Parses a standalone table.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError`] if `bytes` is not exactly one seek table.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        match table::<nom::error::Error<&[u8]>>(bytes) {
            Ok((rest, table)) if rest.is_empty() => Ok(table),
            Ok((rest, _)) => Err(FormatError::new(
                (bytes.len() - rest.len()) * 8,
                "trailing bytes after seek table.",
            )),
            Err(nom::Err::Error(e) | nom::Err::Failure(e)) => Err(FormatError::new(
                (bytes.len() - e.input.len()) * 8,
                "malformed seek table.",
            )),
            Err(nom::Err::Incomplete(_)) => {
                Err(FormatError::new(bytes.len() * 8, "seek table is truncated."))
            }
        }
    }

    /// Finds a table appended to `file`.
    ///
    /// Returns the length of the stream before the table and the table, or
    /// `None` if no (valid) table is appended.
    pub fn find_appended(file: &[u8]) -> Option<(usize, Self)> {
        if file.len() < HEADER_SIZE + TRAILER_SIZE {
            return None;
        }
        let trailer = &file[file.len() - TRAILER_SIZE..];
        let (_, table_size) = trailer_record::<()>(trailer).ok()?;
        let table_size = table_size as usize;
        if table_size > file.len() || table_size < HEADER_SIZE + TRAILER_SIZE {
            return None;
        }
        let start = file.len() - table_size;
        let table = Self::from_bytes(&file[start..]).ok()?;
        Some((start, table))
    }

    /// Returns the last entry at or before `sample_number`.
    pub fn entry_for_sample(&self, sample_number: usize) -> Option<&SeekEntry> {
        let idx = self
            .entries
            .partition_point(|e| e.sample_number as usize <= sample_number);
        idx.checked_sub(1).map(|i| &self.entries[i])
    }
}

fn header_record<'a, E>(input: &'a [u8]) -> IResult<&'a [u8], SeekHeader, E>
where
    E: nom::error::ParseError<&'a [u8]>,
{
    let (input, _) = tag(&HEADER_SIGNATURE[..])(input)?;
    let (input, revision) = le_u32(input)?;
    let (input, file_size) = le_u32(input)?;
    Ok((
        input,
        SeekHeader {
            revision,
            file_size,
        },
    ))
}

fn channel_values<'a, E, const N: usize>(input: &'a [u8]) -> IResult<&'a [u8], [i32; N], E>
where
    E: nom::error::ParseError<&'a [u8]>,
{
    let mut ret = [0i32; N];
    let mut input = input;
    for v in &mut ret {
        let (rest, x) = le_i32(input)?;
        *v = x;
        input = rest;
    }
    Ok((input, ret))
}

fn entry_record<'a, E>(input: &'a [u8]) -> IResult<&'a [u8], SeekEntry, E>
where
    E: nom::error::ParseError<&'a [u8]>,
{
    let (input, sample_number) = le_u32(input)?;
    let (input, byte_offset) = le_u32(input)?;
    let (input, last_read_position) = le_u32(input)?;
    let (input, byte_get) = le_u16(input)?;
    let (input, buffer_offset) = le_u16(input)?;
    let (input, bit_offset) = le_u16(input)?;
    let (input, bit_buffer) = le_u32(input)?;
    let (input, bitshift) = le_u16(input)?;
    let (input, history0) = channel_values::<E, STORED_HISTORY>(input)?;
    let (input, history1) = channel_values::<E, STORED_HISTORY>(input)?;
    let (input, offsets0) = channel_values::<E, STORED_OFFSETS>(input)?;
    let (input, offsets1) = channel_values::<E, STORED_OFFSETS>(input)?;
    Ok((
        input,
        SeekEntry {
            sample_number,
            byte_offset,
            last_read_position,
            byte_get,
            buffer_offset,
            bit_offset,
            bit_buffer,
            bitshift,
            history: [history0, history1],
            offsets: [offsets0, offsets1],
        },
    ))
}

fn trailer_record<'a, E>(input: &'a [u8]) -> IResult<&'a [u8], u32, E>
where
    E: nom::error::ParseError<&'a [u8]>,
{
    let (input, table_size) = le_u32(input)?;
    let (input, _) = tag(&TRAILER_SIGNATURE[..])(input)?;
    Ok((input, table_size))
}

fn table<'a, E>(input: &'a [u8]) -> IResult<&'a [u8], SeekTable, E>
where
    E: nom::error::ParseError<&'a [u8]>,
{
    if input.len() < HEADER_SIZE + TRAILER_SIZE
        || (input.len() - HEADER_SIZE - TRAILER_SIZE) % ENTRY_SIZE != 0
    {
        return Err(nom::Err::Error(E::from_error_kind(
            input,
            nom::error::ErrorKind::LengthValue,
        )));
    }
    let n = (input.len() - HEADER_SIZE - TRAILER_SIZE) / ENTRY_SIZE;
    let (input, header) = header_record(input)?;
    let (input, entries) = count(entry_record, n)(input)?;
    let (input, _table_size) = trailer_record(input)?;
    Ok((input, SeekTable { header, entries }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(n: u32) -> SeekEntry {
        SeekEntry {
            sample_number: n,
            byte_offset: 4 * n + 2,
            last_read_position: 4 * n,
            byte_get: 4,
            buffer_offset: 2,
            bit_offset: 17,
            bit_buffer: 0xDEAD_BEEF,
            bitshift: 3,
            history: [[1, -2, 3], [-4, 5, -6]],
            offsets: [[7, 8, 9, 10], [-11, -12, -13, -14]],
        }
    }

    #[test]
    fn record_sizes() {
        let mut buf = vec![];
        SeekHeader {
            revision: REVISION,
            file_size: 100,
        }
        .write_to(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);

        buf.clear();
        sample_entry(3).write_to(&mut buf);
        assert_eq!(buf.len(), ENTRY_SIZE);

        buf.clear();
        SeekTrailer { table_size: 0 }.write_to(&mut buf);
        assert_eq!(buf.len(), TRAILER_SIZE);
    }

    #[test]
    fn entry_layout_is_little_endian() {
        let mut buf = vec![];
        sample_entry(0x0102_0304).write_to(&mut buf);
        assert_eq!(&buf[..4], &[4, 3, 2, 1]);
        // bitshift is at 22 bytes after sample_number.
        assert_eq!(&buf[22..24], &[3, 0]);
        assert_eq!(&buf[24..28], &1i32.to_le_bytes());
        assert_eq!(&buf[76..80], &(-14i32).to_le_bytes());
    }

    #[test]
    fn table_parses_back() {
        let table = SeekTable::new(5000, vec![sample_entry(0), sample_entry(25600)]);
        let bytes = table.to_bytes();
        assert_eq!(bytes.len(), table.byte_len());
        assert_eq!(&bytes[bytes.len() - 12..bytes.len() - 8], &[184, 0, 0, 0]);
        let parsed = SeekTable::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, table);
    }

    #[test]
    fn broken_tables_are_rejected() {
        let table = SeekTable::new(5000, vec![sample_entry(0)]);
        let bytes = table.to_bytes();
        assert!(SeekTable::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        let mut corrupted = bytes.clone();
        corrupted[0] = b'X';
        assert!(SeekTable::from_bytes(&corrupted).is_err());
        let mut corrupted = bytes;
        let last = corrupted.len() - 1;
        corrupted[last] = b'X';
        assert!(SeekTable::from_bytes(&corrupted).is_err());
    }

    #[test]
    fn appended_table_is_found() {
        let stream = b"ajkg\x02 some stream body".to_vec();
        let table = SeekTable::new(stream.len(), vec![sample_entry(0), sample_entry(256)]);
        let mut file = stream.clone();
        table.append_to(&mut file);

        let (start, found) = SeekTable::find_appended(&file).unwrap();
        assert_eq!(start, stream.len());
        assert_eq!(found, table);
        assert!(SeekTable::find_appended(&stream).is_none());
    }

    #[test]
    fn entry_lookup() {
        let table = SeekTable::new(0, vec![sample_entry(0), sample_entry(100), sample_entry(200)]);
        assert_eq!(table.entry_for_sample(0).unwrap().sample_number, 0);
        assert_eq!(table.entry_for_sample(150).unwrap().sample_number, 100);
        assert_eq!(table.entry_for_sample(5000).unwrap().sample_number, 200);
        assert!(SeekTable::new(0, vec![]).entry_for_sample(0).is_none());
    }

    #[test]
    fn capture_reads_word_state() {
        let stream = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC];
        let states = vec![ChannelState::new(3, 4, 4, 0, 2)];
        let entry = SeekEntry::capture(512, &stream, 42, &states);
        assert_eq!(entry.sample_number, 512);
        assert_eq!(entry.byte_offset, 5);
        assert_eq!(entry.last_read_position, 4);
        assert_eq!(entry.byte_get, 2);
        assert_eq!(entry.buffer_offset, 1);
        assert_eq!(entry.bit_offset, 10);
        assert_eq!(entry.bit_buffer, 0x9ABC_0000);
        assert_eq!(entry.bit_position(), 42);
    }
}
