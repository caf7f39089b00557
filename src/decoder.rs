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

//! Sequential decoder of compressed streams.

use super::bitshift;
use super::bitsource::BitSource;
use super::bitsource::MemSource;
use super::component::parser;
use super::component::Block;
use super::component::FileType;
use super::component::StreamHeader;
use super::constant::seek::BLOCKS_PER_ENTRY;
use super::error::DecodeError;
use super::history::ChannelState;
use super::predictor;
use super::seek::SeekEntry;

/// Receiver of the decoded contents.
pub trait DecodeSink {
    /// Called once after the stream header is parsed.
    fn header(&mut self, _header: &StreamHeader) {}

    /// Called for each FN_VERBATIM chunk.
    fn verbatim(&mut self, bytes: &[u8]);

    /// Called with the interleaved samples of a block of all the channels.
    fn samples(&mut self, interleaved: &[i32]);

    /// Called with the decoder state captured for a seek table.
    fn seek_entry(&mut self, _entry: &SeekEntry) {}
}

/// Decoder that reads a stream held in memory.
#[derive(Clone, Debug)]
pub struct Decoder<'a> {
    src: MemSource<'a>,
    header: StreamHeader,
    states: Vec<ChannelState>,
    interleaved: Vec<i32>,
    block_size: usize,
    channel: usize,
    sample_number: usize,
    channel0_blocks: usize,
    seek_pending: bool,
    finished: bool,
}

impl<'a> Decoder<'a> {
    /// Parses the stream header and creates a decoder positioned at the
    /// first command.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the header is truncated or malformed.
    pub fn new(bytes: &'a [u8]) -> Result<Self, DecodeError> {
        let mut src = MemSource::new(bytes);
        let header = parser::read_stream_header(&mut src)?;
        let states = (0..header.channels())
            .map(|_| {
                ChannelState::new(
                    header.nwrap(),
                    header.block_size(),
                    header.mean_blocks(),
                    header.file_type().initial_offset(),
                    header.version(),
                )
            })
            .collect();
        log::debug!(
            "decoding stream: version={} file_type={:?} channels={} block_size={} nwrap={}",
            header.version(),
            header.file_type(),
            header.channels(),
            header.block_size(),
            header.nwrap()
        );
        Ok(Self {
            src,
            interleaved: vec![0i32; header.channels() * header.block_size()],
            block_size: header.block_size(),
            header,
            states,
            channel: 0,
            sample_number: 0,
            channel0_blocks: 0,
            seek_pending: true,
            finished: false,
        })
    }

    /// Returns the stream header.
    pub const fn header(&self) -> &StreamHeader {
        &self.header
    }

    /// Returns true if FN_QUIT is already processed.
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// Returns the number of samples per channel decoded so far.
    pub const fn sample_number(&self) -> usize {
        self.sample_number
    }

    /// Returns the number of bits consumed so far.
    pub fn bit_position(&self) -> usize {
        self.src.current_bit_offset()
    }

    /// Processes one command from the stream.
    ///
    /// Returns `false` when FN_QUIT is read or has already been read. Unlike
    /// [`Decoder::run`], this doesn't notify `sink` of the header.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the stream is truncated or malformed.
    pub fn step<S: DecodeSink>(&mut self, sink: &mut S) -> Result<bool, DecodeError> {
        if self.finished {
            return Ok(false);
        }
        if self.channel == 0 && self.seek_pending {
            self.record_seek_entry(sink);
        }
        let block = parser::read_block(&mut self.src, self.block_size, self.header.nwrap())?;
        log::trace!("command fn={} ch={}", block.function_code(), self.channel);
        match block {
            Block::Quit => {
                self.finished = true;
                return Ok(false);
            }
            Block::Verbatim(v) => sink.verbatim(v.bytes()),
            Block::BitShift(s) => self.states[self.channel].set_bitshift(s),
            Block::BlockSize(n) => self.set_block_size(n as usize),
            ref data => {
                self.restore_block(data);
                self.advance_channel(sink);
            }
        }
        Ok(true)
    }

    /// Decodes the rest of the stream into `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the stream is truncated or malformed.
    pub fn run<S: DecodeSink>(&mut self, sink: &mut S) -> Result<(), DecodeError> {
        sink.header(&self.header);
        while self.step(sink)? {}
        log::debug!(
            "decoded {} samples per channel from {} bits",
            self.sample_number(),
            self.bit_position()
        );
        Ok(())
    }

    fn record_seek_entry<S: DecodeSink>(&mut self, sink: &mut S) {
        let entry = SeekEntry::capture(
            self.sample_number,
            self.src.as_bytes(),
            self.src.current_bit_offset(),
            &self.states,
        );
        sink.seek_entry(&entry);
        self.seek_pending = false;
    }

    fn set_block_size(&mut self, block_size: usize) {
        self.block_size = block_size;
        for state in &mut self.states {
            state.set_block_size(block_size);
        }
        self.interleaved
            .resize(self.header.channels() * block_size, 0);
    }

    /// Reconstructs the samples of a data block into the channel state.
    fn restore_block(&mut self, block: &Block) {
        let state = &mut self.states[self.channel];
        let bitshift = state.bitshift();
        let hist = state.nwrap();
        match block {
            Block::Zero => state.block_mut().fill(0),
            Block::Qlpc(q) => {
                let coffset = state.mean_offset(bitshift);
                predictor::qlpc_restore(
                    q.coefs(),
                    state.buffer_mut(),
                    hist,
                    coffset,
                    self.header.qlpc_offset(),
                    q.residual().values(),
                );
            }
            Block::Diff0(r) | Block::Diff1(r) | Block::Diff2(r) | Block::Diff3(r) => {
                let coffset = state.mean_offset(bitshift);
                predictor::fixed_restore(
                    block.fixed_order().unwrap_or(0),
                    state.buffer_mut(),
                    hist,
                    coffset,
                    r.values(),
                );
            }
            Block::Verbatim(_) | Block::BitShift(_) | Block::BlockSize(_) | Block::Quit => return,
        }
        state.push_mean(bitshift);
        state.wrap();
        bitshift::restore_shift(state.block_mut(), bitshift);

        let channels = self.header.channels();
        for (t, v) in state.block().iter().enumerate() {
            self.interleaved[t * channels + self.channel] = *v;
        }
    }

    fn advance_channel<S: DecodeSink>(&mut self, sink: &mut S) {
        if self.channel == 0 {
            self.channel0_blocks += 1;
            self.seek_pending = self.channel0_blocks % BLOCKS_PER_ENTRY == 0;
        }
        self.channel += 1;
        if self.channel == self.header.channels() {
            self.channel = 0;
            self.sample_number += self.block_size;
            sink.samples(&self.interleaved);
        }
    }
}

/// Decoded contents of a whole stream.
#[derive(Clone, Debug, Default)]
pub struct DecodedStream {
    header: Option<StreamHeader>,
    samples: Vec<i32>,
    verbatim: Vec<u8>,
    original: Vec<u8>,
    seek_entries: Vec<SeekEntry>,
}

impl DecodedStream {
    /// Returns the stream header.
    ///
    /// # Panics
    ///
    /// Panics if called on a value not filled by a decoder.
    pub fn header(&self) -> &StreamHeader {
        self.header
            .as_ref()
            .expect("DecodedStream is not filled by a decoder.")
    }

    /// Returns the interleaved samples.
    pub fn samples(&self) -> &[i32] {
        &self.samples
    }

    /// Returns the concatenation of all the verbatim chunks.
    pub fn verbatim_bytes(&self) -> &[u8] {
        &self.verbatim
    }

    /// Returns the reconstructed original file.
    ///
    /// This is the skipped header bytes, followed by the verbatim chunks and
    /// the samples serialized in the file type in the stream order.
    pub fn original_bytes(&self) -> &[u8] {
        &self.original
    }

    /// Returns the seek entries recorded during decoding.
    pub fn seek_entries(&self) -> &[SeekEntry] {
        &self.seek_entries
    }
}

impl DecodeSink for DecodedStream {
    fn header(&mut self, header: &StreamHeader) {
        self.original.extend_from_slice(header.skipped_bytes());
        self.header = Some(header.clone());
    }

    fn verbatim(&mut self, bytes: &[u8]) {
        self.verbatim.extend_from_slice(bytes);
        self.original.extend_from_slice(bytes);
    }

    fn samples(&mut self, interleaved: &[i32]) {
        self.samples.extend_from_slice(interleaved);
        let file_type = self.header.as_ref().map_or(FileType::default(), |h| h.file_type());
        for v in interleaved {
            write_sample(file_type, *v, &mut self.original);
        }
    }

    fn seek_entry(&mut self, entry: &SeekEntry) {
        self.seek_entries.push(*entry);
    }
}

/// Serializes a sample in the byte layout of `file_type`.
///
/// Types without a fixed PCM layout are written as 16-bit little endian.
fn write_sample(file_type: FileType, v: i32, dest: &mut Vec<u8>) {
    match file_type {
        FileType::S8 | FileType::U8 | FileType::Ulaw | FileType::Alaw => dest.push(v as u8),
        FileType::S16HL | FileType::U16HL => dest.extend_from_slice(&(v as u16).to_be_bytes()),
        FileType::S16LH
        | FileType::U16LH
        | FileType::Au1
        | FileType::Au2
        | FileType::Au3
        | FileType::RiffWave
        | FileType::Aiff => dest.extend_from_slice(&(v as u16).to_le_bytes()),
    }
}

/// Decodes a whole stream held in memory.
///
/// # Errors
///
/// Returns [`DecodeError`] if the stream is truncated or malformed.
pub fn decode(bytes: &[u8]) -> Result<DecodedStream, DecodeError> {
    let mut decoder = Decoder::new(bytes)?;
    let mut ret = DecodedStream::default();
    decoder.run(&mut ret)?;
    Ok(ret)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::bitsink::BitSink;
    use crate::bitsink::ByteSink;
    use crate::coding::StreamWriter;
    use crate::component::BitRepr;
    use crate::component::Residual;

    fn stream_with_blocks(header: &StreamHeader, blocks: &[Block]) -> Vec<u8> {
        let mut writer = StreamWriter::new(header).unwrap();
        for b in blocks {
            writer.push(b).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn decode_hand_made_stream() {
        let header = StreamHeader::new(2, FileType::S16LH, 2, 4, 0, 0).unwrap();
        let bytes = stream_with_blocks(
            &header,
            &[
                Block::Verbatim(crate::component::Verbatim::new(b"RIFF").unwrap()),
                Block::Diff0(Residual::new(3, &[1, 2, 3, 4]).unwrap()),
                Block::Diff1(Residual::new(1, &[1, 1, 1, 1]).unwrap()),
                Block::BitShift(2),
                Block::Zero,
                Block::Diff1(Residual::new(1, &[1, 0, -1, 0]).unwrap()),
            ],
        );
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.verbatim_bytes(), b"RIFF");
        assert_eq!(
            decoded.samples(),
            &[1, 1, 2, 2, 3, 3, 4, 4, 0, 5, 0, 5, 0, 4, 0, 4]
        );
        assert_eq!(decoded.header(), &header);
        assert_eq!(&decoded.original_bytes()[..6], &[b'R', b'I', b'F', b'F', 1, 0]);
        assert_eq!(decoded.original_bytes().len(), 4 + 16 * 2);
    }

    #[test]
    fn extreme_residual_is_restored_without_overflow() {
        let header = StreamHeader::new(2, FileType::S16LH, 1, 2, 0, 0).unwrap();
        let bytes = stream_with_blocks(
            &header,
            &[Block::Diff0(Residual::new(31, &[i32::MIN, i32::MAX]).unwrap())],
        );
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.samples(), &[i32::MIN, i32::MAX]);
    }

    #[test]
    fn block_size_change() {
        let header = StreamHeader::new(2, FileType::S16LH, 1, 4, 0, 0).unwrap();
        let bytes = stream_with_blocks(
            &header,
            &[
                Block::Diff0(Residual::new(3, &[1, 2, 3, 4]).unwrap()),
                Block::BlockSize(2),
                Block::Diff1(Residual::new(1, &[1, 1]).unwrap()),
            ],
        );
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.samples(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn stepping_reports_progress() {
        let header = StreamHeader::new(2, FileType::S16LH, 1, 4, 0, 0).unwrap();
        let bytes = stream_with_blocks(&header, &[Block::Zero, Block::BlockSize(2), Block::Zero]);
        let mut decoder = Decoder::new(&bytes).unwrap();
        let mut sink = DecodedStream::default();
        assert!(decoder.step(&mut sink).unwrap());
        assert_eq!(decoder.sample_number(), 4);
        assert!(decoder.step(&mut sink).unwrap());
        assert!(decoder.step(&mut sink).unwrap());
        assert_eq!(decoder.sample_number(), 6);
        assert!(!decoder.step(&mut sink).unwrap());
        assert!(decoder.is_finished());
        assert_eq!(sink.samples(), &[0; 6]);
    }

    #[test]
    fn missing_quit_is_truncation() {
        let header = StreamHeader::with_channels(1);
        let mut sink = ByteSink::new();
        header.write(&mut sink).unwrap();
        Block::Zero.write(&mut sink).unwrap();
        sink.align_to_byte().unwrap();
        let err = decode(sink.as_slice()).unwrap_err();
        assert!(err.is_truncation());
    }

    #[test]
    fn bad_magic_is_rejected_before_samples() {
        let err = decode(b"ajkx\x02\x00\x00\x00").unwrap_err();
        assert!(matches!(err, DecodeError::Format(_)));
        let err = decode(b"ajkg\x09\x00\x00\x00").unwrap_err();
        assert!(matches!(err, DecodeError::Format(_)));
    }

    #[test]
    fn seek_entries_are_recorded_every_hundred_blocks() {
        let header = StreamHeader::new(2, FileType::S16LH, 2, 4, 0, 0).unwrap();
        let blocks: Vec<Block> = (0..250 * 2)
            .map(|_| Block::Diff1(Residual::new(0, &[1, 0, 0, 0]).unwrap()))
            .collect();
        let bytes = stream_with_blocks(&header, &blocks);
        let decoded = decode(&bytes).unwrap();
        let entries = decoded.seek_entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].sample_number, 0);
        assert_eq!(entries[1].sample_number, 400);
        assert_eq!(entries[2].sample_number, 800);
        assert_eq!(entries[1].history[0], [100, 100, 100]);
        assert_eq!(entries[1].history[1], [100, 100, 100]);
    }

    #[test]
    fn qlpc_block_is_restored() {
        let header = StreamHeader::new(2, FileType::S16LH, 1, 4, 2, 0).unwrap();
        let residual = Residual::new(4, &[10, 5, 0, 0]).unwrap();
        let bytes = stream_with_blocks(
            &header,
            &[crate::component::Qlpc::new(&[32], residual).unwrap().into()],
        );
        let decoded = decode(&bytes).unwrap();
        // prediction is (32 + 32 * x) >> 5 = x + 1.
        assert_eq!(decoded.samples(), &[11, 17, 18, 19]);
    }
}
