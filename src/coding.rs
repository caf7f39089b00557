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

//! Controller connecting coding algorithms.

use std::cell::RefCell;

use super::bitshift;
use super::bitsink::BitSink;
use super::bitsink::ByteSink;
use super::component::BitRepr;
use super::component::Block;
use super::component::Qlpc;
use super::component::Residual;
use super::component::StreamHeader;
use super::component::Verbatim;
use super::config;
use super::constant::field::ENERGYSIZE;
use super::constant::field::FNSIZE;
use super::constant::field::VERBATIM_CKSIZE_SIZE;
use super::constant::fncode;
use super::constant::qlpc::ORDER_FIELD_SIZE;
use super::constant::qlpc::QUANT_SHIFT;
use super::constant::stream::MAGIC;
use super::constant::stream::VERBATIM_CHUNK_MAX;
use super::constant::MAX_BITS_PER_SAMPLE;
use super::constant::NBITPERLONG;
use super::error::ConsistencyError;
use super::error::EncodeError;
use super::error::OutputError;
use super::error::SourceError;
use super::error::SourceErrorReason;
use super::error::Verify;
use super::history::ChannelState;
use super::lpc;
use super::predictor;
use super::rice;
use super::source::FrameBuf;
use super::source::Source;

/// Largest sample magnitude accepted by the encoder.
const MAX_SAMPLE_MAGNITUDE: u32 = 1 << MAX_BITS_PER_SAMPLE;

/// Coded result of one block of one channel.
///
/// `bitshift` is set only when the channel's bitshift changed, and then
/// FN_BITSHIFT must be written before `block`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelBlock {
    pub bitshift: Option<u32>,
    pub block: Block,
}

impl ChannelBlock {
    /// Counts the number of bits of the commands.
    pub fn count_bits(&self) -> usize {
        self.bitshift
            .map_or(0, |s| Block::BitShift(s).count_bits())
            + self.block.count_bits()
    }

    /// Writes the commands to `dest`.
    ///
    /// # Errors
    ///
    /// Same as [`BitRepr::write`].
    pub fn write<S: BitSink>(&self, dest: &mut S) -> Result<(), OutputError<S>> {
        if let Some(shift) = self.bitshift {
            Block::BitShift(shift).write(dest)?;
        }
        self.block.write(dest)
    }
}

/// Returns the number of bits of the fixed polynomial block with `bits` of
/// residual codes.
#[inline]
const fn fixed_block_bits(order: usize, k: usize, bits: usize) -> usize {
    rice::cost_unsigned(fncode::DIFF0 + order as u32, FNSIZE)
        + rice::cost_unsigned(k as u32, ENERGYSIZE)
        + bits
}

#[inline]
fn qlpc_block_bits(coefs: &[i32], k: usize, bits: usize) -> usize {
    rice::cost_unsigned(fncode::QLPC, FNSIZE)
        + rice::cost_unsigned(k as u32, ENERGYSIZE)
        + rice::cost_unsigned(coefs.len() as u32, ORDER_FIELD_SIZE)
        + coefs
            .iter()
            .map(|c| rice::cost_signed(*c, QUANT_SHIFT))
            .sum::<usize>()
        + bits
}

/// Returns the number of bits for storing `n` samples as verbatim chunks of
/// four raw bytes per sample.
pub fn verbatim_bits(n: usize) -> usize {
    let bytes = n * 4;
    let chunks = (bytes + VERBATIM_CHUNK_MAX - 1) / VERBATIM_CHUNK_MAX;
    let header_bits = rice::cost_unsigned(fncode::VERBATIM, FNSIZE)
        + rice::cost_unsigned(VERBATIM_CHUNK_MAX as u32, VERBATIM_CKSIZE_SIZE);
    // A byte costs at least 9 bits (a terminating one and 8 LSBs.)
    chunks * header_bits + bytes * 9
}

/// Candidate selected so far.
struct Candidate {
    bits: usize,
    block: Block,
}

/// Helper struct holding working memory for predictor selection.
struct PredictorSelector {
    residual: Vec<i32>,
}

impl PredictorSelector {
    pub const fn new() -> Self {
        Self { residual: vec![] }
    }

    /// Tries fixed polynomial predictors of the orders up to `max_order`.
    fn fixed(
        &mut self,
        config: &config::Encoder,
        buf: &[i32],
        hist: usize,
        coffset: i32,
    ) -> Result<Candidate, ConsistencyError> {
        let mut best: Option<Candidate> = None;
        for order in 0..=config.fixed.max_order {
            predictor::fixed_residual(order, buf, hist, coffset, &mut self.residual);
            let (k, bits) = rice::find_rice_parameter(&self.residual, config.rice.max_parameter);
            let bits = fixed_block_bits(order, k, bits);
            if best.as_ref().map_or(true, |b| bits < b.bits) {
                let residual = Residual::from_parts(k as u8, self.residual.clone());
                best = Some(Candidate {
                    bits,
                    block: Block::fixed(order, residual),
                });
            }
        }
        best.ok_or_else(|| {
            ConsistencyError::from_display("fixed.max_order", "no candidate evaluated", &0)
        })
    }

    /// Estimates LPC coefficients and returns a QLPC candidate if it's
    /// applicable.
    fn qlpc(
        &mut self,
        config: &config::Encoder,
        buf: &[i32],
        hist: usize,
        coffset: i32,
        qoffset: i32,
    ) -> Option<Candidate> {
        let block = &buf[hist..];
        let estimate = lpc::estimate_lpc(
            block,
            coffset,
            &config.qlpc.window,
            config.max_lpc_order,
            config.qlpc.order_search_width,
        );
        if estimate.order() == 0 {
            return None;
        }
        #[cfg(feature = "experimental")]
        let coefs = if config.qlpc.use_direct_mse {
            lpc::lpc_with_direct_mse(block, coffset, &config.qlpc.window, estimate.order())
                .unwrap_or_else(|| estimate.coefs.clone())
        } else {
            estimate.coefs.clone()
        };
        #[cfg(not(feature = "experimental"))]
        let coefs = estimate.coefs.clone();

        let qcoefs = lpc::quantize_coefs(&coefs)?;
        predictor::qlpc_residual(&qcoefs, buf, hist, coffset, qoffset, &mut self.residual)
            .ok()?;
        let (k, bits) = rice::find_rice_parameter(&self.residual, config.rice.max_parameter);
        let bits = qlpc_block_bits(&qcoefs, k, bits);
        let residual = Residual::from_parts(k as u8, self.residual.clone());
        Some(Candidate {
            bits,
            block: Qlpc::from_parts(qcoefs, residual).into(),
        })
    }

    /// Finds the cheapest data block for the (shifted) block in `buf`.
    pub fn select(
        &mut self,
        config: &config::Encoder,
        buf: &[i32],
        hist: usize,
        coffset: i32,
        qoffset: i32,
    ) -> Result<Block, ConsistencyError> {
        self.residual.resize(buf.len() - hist, 0);
        let mut best = self.fixed(config, buf, hist, coffset)?;
        if config.max_lpc_order > 0 {
            if let Some(candidate) = self.qlpc(config, buf, hist, coffset, qoffset) {
                if candidate.bits < best.bits {
                    best = candidate;
                }
            }
        }
        Ok(best.block)
    }
}

thread_local! {
    /// Global (thread-local) working buffer for predictor selection.
    static PREDICTOR_SELECTOR: RefCell<PredictorSelector> = RefCell::new(PredictorSelector::new());
}

/// Checks if the samples are in the range the encoder supports.
///
/// # Errors
///
/// Returns `ConsistencyError` on the first sample out of range.
pub fn check_sample_range(samples: &[i32]) -> Result<(), ConsistencyError> {
    for v in samples {
        if v.unsigned_abs() > MAX_SAMPLE_MAGNITUDE {
            return Err(ConsistencyError::from_display(
                "sample",
                "must fit in 24 bits plus the file-type offset",
                v,
            ));
        }
    }
    Ok(())
}

/// Encodes one block of one channel and advances the channel state.
///
/// `samples` must be as long as the block size of `state`.
///
/// # Errors
///
/// Returns `ConsistencyError` if a sample is out of the supported range.
pub fn encode_channel_block(
    config: &config::Encoder,
    header: &StreamHeader,
    state: &mut ChannelState,
    samples: &[i32],
) -> Result<ChannelBlock, ConsistencyError> {
    check_sample_range(samples)?;
    state.block_mut().copy_from_slice(samples);

    let last_shift = state.bitshift();
    let found = bitshift::find_shift(state.block(), NBITPERLONG);
    let (shift, block) = if found == NBITPERLONG {
        (last_shift, Block::Zero)
    } else {
        bitshift::apply_shift(state.block_mut(), found);
        let coffset = state.mean_offset(found);
        let block = PREDICTOR_SELECTOR.with(|selector| {
            selector.borrow_mut().select(
                config,
                state.buffer(),
                state.nwrap(),
                coffset,
                header.qlpc_offset(),
            )
        })?;
        (found, block)
    };
    state.push_mean(shift);
    state.wrap();

    let bitshift = if shift == last_shift {
        None
    } else {
        state.set_bitshift(shift);
        Some(shift)
    };
    log::trace!(
        "block fn={} shift={:?} bits={}",
        block.function_code(),
        bitshift,
        block.count_bits()
    );
    Ok(ChannelBlock { bitshift, block })
}

/// Constructs `StreamHeader` from the configuration and the source.
///
/// # Errors
///
/// Returns `EncodeError` if the configuration is invalid or if the source
/// has unsupported parameters.
pub fn make_header<T: Source>(
    config: &config::Encoder,
    src: &T,
) -> Result<StreamHeader, EncodeError> {
    config.verify()?;
    if src.bits_per_sample() > MAX_BITS_PER_SAMPLE {
        return Err(SourceError::by_reason(SourceErrorReason::UnsupportedFormat).into());
    }
    let header = StreamHeader::new(
        config.version,
        src.file_type().unwrap_or(config.file_type),
        src.channels(),
        config.block_size,
        config.max_lpc_order,
        config.mean_blocks,
    )?;
    log::debug!(
        "stream header: version={} file_type={:?} channels={} block_size={} nwrap={} nmean={}",
        header.version(),
        header.file_type(),
        header.channels(),
        header.block_size(),
        header.nwrap(),
        header.mean_blocks(),
    );
    Ok(header)
}

/// Creates the initial states of all the channels.
pub fn initial_states(header: &StreamHeader) -> Vec<ChannelState> {
    (0..header.channels())
        .map(|_| {
            ChannelState::new(
                header.nwrap(),
                header.block_size(),
                header.mean_blocks(),
                header.file_type().initial_offset(),
                header.version(),
            )
        })
        .collect()
}

/// Output stream under construction.
#[derive(Clone, Debug)]
pub struct StreamWriter {
    sink: ByteSink,
    body_start: usize,
}

impl StreamWriter {
    /// Writes `header` and returns the writer positioned at the body.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyError` if a header field doesn't fit in the format.
    pub fn new(header: &StreamHeader) -> Result<Self, ConsistencyError> {
        let mut sink = ByteSink::with_capacity(header.count_bits() * 2);
        header
            .write(&mut sink)
            .map_err(OutputError::into_consistency)?;
        Ok(Self {
            sink,
            body_start: 8 * (MAGIC.len() + 1),
        })
    }

    /// Writes a command.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyError` if `block` doesn't fit in the format.
    pub fn push(&mut self, block: &Block) -> Result<(), ConsistencyError> {
        block
            .write(&mut self.sink)
            .map_err(OutputError::into_consistency)
    }

    /// Writes the coded result of a channel.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyError` if the block doesn't fit in the format.
    pub fn push_channel_block(&mut self, block: &ChannelBlock) -> Result<(), ConsistencyError> {
        block
            .write(&mut self.sink)
            .map_err(OutputError::into_consistency)
    }

    /// Writes `bytes` as verbatim chunks.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyError` if a chunk doesn't fit in the format.
    pub fn push_verbatim(&mut self, bytes: &[u8]) -> Result<(), ConsistencyError> {
        for chunk in bytes.chunks(VERBATIM_CHUNK_MAX) {
            self.push(&Verbatim::from_bytes(chunk.to_vec()).into())?;
        }
        Ok(())
    }

    /// Returns the number of bits written so far.
    pub fn bit_len(&self) -> usize {
        self.sink.len()
    }

    /// Writes FN_QUIT and the padding, and returns the bytes.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyError` if FN_QUIT cannot be written.
    pub fn finish(mut self) -> Result<Vec<u8>, ConsistencyError> {
        self.push(&Block::Quit)?;
        if let Err(e) = self.sink.pad_to_word(self.body_start) {
            match e {}
        }
        Ok(self.sink.into_inner())
    }
}

/// Encodes all the samples from `src` and returns the stream bytes.
///
/// # Errors
///
/// Returns `EncodeError` if the configuration is invalid, if `src` failed,
/// or if the samples are out of the supported range.
///
/// # Examples
///
/// ```
/// # use shnenc::*;
/// # use shnenc::source::PreloadedSignal;
/// let signal: Vec<i32> = (0..1000).map(|t| ((t * 7) % 200) - 100).collect();
/// let src = PreloadedSignal::from_samples(&signal, 2, 16);
/// let bytes = encode(&config::Encoder::default(), src).unwrap();
/// assert_eq!(&bytes[..4], b"ajkg");
/// assert_eq!(decode(&bytes).unwrap().samples(), &signal[..]);
/// ```
pub fn encode<T: Source>(config: &config::Encoder, src: T) -> Result<Vec<u8>, EncodeError> {
    encode_with_verbatim(config, src, &[], &[])
}

/// Encodes samples with bytes passed through before and after them.
///
/// `head` and `tail` (e.g. container header and trailer bytes) are stored
/// as FN_VERBATIM chunks and returned in the same order by the decoder.
///
/// # Errors
///
/// Same as [`encode`].
pub fn encode_with_verbatim<T: Source>(
    config: &config::Encoder,
    src: T,
    head: &[u8],
    tail: &[u8],
) -> Result<Vec<u8>, EncodeError> {
    #[cfg(feature = "par")]
    {
        if config.multithread {
            return super::par::encode_with_verbatim(config, src, head, tail);
        }
    }
    encode_with_verbatim_st(config, src, head, tail)
}

/// Single-threaded implementation of [`encode_with_verbatim`].
///
/// # Errors
///
/// Same as [`encode`].
pub fn encode_with_verbatim_st<T: Source>(
    config: &config::Encoder,
    mut src: T,
    head: &[u8],
    tail: &[u8],
) -> Result<Vec<u8>, EncodeError> {
    let header = make_header(config, &src)?;
    let mut writer = StreamWriter::new(&header)?;
    writer.push_verbatim(head)?;

    let mut states = initial_states(&header);
    let mut framebuf = FrameBuf::with_size(header.channels(), header.block_size());
    let mut current_size = header.block_size();
    let mut block_count = 0usize;
    loop {
        let read_samples = src.read_samples(&mut framebuf)?;
        if read_samples == 0 {
            break;
        }
        if read_samples != current_size {
            writer.push(&Block::BlockSize(read_samples as u32))?;
            current_size = read_samples;
            for state in &mut states {
                state.set_block_size(current_size);
            }
        }
        for (ch, state) in states.iter_mut().enumerate() {
            let samples = &framebuf.channel_slice(ch)[..read_samples];
            let coded = encode_channel_block(config, &header, state, samples)?;
            writer.push_channel_block(&coded)?;
        }
        block_count += 1;
    }
    writer.push_verbatim(tail)?;
    log::debug!(
        "encoded {} blocks into {} bits",
        block_count,
        writer.bit_len()
    );
    Ok(writer.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::FileType;
    use crate::source::PreloadedSignal;
    use crate::test_helper;

    use rstest::rstest;

    fn single_thread_config() -> config::Encoder {
        config::Encoder {
            multithread: false,
            ..config::Encoder::default()
        }
    }

    #[test]
    fn zero_block_is_a_single_command() {
        let config = single_thread_config();
        let header = StreamHeader::with_channels(1);
        let mut state = initial_states(&header).remove(0);
        let coded = encode_channel_block(&config, &header, &mut state, &[0; 256]).unwrap();
        assert_eq!(coded.bitshift, None);
        assert_eq!(coded.block, Block::Zero);
        assert_eq!(coded.count_bits(), 5);
    }

    #[test]
    fn zero_block_keeps_previous_shift() {
        let config = single_thread_config();
        let header = StreamHeader::with_channels(1);
        let mut state = initial_states(&header).remove(0);
        let samples: Vec<i32> = (0..256).map(|t| (t % 13 - 6) * 4).collect();
        let coded = encode_channel_block(&config, &header, &mut state, &samples).unwrap();
        assert_eq!(coded.bitshift, Some(2));
        let coded = encode_channel_block(&config, &header, &mut state, &[0; 256]).unwrap();
        assert_eq!(coded.bitshift, None);
        assert_eq!(state.bitshift(), 2);
    }

    #[test]
    fn ramp_is_coded_with_difference() {
        let config = single_thread_config();
        let header = StreamHeader::with_channels(1);
        let mut state = initial_states(&header).remove(0);
        let samples: Vec<i32> = (0..256).map(|t| 1000 + 3 * t).collect();
        let coded = encode_channel_block(&config, &header, &mut state, &samples).unwrap();
        assert!(matches!(coded.block, Block::Diff1(_) | Block::Diff2(_)));
    }

    #[test]
    fn out_of_range_sample_is_rejected() {
        let config = single_thread_config();
        let mut signal = vec![0i32; 64];
        signal[10] = 1 << 26;
        let src = PreloadedSignal::from_samples(&signal, 1, 24);
        assert!(matches!(
            encode(&config, src),
            Err(EncodeError::Consistency(_))
        ));
    }

    #[test]
    fn too_many_bits_per_sample_is_rejected() {
        let src = PreloadedSignal::from_samples(&[0; 16], 1, 32);
        assert!(matches!(
            encode(&single_thread_config(), src),
            Err(EncodeError::Source(_))
        ));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = single_thread_config();
        config.version = 0;
        let src = PreloadedSignal::from_samples(&[0; 16], 1, 16);
        assert!(matches!(encode(&config, src), Err(EncodeError::Config(_))));
    }

    #[rstest]
    fn chosen_blocks_are_cheaper_than_verbatim(
        #[values(0, 8, 32)] max_lpc_order: usize,
        #[values(1, 2)] version: u8,
    ) {
        let config = config::Encoder {
            max_lpc_order,
            multithread: false,
            ..config::Encoder::for_version(version)
        };
        let header = StreamHeader::new(version, FileType::S16LH, 1, 256, max_lpc_order, 4).unwrap();
        let mut state = initial_states(&header).remove(0);
        let signal = test_helper::white_noise(256 * 4, 1 << 15, 777);
        for samples in signal.chunks(256) {
            let coded = encode_channel_block(&config, &header, &mut state, samples).unwrap();
            assert!(coded.block.count_bits() <= verbatim_bits(samples.len()));
        }
    }

    #[test]
    fn stream_is_word_padded() {
        let signal = test_helper::sinusoid_plus_noise(1000, 50, 2000.0, 8, 3);
        let src = PreloadedSignal::from_samples(&signal, 1, 16);
        let bytes = encode(&single_thread_config(), src).unwrap();
        assert_eq!((bytes.len() - 5) % 4, 0);
    }

    #[test]
    fn short_tail_emits_block_size() {
        let config = config::Encoder {
            block_size: 100,
            ..single_thread_config()
        };
        let signal = test_helper::sinusoid_plus_noise(250, 20, 500.0, 4, 5);
        let src = PreloadedSignal::from_samples(&signal, 1, 16);
        let bytes = encode(&config, src).unwrap();
        let decoded = crate::decode(&bytes).unwrap();
        assert_eq!(decoded.samples(), &signal[..]);
    }
}
