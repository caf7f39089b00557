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

//! This module is for parallel encoding. Only compiled when "par" feature is enabled.
//!
//! Blocks of a channel depend on each other through the channel state, so
//! the work is split by channels: each worker thread exclusively owns the
//! states of the channels assigned to it, and the main thread serializes the
//! coded blocks in the stream order.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;

use log::info;

use super::coding;
use super::coding::ChannelBlock;
use super::coding::StreamWriter;
use super::component::Block;
use super::component::StreamHeader;
use super::config;
use super::constant;
use super::constant::envvar_key;
use super::constant::panic_msg;
use super::error::ConsistencyError;
use super::error::EncodeError;
use super::error::SourceError;
use super::history::ChannelState;
use super::source::FrameBuf;
use super::source::Source;

use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;

/// `Arc::into_inner` with unwrapping.
///
/// This function is introduced for conditional compilation for lowering MSRV.
/// The race condition described in the document of [`Arc::try_into`] will
/// not happen in the current use cases; however, [`Arc::into_inner`] will be
/// the future standard so we should delete the second definition when we are
/// ready to bump MSRV.
#[rustversion::since(1.70)]
#[inline]
fn destruct_arc<T: std::fmt::Debug>(ptr: Arc<T>) -> T {
    Arc::into_inner(ptr).expect(panic_msg::ARC_DESTRUCT_FAILED)
}

#[rustversion::before(1.70)]
#[inline]
fn destruct_arc<T: std::fmt::Debug>(ptr: Arc<T>) -> T {
    Arc::try_unwrap(ptr).expect(panic_msg::ARC_DESTRUCT_FAILED)
}

/// Sink object that stores encoding results.
///
/// This is currently just a `BTreeMap<usize, T>` with some utility functions.
#[derive(Debug)]
struct ParSink<T> {
    data: Mutex<BTreeMap<usize, T>>,
}

impl<T> ParSink<T> {
    /// Creates `ParSink` object.
    pub fn new() -> Self {
        Self {
            data: Mutex::new(BTreeMap::new()),
        }
    }

    /// Stores a computation result `element` with a serial id `idx`.
    pub fn push(&self, idx: usize, element: T) {
        let mut data = self.data.lock().expect(panic_msg::MUTEX_LOCK_FAILED);
        data.insert(idx, element);
    }

    /// Consumes `self` and calls `f` in the order of the serial id.
    pub fn finalize<F>(self, f: F)
    where
        F: FnMut(T),
    {
        let data = self.data.into_inner().expect(panic_msg::MUTEX_DROP_FAILED);
        data.into_values().for_each(f);
    }
}

type CodedResult = Result<ChannelBlock, ConsistencyError>;

/// Block of samples of all the channels, shared by the workers.
struct NumberedBlock {
    framebuf: FrameBuf,
    block_number: usize,
    len: usize,
}

struct FeedStats {
    pub block_sizes: Vec<usize>,
    pub worker_starvation_count: usize,
}

/// Handle of a worker thread that owns a subset of channels.
struct ChannelWorker {
    queue: Sender<Option<Arc<NumberedBlock>>>,
    thread_handle: thread::JoinHandle<()>,
}

impl ChannelWorker {
    /// Spawns a worker that encodes the channels in `states`.
    ///
    /// Each element of `states` is a pair of the channel index and its
    /// state.
    fn spawn(
        config: Arc<config::Encoder>,
        header: Arc<StreamHeader>,
        mut states: Vec<(usize, ChannelState)>,
        parsink: Arc<ParSink<CodedResult>>,
    ) -> Self {
        let (queue, receiver): (_, Receiver<Option<Arc<NumberedBlock>>>) =
            crossbeam_channel::bounded(constant::par::BLOCK_QUEUE_MULTIPLICITY);
        let thread_handle = thread::spawn(move || {
            let channels = header.channels();
            while let Some(block) = receiver.recv().expect(panic_msg::MPMC_RECV_FAILED) {
                for (ch, state) in &mut states {
                    if state.block_size() != block.len {
                        state.set_block_size(block.len);
                    }
                    let samples = &block.framebuf.channel_slice(*ch)[..block.len];
                    let result = coding::encode_channel_block(&config, &header, state, samples);
                    parsink.push(block.block_number * channels + *ch, result);
                }
            }
        });
        Self {
            queue,
            thread_handle,
        }
    }

    /// Sends a block and returns true if the worker was waiting for it.
    #[inline]
    fn enqueue(&self, block: Arc<NumberedBlock>) -> bool {
        let starved = self.queue.is_empty();
        self.queue
            .send(Some(block))
            .expect(panic_msg::MPMC_SEND_FAILED);
        starved
    }

    fn request_stop(&self) {
        self.queue.send(None).expect(panic_msg::MPMC_SEND_FAILED);
    }

    fn join(self) {
        self.thread_handle
            .join()
            .expect(panic_msg::THREAD_JOIN_FAILED);
    }
}

/// Reads from source and sends the blocks to all the workers.
///
/// # Errors
///
/// It propagates errors from `Source::read_samples`.
fn feed_blocks<T: Source>(
    mut src: T,
    header: &StreamHeader,
    workers: &[ChannelWorker],
) -> Result<FeedStats, SourceError> {
    let mut block_sizes = vec![];
    let mut worker_starvation_count = 0usize;
    loop {
        let mut framebuf = FrameBuf::with_size(header.channels(), header.block_size());
        let read_samples = src.read_samples(&mut framebuf)?;
        if read_samples == 0 {
            break;
        }
        let block = Arc::new(NumberedBlock {
            framebuf,
            block_number: block_sizes.len(),
            len: read_samples,
        });
        block_sizes.push(read_samples);
        for worker in workers {
            if worker.enqueue(Arc::clone(&block)) {
                worker_starvation_count += 1;
            }
        }
    }
    Ok(FeedStats {
        block_sizes,
        worker_starvation_count,
    })
}

/// Determines worker counts considering various cues.
fn determine_worker_count(config: &config::Encoder) -> Result<usize, SourceError> {
    let default_parallelism = std::thread::available_parallelism()
        .map_err(SourceError::from_io_error)?
        .get();
    let default_parallelism = std::env::var(envvar_key::DEFAULT_PARALLELISM)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(default_parallelism);
    Ok(config
        .workers
        .map_or(default_parallelism, NonZeroUsize::get))
}

/// Parallel version of `encode_with_verbatim`.
///
/// This function is internally called by `encode_with_verbatim` when
/// `config.multithread == true`. The output is identical to the one from the
/// single-threaded encoder.
///
/// # Errors
///
/// Same as [`crate::encode`].
///
/// # Panics
///
/// This function panics when an internal error regarding inter-thread
/// communication.
pub fn encode_with_verbatim<T: Source>(
    config: &config::Encoder,
    src: T,
    head: &[u8],
    tail: &[u8],
) -> Result<Vec<u8>, EncodeError> {
    let header = coding::make_header(config, &src)?;
    let mut writer = StreamWriter::new(&header)?;
    writer.push_verbatim(head)?;

    let channels = header.channels();
    let worker_count = determine_worker_count(config)?.clamp(1, channels);
    let mut assignments: Vec<Vec<(usize, ChannelState)>> =
        (0..worker_count).map(|_| vec![]).collect();
    for (ch, state) in coding::initial_states(&header).into_iter().enumerate() {
        assignments[ch % worker_count].push((ch, state));
    }

    let config = Arc::new(config.clone());
    let header = Arc::new(header);
    let parsink: Arc<ParSink<CodedResult>> = Arc::new(ParSink::new());
    let workers: Vec<ChannelWorker> = assignments
        .into_iter()
        .map(|states| {
            ChannelWorker::spawn(
                Arc::clone(&config),
                Arc::clone(&header),
                states,
                Arc::clone(&parsink),
            )
        })
        .collect();

    let feed_result = feed_blocks(src, &header, &workers);
    for worker in &workers {
        worker.request_stop();
    }
    for worker in workers {
        worker.join();
    }
    let feed_stats = feed_result?;

    info!(
        target: "shnenc::par::jsonl",
        "{{ worker_count: {}, block_count: {}, worker_starvation_count: {} }}",
        worker_count,
        feed_stats.block_sizes.len(),
        feed_stats.worker_starvation_count,
    );

    let mut coded: Vec<CodedResult> = Vec::with_capacity(feed_stats.block_sizes.len() * channels);
    destruct_arc(parsink).finalize(|r| coded.push(r));
    assert!(
        coded.len() == feed_stats.block_sizes.len() * channels,
        "{}",
        panic_msg::DATA_INCONSISTENT
    );

    let mut current_size = header.block_size();
    for (idx, result) in coded.into_iter().enumerate() {
        if idx % channels == 0 {
            let block_size = feed_stats.block_sizes[idx / channels];
            if block_size != current_size {
                writer.push(&Block::BlockSize(block_size as u32))?;
                current_size = block_size;
            }
        }
        writer.push_channel_block(&result?)?;
    }
    writer.push_verbatim(tail)?;
    Ok(writer.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::PreloadedSignal;
    use crate::test_helper;

    use rstest::rstest;

    #[test]
    #[allow(clippy::field_reassign_with_default)]
    fn test_determine_worker_count() {
        // manually set by config
        let mut config = config::Encoder::default();
        config.workers = NonZeroUsize::new(8);
        let result = determine_worker_count(&config);
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), 8);

        // default
        let config = config::Encoder::default();
        let result = determine_worker_count(&config);
        assert!(result.is_ok());
        if std::env::var(envvar_key::DEFAULT_PARALLELISM).is_err() {
            assert_eq!(
                result.unwrap(),
                std::thread::available_parallelism().unwrap().get()
            );
        }
    }

    #[test]
    fn par_sink_finalization() {
        const REFERENCE: [&str; 5] = ["ParSink", "sorts", "randomly", "ordered", "elems"];
        let sink = Arc::new(ParSink::new());
        let handles = (0..REFERENCE.len()).map(|t| {
            let sink = Arc::clone(&sink);
            thread::spawn(move || sink.push(t, REFERENCE[t]))
        });
        for h in handles {
            h.join().expect(panic_msg::THREAD_JOIN_FAILED);
        }
        let mut result = vec![];
        destruct_arc(sink).finalize(|v| result.push(v));
        assert_eq!(result, REFERENCE);
    }

    #[rstest]
    fn output_matches_single_thread(
        #[values(1, 2, 3, 5)] channels: usize,
        #[values(1, 2, 4)] workers: usize,
        #[values(0, 8)] max_lpc_order: usize,
    ) {
        let signal_len = 1000;
        let channel_signals: Vec<Vec<i32>> = (0..channels)
            .map(|ch| {
                test_helper::sinusoid_plus_noise(
                    signal_len,
                    20 + 7 * ch,
                    3000.0,
                    16,
                    ch as u64,
                )
            })
            .collect();
        let signal = test_helper::interleave(&channel_signals);
        let src = PreloadedSignal::from_samples(&signal, channels, 16);

        let mut config = config::Encoder {
            max_lpc_order,
            workers: NonZeroUsize::new(workers),
            ..config::Encoder::default()
        };
        config.multithread = false;
        let expected = coding::encode_with_verbatim(&config, src.clone(), b"head", b"tail")
            .expect("encoding failed");
        let actual =
            encode_with_verbatim(&config, src, b"head", b"tail").expect("encoding failed");
        assert_eq!(actual, expected);
    }

    #[test]
    fn worker_error_is_propagated() {
        let mut signal = vec![0i32; 2 * 600];
        signal[2 * 300 + 1] = 1 << 27;
        let src = PreloadedSignal::from_samples(&signal, 2, 24);
        let config = config::Encoder {
            workers: NonZeroUsize::new(2),
            ..config::Encoder::default()
        };
        assert!(matches!(
            encode_with_verbatim(&config, src, &[], &[]),
            Err(EncodeError::Consistency(_))
        ));
    }
}
