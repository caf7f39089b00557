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

//! Per-channel state carried across blocks.

use super::bitshift;

/// State of a channel that persists across blocks.
///
/// The encoder and the decoder keep exactly the same state for each channel:
/// the samples of the previous blocks needed for prediction, the means of
/// recent blocks, and the bitshift currently in effect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelState {
    /// `nwrap` history samples followed by the current block.
    buffer: Vec<i32>,
    nwrap: usize,
    /// Means of the most recent `nmean` blocks (oldest first).
    offsets: Vec<i32>,
    nmean: usize,
    bitshift: u32,
    version: u8,
}

impl ChannelState {
    /// Creates a zero-initialized state.
    ///
    /// `initial_offset` fills the mean history.
    pub fn new(
        nwrap: usize,
        block_size: usize,
        nmean: usize,
        initial_offset: i32,
        version: u8,
    ) -> Self {
        Self {
            buffer: vec![0i32; nwrap + block_size],
            nwrap,
            offsets: vec![initial_offset; std::cmp::max(1, nmean)],
            nmean,
            bitshift: 0,
            version,
        }
    }

    /// Returns the number of history samples.
    #[inline]
    pub const fn nwrap(&self) -> usize {
        self.nwrap
    }

    /// Returns the current block size.
    #[inline]
    pub fn block_size(&self) -> usize {
        self.buffer.len() - self.nwrap
    }

    /// Changes the block size, keeping the history.
    pub fn set_block_size(&mut self, block_size: usize) {
        self.buffer.resize(self.nwrap + block_size, 0);
    }

    /// Returns history followed by the current block.
    #[inline]
    pub fn buffer(&self) -> &[i32] {
        &self.buffer
    }

    /// Returns mutable history followed by the current block.
    #[inline]
    pub fn buffer_mut(&mut self) -> &mut [i32] {
        &mut self.buffer
    }

    /// Returns the current block.
    #[inline]
    pub fn block(&self) -> &[i32] {
        &self.buffer[self.nwrap..]
    }

    /// Returns the current block mutably.
    #[inline]
    pub fn block_mut(&mut self) -> &mut [i32] {
        &mut self.buffer[self.nwrap..]
    }

    /// Returns the bitshift currently in effect.
    #[inline]
    pub const fn bitshift(&self) -> u32 {
        self.bitshift
    }

    #[inline]
    pub fn set_bitshift(&mut self, shift: u32) {
        self.bitshift = shift;
    }

    /// Returns the stored block means, oldest first.
    #[inline]
    pub fn offsets(&self) -> &[i32] {
        &self.offsets
    }

    /// Returns the three most recent history samples, newest first.
    pub fn recent_history(&self) -> [i32; 3] {
        let mut ret = [0i32; 3];
        for (i, r) in ret.iter_mut().enumerate() {
            if i < self.nwrap {
                *r = self.buffer[self.nwrap - 1 - i];
            }
        }
        ret
    }

    /// Computes the mean offset subtracted before prediction.
    ///
    /// `bitshift` is the shift of the block being coded.
    pub fn mean_offset(&self, bitshift: u32) -> i32 {
        if self.nmean == 0 {
            return self.offsets[0];
        }
        let nmean = self.nmean as i64;
        let base = if self.version < 2 { 0 } else { nmean / 2 };
        let sum = self
            .offsets
            .iter()
            .fold(base, |acc, v| acc + i64::from(*v));
        let mean = (sum / nmean) as i32;
        if self.version < 2 {
            mean
        } else {
            bitshift::shift_down(mean, bitshift)
        }
    }

    /// Pushes the mean of the current block into the mean history.
    pub fn push_mean(&mut self, bitshift: u32) {
        if self.nmean == 0 {
            return;
        }
        let n = self.block_size() as i64;
        if n == 0 {
            return;
        }
        let base = if self.version < 2 { 0 } else { n / 2 };
        let sum = self
            .block()
            .iter()
            .fold(base, |acc, v| acc + i64::from(*v));
        let mean = (sum / n) as i32;
        self.offsets.rotate_left(1);
        let last = self.offsets.len() - 1;
        self.offsets[last] = if self.version < 2 {
            mean
        } else {
            mean.wrapping_shl(bitshift)
        };
    }

    /// Moves the tail of the current block into the history.
    pub fn wrap(&mut self) {
        let n = self.block_size();
        let nwrap = self.nwrap;
        self.buffer.copy_within(n..n + nwrap, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_keeps_last_samples() {
        let mut state = ChannelState::new(3, 4, 0, 0, 2);
        state.block_mut().copy_from_slice(&[1, 2, 3, 4]);
        state.wrap();
        assert_eq!(&state.buffer()[..3], &[2, 3, 4]);
        assert_eq!(state.recent_history(), [4, 3, 2]);
    }

    #[test]
    fn wrap_with_short_block() {
        let mut state = ChannelState::new(3, 4, 0, 0, 2);
        state.block_mut().copy_from_slice(&[1, 2, 3, 4]);
        state.wrap();
        state.set_block_size(2);
        state.block_mut().copy_from_slice(&[5, 6]);
        state.wrap();
        assert_eq!(&state.buffer()[..3], &[4, 5, 6]);
    }

    #[test]
    fn mean_offset_without_averaging() {
        let state = ChannelState::new(3, 4, 0, 0x80, 2);
        assert_eq!(state.mean_offset(0), 0x80);
        assert_eq!(state.mean_offset(3), 0x80);
    }

    #[test]
    fn running_mean_version2() {
        let mut state = ChannelState::new(3, 4, 2, 0, 2);
        state.block_mut().copy_from_slice(&[10, 11, 12, 13]);
        // (2 + 46) / 4 = 12
        state.push_mean(1);
        assert_eq!(state.offsets(), &[0, 24]);
        // (1 + 0 + 24) / 2 = 12, then >> 1
        assert_eq!(state.mean_offset(1), 6);
        assert_eq!(state.mean_offset(0), 12);
    }

    #[test]
    fn running_mean_version1() {
        let mut state = ChannelState::new(3, 4, 2, 0, 1);
        state.block_mut().copy_from_slice(&[10, 11, 12, 13]);
        // 46 / 4 = 11, no rounding and no shift
        state.push_mean(1);
        assert_eq!(state.offsets(), &[0, 11]);
        assert_eq!(state.mean_offset(1), 5);
    }

    #[test]
    fn negative_means_truncate_toward_zero() {
        let mut state = ChannelState::new(3, 3, 1, 0, 1);
        state.block_mut().copy_from_slice(&[-1, -1, -2]);
        state.push_mean(0);
        assert_eq!(state.offsets(), &[-1]);
    }
}
