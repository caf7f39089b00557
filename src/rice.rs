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

//! Functions for Rice coding of residual blocks.

use seq_macro::seq;

use super::constant::rice::MAX_RICE_PARAMETER;

/// Encodes the sign bit into its LSB (for Rice coding).
#[inline]
pub const fn encode_signbit(v: i32) -> u32 {
    let is_negative = if v < 0 { 1 } else { 0 };
    v.unsigned_abs().wrapping_mul(2).wrapping_sub(is_negative)
}

/// Recovers a sign bit from its LSB.
#[inline]
pub const fn decode_signbit(v: u32) -> i32 {
    let is_negative = v % 2 == 1;
    if is_negative {
        !((v >> 1) as i32)
    } else {
        (v >> 1) as i32
    }
}

/// Returns the number of bits written by `put_unsigned(value, k)`.
#[inline]
pub const fn cost_unsigned(value: u32, k: usize) -> usize {
    ((value as u64) >> k) as usize + 1 + k
}

/// Returns the number of bits written by `put_signed(value, k)`.
#[inline]
pub const fn cost_signed(value: i32, k: usize) -> usize {
    cost_unsigned(encode_signbit(value), k + 1)
}

/// Table that contains the numbers of bits needed for a residual block.
///
/// `p_to_bits[k]` is the number of bits for coding all the values with
/// `put_signed(·, k)`.
#[derive(Clone, Debug, PartialEq, Eq)]
struct RiceBitTable {
    p_to_bits: [u64; MAX_RICE_PARAMETER + 1],
}

impl RiceBitTable {
    #[allow(clippy::identity_op)]
    fn from_signal(signal: &[i32]) -> Self {
        let mut p_to_bits = [0u64; MAX_RICE_PARAMETER + 1];
        let n = signal.len() as u64;
        seq!(p in 0..25 {
            p_to_bits[p] = n * (p as u64 + 2);
        });

        for v in signal.iter().map(|x| encode_signbit(*x)) {
            let mut v = u64::from(v) >> 1;
            seq!(p in 0..25 {
                p_to_bits[p] += v;
                v >>= 1;
            });
        }
        Self { p_to_bits }
    }

    /// Returns the smallest parameter that minimizes the bit count.
    fn minimizer(&self, max_p: usize) -> (usize, usize) {
        let mut best = (0, self.p_to_bits[0]);
        for (p, bits) in self.p_to_bits.iter().enumerate().take(max_p + 1).skip(1) {
            if *bits < best.1 {
                best = (p, *bits);
            }
        }
        (best.0, best.1 as usize)
    }
}

/// Finds the Rice parameter that minimizes the code length of `signal`.
///
/// Returns `(k, bits)` where `bits` is the exact number of bits for the
/// values coded with `put_signed(·, k)`.  Ties are resolved to the smaller
/// parameter.
///
/// # Examples
///
/// ```
/// # use shnenc::rice::*;
/// let (k, bits) = find_rice_parameter(&[0, 0, 0, 0], 24);
/// assert_eq!(k, 0);
/// assert_eq!(bits, 8);
/// ```
pub fn find_rice_parameter(signal: &[i32], max_p: usize) -> (usize, usize) {
    let max_p = std::cmp::min(max_p, MAX_RICE_PARAMETER);
    RiceBitTable::from_signal(signal).minimizer(max_p)
}

/// Computes the bits for coding `signal` with the fixed parameter `k`.
pub fn block_cost(signal: &[i32], k: usize) -> usize {
    signal.iter().map(|v| cost_signed(*v, k)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[test]
    fn signbit_folding() {
        assert_eq!(encode_signbit(0), 0);
        assert_eq!(encode_signbit(-1), 1);
        assert_eq!(encode_signbit(1), 2);
        assert_eq!(encode_signbit(-2), 3);
        for v in -300..300 {
            assert_eq!(decode_signbit(encode_signbit(v)), v);
        }
    }

    #[test]
    fn signbit_folding_at_extremes() {
        assert_eq!(decode_signbit(u32::MAX), i32::MIN);
        assert_eq!(decode_signbit(u32::MAX - 1), i32::MAX);
        assert_eq!(encode_signbit(i32::MIN), u32::MAX);
        assert_eq!(decode_signbit(encode_signbit(i32::MIN)), i32::MIN);
        assert_eq!(decode_signbit(encode_signbit(i32::MAX)), i32::MAX);
    }

    #[test]
    fn cost_of_example_residuals() {
        // [10, 2, -1, 4] with k = 2.
        assert_eq!(cost_signed(10, 2), 20 / 8 + 1 + 3);
        assert_eq!(cost_signed(2, 2), 4);
        assert_eq!(cost_signed(-1, 2), 4);
        assert_eq!(cost_signed(4, 2), 5);
    }

    #[rstest]
    fn table_matches_direct_costs(#[values(0, 1, 3, 10, 24)] k: usize) {
        let signal = [0, -1, 5, 1000, -4096, 77, 65535, -65536];
        let table = RiceBitTable::from_signal(&signal);
        assert_eq!(table.p_to_bits[k] as usize, block_cost(&signal, k));
    }

    #[test]
    fn parameter_search_is_optimal() {
        let signal: Vec<i32> = (0..256).map(|t| ((t * 37) % 201) - 100).collect();
        let (k, bits) = find_rice_parameter(&signal, MAX_RICE_PARAMETER);
        assert_eq!(bits, block_cost(&signal, k));
        for other in 0..=MAX_RICE_PARAMETER {
            assert!(block_cost(&signal, other) >= bits);
        }
    }

    #[test]
    fn parameter_search_respects_max() {
        let signal = [100_000, -100_000, 99_999];
        let (k, _bits) = find_rice_parameter(&signal, 4);
        assert_eq!(k, 4);
    }
}
