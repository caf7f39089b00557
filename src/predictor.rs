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

//! Integer prediction kernels shared by the encoder and the decoder.
//!
//! All the functions here operate on a contiguous buffer `buf` where
//! `buf[..hist]` holds the channel history (oldest first) and `buf[hist..]`
//! holds the samples of the current block.

use super::constant::qlpc::QUANT_SHIFT;
use super::error::ConsistencyError;

/// Largest magnitude allowed for a residual produced by the encoder.
const MAX_RESIDUAL_MAGNITUDE: i64 = 1 << 30;

/// Computes residuals of the fixed polynomial predictor of `order` (0..=3).
///
/// For order 0, `coffset` is subtracted from each sample. Orders 1 to 3 use
/// the finite differences of the samples including the history.
///
/// # Panics
///
/// Panics if `order > 3`, if `hist < order`, or if `out` is shorter than the
/// block.
pub fn fixed_residual(order: usize, buf: &[i32], hist: usize, coffset: i32, out: &mut [i32]) {
    assert!(order <= 3 && hist >= order);
    let block = &buf[hist..];
    let out = &mut out[..block.len()];
    match order {
        0 => {
            for (r, s) in out.iter_mut().zip(block) {
                *r = s - coffset;
            }
        }
        1 => {
            for (t, r) in out.iter_mut().enumerate() {
                let i = t + hist;
                *r = buf[i] - buf[i - 1];
            }
        }
        2 => {
            for (t, r) in out.iter_mut().enumerate() {
                let i = t + hist;
                *r = buf[i] - 2 * buf[i - 1] + buf[i - 2];
            }
        }
        _ => {
            for (t, r) in out.iter_mut().enumerate() {
                let i = t + hist;
                *r = buf[i] - 3 * (buf[i - 1] - buf[i - 2]) - buf[i - 3];
            }
        }
    }
}

/// Restores the samples of the fixed polynomial predictor in place.
///
/// `buf[hist..hist + residual.len()]` is overwritten.
///
/// # Panics
///
/// Panics if `order > 3`, if `hist < order`, or if `buf` is too short.
pub fn fixed_restore(order: usize, buf: &mut [i32], hist: usize, coffset: i32, residual: &[i32]) {
    assert!(order <= 3 && hist >= order);
    assert!(buf.len() >= hist + residual.len());
    for (t, r) in residual.iter().enumerate() {
        let i = t + hist;
        let pred = match order {
            0 => coffset,
            1 => buf[i - 1],
            2 => buf[i - 1].wrapping_mul(2).wrapping_sub(buf[i - 2]),
            _ => buf[i - 1]
                .wrapping_sub(buf[i - 2])
                .wrapping_mul(3)
                .wrapping_add(buf[i - 3]),
        };
        buf[i] = r.wrapping_add(pred);
    }
}

#[inline]
fn qlpc_prediction(coefs: &[i32], buf: &[i32], i: usize, coffset: i32, qoffset: i32) -> i64 {
    let mut sum = i64::from(qoffset);
    for (j, c) in coefs.iter().enumerate() {
        let x = i64::from(buf[i - 1 - j]) - i64::from(coffset);
        sum = sum.wrapping_add(i64::from(*c).wrapping_mul(x));
    }
    sum >> QUANT_SHIFT
}

/// Computes residuals of the quantized LPC predictor.
///
/// The prediction is computed on the mean-removed samples as
/// `(qoffset + sum_j coefs[j] * (buf[i - 1 - j] - coffset)) >> QUANT_SHIFT`.
///
/// # Errors
///
/// Returns [`ConsistencyError`] if a residual does not fit in the range that
/// the decoder can restore without overflow.
///
/// # Panics
///
/// Panics if `hist < coefs.len()`.
pub fn qlpc_residual(
    coefs: &[i32],
    buf: &[i32],
    hist: usize,
    coffset: i32,
    qoffset: i32,
    out: &mut [i32],
) -> Result<(), ConsistencyError> {
    assert!(hist >= coefs.len());
    let block_len = buf.len() - hist;
    for (t, r) in out[..block_len].iter_mut().enumerate() {
        let i = t + hist;
        let pred = qlpc_prediction(coefs, buf, i, coffset, qoffset);
        let residual = i64::from(buf[i]) - i64::from(coffset) - pred;
        if residual.abs() >= MAX_RESIDUAL_MAGNITUDE {
            return Err(ConsistencyError::from_display(
                "qlpc.residual",
                "must be representable in 31 bits",
                &residual,
            ));
        }
        *r = residual as i32;
    }
    Ok(())
}

/// Restores the samples of the quantized LPC predictor in place.
///
/// # Panics
///
/// Panics if `hist < coefs.len()` or if `buf` is too short.
pub fn qlpc_restore(
    coefs: &[i32],
    buf: &mut [i32],
    hist: usize,
    coffset: i32,
    qoffset: i32,
    residual: &[i32],
) {
    assert!(hist >= coefs.len());
    assert!(buf.len() >= hist + residual.len());
    for (t, r) in residual.iter().enumerate() {
        let i = t + hist;
        let pred = qlpc_prediction(coefs, buf, i, coffset, qoffset) as i32;
        buf[i] = r.wrapping_add(pred).wrapping_add(coffset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[test]
    fn first_order_difference() {
        // history [.., 0, 0, 0], block [10, 12, 11, 15]
        let buf = [0, 0, 0, 10, 12, 11, 15];
        let mut out = [0i32; 4];
        fixed_residual(1, &buf, 3, 0, &mut out);
        assert_eq!(out, [10, 2, -1, 4]);

        let mut restored = [0, 0, 0, 0, 0, 0, 0];
        fixed_restore(1, &mut restored, 3, 0, &out);
        assert_eq!(restored, buf);
    }

    #[rstest]
    fn fixed_orders_are_invertible(
        #[values(0, 1, 2, 3)] order: usize,
        #[values(0, -7, 300)] coffset: i32,
    ) {
        let buf = [5, -3, 8, 100, -250, 31, 0, 7, 7, 7, -4096, 4095];
        let mut residual = [0i32; 9];
        fixed_residual(order, &buf, 3, coffset, &mut residual);

        let mut restored = buf;
        restored[3..].fill(0);
        fixed_restore(order, &mut restored, 3, coffset, &residual);
        assert_eq!(restored, buf);
    }

    #[test]
    fn third_order_on_cubic_is_constant() {
        let buf: Vec<i32> = (0..20).map(|t| t * t * t).collect();
        let mut out = vec![0i32; 17];
        fixed_residual(3, &buf, 3, 0, &mut out);
        assert!(out.iter().all(|r| *r == 6));
    }

    #[rstest]
    fn qlpc_is_invertible(#[values(0, 32)] qoffset: i32, #[values(0, 17, -1000)] coffset: i32) {
        let coefs = [58, -31, 4];
        let buf = [12, -40, 77, 120, 90, 33, -20, -61, -70, -40, 2, 51];
        let mut residual = [0i32; 9];
        qlpc_residual(&coefs, &buf, 3, coffset, qoffset, &mut residual).unwrap();

        let mut restored = buf;
        restored[3..].fill(0);
        qlpc_restore(&coefs, &mut restored, 3, coffset, qoffset, &residual);
        assert_eq!(restored, buf);
    }

    #[test]
    fn qlpc_prediction_uses_rounding_offset() {
        // coefficient 1.0 (= 32), previous sample 3, no mean offset.
        let buf = [3, 3];
        let mut out = [0i32; 1];
        qlpc_residual(&[32], &buf, 1, 0, 32, &mut out).unwrap();
        // (32 + 96) >> 5 = 4
        assert_eq!(out, [-1]);
        qlpc_residual(&[32], &buf, 1, 0, 0, &mut out).unwrap();
        assert_eq!(out, [0]);
    }

    #[test]
    fn qlpc_rejects_huge_residual() {
        let buf = [0, 0, i32::MAX / 2 + 1];
        let mut out = [0i32; 1];
        assert!(qlpc_residual(&[32, 32], &buf, 2, 0, 0, &mut out).is_err());
    }
}
