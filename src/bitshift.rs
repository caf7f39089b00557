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

//! Removal of trailing zero bits shared by all the samples in a block.

/// Finds the number of trailing zero bits common to all the samples.
///
/// The result is capped at `max_shift`.  `max_shift` is returned when all the
/// samples are zero.
///
/// # Examples
///
/// ```
/// # use shnenc::bitshift::*;
/// assert_eq!(find_shift(&[4, -8, 12], 32), 2);
/// assert_eq!(find_shift(&[0, 0], 32), 32);
/// assert_eq!(find_shift(&[1024], 3), 3);
/// ```
pub fn find_shift(samples: &[i32], max_shift: u32) -> u32 {
    let acc = samples.iter().fold(0i32, |acc, v| acc | *v);
    if acc == 0 {
        max_shift
    } else {
        std::cmp::min(acc.trailing_zeros(), max_shift)
    }
}

/// Shifts every sample right by `shift` bits (arithmetic shift).
#[inline]
pub fn apply_shift(samples: &mut [i32], shift: u32) {
    if shift == 0 || shift >= i32::BITS {
        return;
    }
    for v in samples {
        *v >>= shift;
    }
}

/// Shifts every sample left by `shift` bits.
#[inline]
pub fn restore_shift(samples: &mut [i32], shift: u32) {
    if shift == 0 || shift >= i32::BITS {
        return;
    }
    for v in samples {
        *v <<= shift;
    }
}

/// Shifts a running-mean offset down to the domain of a shifted block.
///
/// This is an arithmetic (flooring) shift that also accepts `shift == 32`.
#[inline]
pub const fn shift_down(x: i32, shift: u32) -> i32 {
    if shift == 0 {
        x
    } else if shift >= i32::BITS {
        x >> (i32::BITS - 1)
    } else {
        x >> shift
    }
}
