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

//! Algorithms for quantized linear-prediction coding (QLPC).

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::Deserialize;
use serde::Serialize;

use super::constant::qlpc::ESTIMATED_BITS_PER_COEF;
use super::constant::qlpc::MAX_COEF_MAGNITUDE;
use super::constant::qlpc::MAX_ORDER;
use super::constant::qlpc::QUANT_SHIFT;

/// Analysis window descriptor.
///
/// This enum is `Serializable` and `Deserializable` because this will be
/// directly used in config structs.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Window {
    Rectangle,
    Tukey { alpha: f32 },
}

impl Eq for Window {}

impl PartialOrd for Window {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Window {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        format!("{self:?}").cmp(&format!("{other:?}"))
    }
}

impl Window {
    /// Computes the window weights for `len` samples.
    #[inline]
    pub fn weights(&self, len: usize) -> Vec<f32> {
        match *self {
            Self::Rectangle => vec![1.0f32; len],
            Self::Tukey { alpha } => {
                let max_t = len as f32 - 1.0;
                let alpha_len = alpha * max_t;
                (0..len)
                    .map(|t| {
                        let t = t as f32;
                        if t < alpha_len / 2.0 {
                            0.5 * (1.0 - (2.0 * std::f32::consts::PI * t / alpha_len).cos())
                        } else if t < max_t - alpha_len / 2.0 {
                            1.0
                        } else {
                            0.5 * (1.0
                                - (2.0 * std::f32::consts::PI * (max_t - t) / alpha_len).cos())
                        }
                    })
                    .collect()
            }
        }
    }
}

impl Default for Window {
    fn default() -> Self {
        Self::Rectangle
    }
}

type WindowMap = BTreeMap<(usize, Window), Rc<[f32]>>;
thread_local! {
    static WINDOW_CACHE: RefCell<WindowMap> = RefCell::new(BTreeMap::new());
}

fn get_window(window: &Window, size: usize) -> Rc<[f32]> {
    let key = (size, window.clone());
    WINDOW_CACHE.with(|caches| {
        let mut caches = caches.borrow_mut();
        Rc::clone(
            caches
                .entry(key)
                .or_insert_with(|| Rc::from(window.weights(size))),
        )
    })
}

/// Quantizes LPC coefficients with the fixed shift [`QUANT_SHIFT`].
///
/// Returns `None` if a coefficient is too large to be coded.
///
/// # Examples
///
/// ```
/// # use shnenc::lpc::*;
/// let q = quantize_coefs(&[1.0, -0.5, 0.01]).unwrap();
/// assert_eq!(q.as_slice(), &[32, -16, 0]);
/// ```
pub fn quantize_coefs(coefs: &[f32]) -> Option<heapless::Vec<i32, MAX_ORDER>> {
    let scalefac = (1u32 << QUANT_SHIFT) as f32;
    let mut ret = heapless::Vec::new();
    for c in coefs {
        let q = c.mul_add(scalefac, 0.5).floor();
        if !q.is_finite() || q.abs() > MAX_COEF_MAGNITUDE as f32 {
            return None;
        }
        ret.push(q as i32).ok()?;
    }
    Some(ret)
}

/// Compute auto-correlation coefficients.
///
/// `dest[tau]` is set to `sum_t signal[t] * signal[t - tau]` for
/// `tau < order`.
///
/// # Panics
///
/// Panics if `dest` is shorter than `order`.
pub fn auto_correlation(order: usize, signal: &[f32], dest: &mut [f32]) {
    assert!(dest.len() >= order);
    for (tau, p) in dest.iter_mut().take(order).enumerate() {
        *p = signal
            .iter()
            .skip(tau)
            .zip(signal.iter())
            .map(|(x, y)| x * y)
            .sum();
    }
}

/// Returns the estimated bits per sample of a residual with the energy `err`.
#[inline]
fn estimated_bits_per_sample(err: f32, len: usize) -> f32 {
    let escale = 0.5 * std::f32::consts::LN_2 * std::f32::consts::LN_2 / len as f32;
    if err > 0.0 {
        (0.5 * (escale * err).log2()).max(0.0)
    } else {
        0.0
    }
}

/// Order selected by the search and its (unquantized) coefficients.
#[derive(Clone, Debug, PartialEq)]
pub struct LpcEstimate {
    pub coefs: heapless::Vec<f32, MAX_ORDER>,
    pub estimated_bits: f32,
}

impl LpcEstimate {
    /// Returns the selected LPC order.
    pub fn order(&self) -> usize {
        self.coefs.len()
    }
}

/// Working buffer for (unquantized) LPC estimation.
struct LpcEstimator {
    /// Buffer for storing windowed and mean-removed signal.
    windowed_signal: Vec<f32>,
    /// Buffer for storing auto-correlation coefficients.
    corr_coefs: Vec<f32>,
    #[cfg(feature = "experimental")]
    /// Buffer for the delay-sum matrix.
    delay_sum: nalgebra::DMatrix<f32>,
}

impl LpcEstimator {
    pub fn new() -> Self {
        Self {
            windowed_signal: vec![],
            corr_coefs: vec![],
            #[cfg(feature = "experimental")]
            delay_sum: nalgebra::DMatrix::zeros(MAX_ORDER, MAX_ORDER),
        }
    }

    fn fill_windowed_signal(&mut self, signal: &[i32], offset: i32, window: &[f32]) {
        self.windowed_signal.clear();
        for (t, &v) in signal.iter().enumerate() {
            self.windowed_signal.push((v - offset) as f32 * window[t]);
        }
    }

    /// Runs the Levinson-Durbin recursion and selects the order.
    ///
    /// Orders are tried in increasing order up to `max_order`. When
    /// `search_width` is given, the search stops once the order exceeds the
    /// best order found so far by more than `search_width`.
    pub fn select_order(
        &mut self,
        signal: &[i32],
        offset: i32,
        window: &Window,
        max_order: usize,
        search_width: Option<usize>,
    ) -> LpcEstimate {
        let len = signal.len();
        let max_order = max_order.min(MAX_ORDER).min(len.saturating_sub(1));
        self.fill_windowed_signal(signal, offset, &get_window(window, len));
        self.corr_coefs.resize(max_order + 1, 0.0);
        auto_correlation(max_order + 1, &self.windowed_signal, &mut self.corr_coefs);

        let mut err = self.corr_coefs[0];
        let mut best = LpcEstimate {
            coefs: heapless::Vec::new(),
            estimated_bits: len as f32 * estimated_bits_per_sample(err, len),
        };
        if err <= 0.0 {
            return best;
        }

        let mut coefs = [0f32; MAX_ORDER];
        let mut prev = [0f32; MAX_ORDER];
        for order in 1..=max_order {
            if let Some(width) = search_width {
                if order > best.order() + width {
                    break;
                }
            }
            let mut acc = self.corr_coefs[order];
            for j in 0..(order - 1) {
                acc -= coefs[j] * self.corr_coefs[order - 1 - j];
            }
            let k = acc / err;
            prev[..order].copy_from_slice(&coefs[..order]);
            coefs[order - 1] = k;
            for j in 0..(order - 1) {
                coefs[j] = k.mul_add(-prev[order - 2 - j], prev[j]);
            }
            err *= 1.0 - k * k;
            if !(err > 0.0) {
                break;
            }

            let bits = (len as f32).mul_add(
                estimated_bits_per_sample(err, len),
                (order * ESTIMATED_BITS_PER_COEF) as f32,
            );
            if bits < best.estimated_bits {
                best.estimated_bits = bits;
                best.coefs.clear();
                // `order <= MAX_ORDER` so this never fails.
                let _ = best.coefs.extend_from_slice(&coefs[..order]);
            }
        }
        best
    }

    /// Re-estimates coefficients of the given order by least squares.
    #[cfg(feature = "experimental")]
    pub fn refine_with_direct_mse(
        &mut self,
        signal: &[i32],
        offset: i32,
        window: &Window,
        order: usize,
    ) -> Option<heapless::Vec<f32, MAX_ORDER>> {
        if order == 0 || signal.len() <= order {
            return None;
        }
        self.fill_windowed_signal(signal, offset, &get_window(window, signal.len()));
        let x = &self.windowed_signal;

        self.delay_sum.resize_mut(order, order, 0.0f32);
        self.delay_sum.fill(0.0f32);
        let mut xy = nalgebra::DVector::<f32>::zeros(order);
        for t in order..x.len() {
            for i in 0..order {
                xy[i] += x[t] * x[t - 1 - i];
                for j in i..order {
                    self.delay_sum[(i, j)] += x[t - 1 - i] * x[t - 1 - j];
                }
            }
        }
        for i in 0..order {
            for j in (i + 1)..order {
                self.delay_sum[(j, i)] = self.delay_sum[(i, j)];
            }
        }

        let mut regularizer = f32::EPSILON;
        loop {
            if let Some(decompose) = self.delay_sum.clone().cholesky() {
                decompose.solve_mut(&mut xy);
                break;
            }
            if regularizer > 1.0e6 {
                return None;
            }
            for i in 0..order {
                self.delay_sum[(i, i)] += regularizer;
            }
            regularizer *= 10.0;
        }
        let mut ret = heapless::Vec::new();
        for i in 0..order {
            ret.push(xy[i]).ok()?;
        }
        Some(ret)
    }
}

thread_local! {
    /// Global (thread-local) working buffer for LPC estimation.
    static LPC_ESTIMATOR: RefCell<LpcEstimator> = RefCell::new(LpcEstimator::new());
}

/// Selects the LPC order and estimates coefficients with the auto-correlation
/// method.
///
/// `offset` is subtracted from the samples before the analysis.
pub fn estimate_lpc(
    signal: &[i32],
    offset: i32,
    window: &Window,
    max_order: usize,
    search_width: Option<usize>,
) -> LpcEstimate {
    LPC_ESTIMATOR.with(|estimator| {
        estimator
            .borrow_mut()
            .select_order(signal, offset, window, max_order, search_width)
    })
}

/// Estimates LPC coefficients of `order` with direct MSE method.
#[cfg(feature = "experimental")]
pub fn lpc_with_direct_mse(
    signal: &[i32],
    offset: i32,
    window: &Window,
    order: usize,
) -> Option<heapless::Vec<f32, MAX_ORDER>> {
    LPC_ESTIMATOR.with(|estimator| {
        estimator
            .borrow_mut()
            .refine_with_direct_mse(signal, offset, window, order)
    })
}

#[cfg(test)]
#[allow(clippy::pedantic, clippy::nursery, clippy::needless_range_loop)]
mod tests {
    use super::*;
    use crate::test_helper;

    use rstest::rstest;
    use std::f32::consts::PI;

    #[test]
    fn auto_correlation_computation() {
        let mut signal = [0f32; 128];
        for t in 0..signal.len() {
            signal[t] = (t as f32 / 32.0 * 2.0 * PI).sin() * 1024.0;
        }
        let mut corr = [0f32; 64];
        auto_correlation(32, &signal, &mut corr);

        let mut argmax_corr = 0;
        let mut argmin_corr = 0;
        for t in 0..32 {
            if corr[t] > corr[argmax_corr] {
                argmax_corr = t;
            }
            if corr[t] < corr[argmin_corr] {
                argmin_corr = t;
            }
        }
        assert_eq!(argmax_corr, 0);
        assert_eq!(argmin_corr, 16);
    }

    #[test]
    fn quantizer_rounds_half_up() {
        let q = quantize_coefs(&[0.5 / 32.0, -0.5 / 32.0, 1.999]).unwrap();
        assert_eq!(q.as_slice(), &[1, 0, 64]);
        assert!(quantize_coefs(&[5000.0]).is_none());
        assert!(quantize_coefs(&[f32::NAN]).is_none());
    }

    #[test]
    fn silent_signal_selects_order_zero() {
        let signal = vec![7i32; 256];
        let est = estimate_lpc(&signal, 7, &Window::Rectangle, 16, Some(3));
        assert_eq!(est.order(), 0);
    }

    #[test]
    fn order_never_exceeds_block() {
        let signal = [1, -1, 2];
        let est = estimate_lpc(&signal, 0, &Window::Rectangle, 32, None);
        assert!(est.order() <= 2);
    }

    #[rstest]
    fn sinusoid_is_predictable(#[values(2, 8, 32)] max_order: usize) {
        let signal = test_helper::sinusoid_plus_noise(1024, 32, 3000.0, 4, 12345);
        let est = estimate_lpc(&signal, 0, &Window::default(), max_order, Some(3));
        assert!(est.order() >= 2);
        assert!(est.order() <= max_order);

        let energy: f64 = signal.iter().map(|v| f64::from(*v).powi(2)).sum();
        let qcoefs = quantize_coefs(&est.coefs).unwrap();
        let mut residual_energy = 0f64;
        for t in max_order..signal.len() {
            let mut pred = 0i64;
            for (j, c) in qcoefs.iter().enumerate() {
                pred += i64::from(*c) * i64::from(signal[t - 1 - j]);
            }
            let r = i64::from(signal[t]) - (pred >> QUANT_SHIFT);
            residual_energy += (r as f64).powi(2);
        }
        assert!(residual_energy * 10.0 < energy);
    }

    #[test]
    fn tukey_window_is_symmetric() {
        let w = Window::Tukey { alpha: 0.5 }.weights(64);
        for t in 0..32 {
            assert!((w[t] - w[63 - t]).abs() < 1e-4);
        }
        assert!(w[0] < 0.01);
        assert_eq!(w[32], 1.0);
    }

    #[cfg(feature = "experimental")]
    #[test]
    fn direct_mse_recovers_ar2() {
        use rand::distributions::Distribution;
        use rand::distributions::Uniform;
        use rand::SeedableRng;

        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let noise = Uniform::from(-100..=100);
        let mut signal = vec![0i32; 1024];
        for t in 2..signal.len() {
            let v = 1.6f32.mul_add(signal[t - 1] as f32, -0.8 * signal[t - 2] as f32);
            signal[t] = v.round() as i32 + noise.sample(&mut rng);
        }
        let coefs = lpc_with_direct_mse(&signal, 0, &Window::Rectangle, 2).unwrap();
        assert!((coefs[0] - 1.6).abs() < 0.1);
        assert!((coefs[1] + 0.8).abs() < 0.1);
    }
}
