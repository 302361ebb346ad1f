//! Notch smoothing of daily case counts.
//!
//! The filter has two stages:
//!
//! 1. Spike correction. A day is compared against the same weekday one week
//!    earlier and one week later. If it sits more than a factor of
//!    [`SPIKE_RATIO`] above both of them (or below both), and its gap to their
//!    log-scale midpoint is also larger than [`SPIKE_POISSON_SDS`] Poisson
//!    standard deviations, it is replaced by that midpoint. A weekday
//!    reporting cycle puts the day level with both neighbours, and steady
//!    growth puts it between them, so neither is ever flagged. In the first
//!    and last week only one same-weekday neighbour exists; there the day
//!    must also differ by the same factor from the median of the days
//!    around it, and is replaced by that neighbour.
//! 2. Convolution with a normalised kernel of `2 * (window / 2) + 1` taps: a
//!    seven-day box, which zeroes the weekly cycle and its harmonics exactly,
//!    convolved with a Hamming taper that fills out the rest of the window.
//!
//! Edges are handled by symmetric reflection (the edge sample is repeated).
//! Output values closer than `window / 2` days to either end depend on
//! reflected data; the estimator trims exactly that many days on each side.

use crate::error::{EstimationError, EstimationResult};

pub const REPORTING_CYCLE: usize = 7;
pub const SPIKE_RATIO: f64 = 3.0;
pub const SPIKE_POISSON_SDS: f64 = 5.0;

/// A value replaced by the spike correction stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spike {
    pub index: usize,
    pub raw: f64,
    pub corrected: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Smoothed {
    pub values: Vec<f64>,
    /// The input after spike correction, i.e. what was convolved.
    pub corrected: Vec<f64>,
    pub spikes: Vec<Spike>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotchSmoother {
    window: usize,
    kernel: Vec<f64>,
}

impl NotchSmoother {
    pub fn new(window: usize) -> EstimationResult<Self> {
        if window == 0 {
            return Err(EstimationError::InvalidParameter {
                name: "smoothing_window",
                value: 0.0,
                reason: "must be at least one day",
            });
        }
        Ok(Self {
            window,
            kernel: notch_kernel(window / 2),
        })
    }

    /// Days at each end whose smoothed value touches reflected data.
    pub fn half_width(&self) -> usize {
        self.window / 2
    }

    pub fn kernel(&self) -> &[f64] {
        &self.kernel
    }

    pub fn smooth(&self, values: &[f64]) -> EstimationResult<Smoothed> {
        if values.len() < self.window {
            return Err(EstimationError::InsufficientData {
                len: values.len(),
                window: self.window,
            });
        }

        let (corrected, spikes) = correct_spikes(values);
        let values = self.convolve(&corrected);

        Ok(Smoothed {
            values,
            corrected,
            spikes,
        })
    }

    fn convolve(&self, values: &[f64]) -> Vec<f64> {
        let n = values.len();
        let half = self.half_width() as isize;

        (0..n)
            .map(|i| {
                self.kernel
                    .iter()
                    .enumerate()
                    .map(|(k, weight)| {
                        let source = i as isize + k as isize - half;
                        weight * values[reflect(source, n)]
                    })
                    .sum()
            })
            .collect()
    }
}

fn notch_kernel(half_width: usize) -> Vec<f64> {
    let cycle_half = REPORTING_CYCLE / 2;
    let raw = if half_width >= cycle_half {
        let taper = hamming(2 * (half_width - cycle_half) + 1);
        convolve_full(&[1.0; REPORTING_CYCLE], &taper)
    } else {
        hamming(2 * half_width + 1)
    };

    let total: f64 = raw.iter().sum();
    raw.into_iter().map(|weight| weight / total).collect()
}

fn hamming(len: usize) -> Vec<f64> {
    if len <= 1 {
        return vec![1.0; len];
    }
    let denom = (len - 1) as f64;
    (0..len)
        .map(|i| 0.54 - 0.46 * (2.0 * std::f64::consts::PI * i as f64 / denom).cos())
        .collect()
}

fn convolve_full(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, x) in a.iter().enumerate() {
        for (j, y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

/// Maps an out-of-range index back into `0..len` by mirroring about the
/// edges, repeating the edge sample.
fn reflect(index: isize, len: usize) -> usize {
    let len = len as isize;
    let mirrored = if index < 0 {
        -index - 1
    } else if index >= len {
        2 * len - index - 1
    } else {
        index
    };
    mirrored.clamp(0, len - 1) as usize
}

fn correct_spikes(values: &[f64]) -> (Vec<f64>, Vec<Spike>) {
    let mut corrected = values.to_vec();
    let mut spikes = Vec::new();
    let threshold = SPIKE_RATIO.ln();
    let len = values.len();

    for t in 0..len {
        let value = values[t].max(0.0);
        let before = t.checked_sub(REPORTING_CYCLE).map(|i| values[i].max(0.0));
        let after = values.get(t + REPORTING_CYCLE).map(|v| v.max(0.0));

        let reference = match (before, after) {
            (Some(before), Some(after)) => {
                let from_before = value.ln_1p() - before.ln_1p();
                let from_after = value.ln_1p() - after.ln_1p();
                let same_direction = from_before.signum() == from_after.signum()
                    && from_before.abs() > threshold
                    && from_after.abs() > threshold;
                if !same_direction {
                    continue;
                }
                (0.5 * (before.ln_1p() + after.ln_1p())).exp_m1()
            }
            (Some(neighbour), None) | (None, Some(neighbour)) => {
                let from_neighbour = value.ln_1p() - neighbour.ln_1p();
                let from_local = value.ln_1p() - local_median(values, t).ln_1p();
                let same_direction = from_neighbour.signum() == from_local.signum()
                    && from_neighbour.abs() > threshold
                    && from_local.abs() > threshold;
                if !same_direction {
                    continue;
                }
                neighbour
            }
            (None, None) => continue,
        };

        if (value - reference).abs() > SPIKE_POISSON_SDS * (reference + 1.0).sqrt() {
            corrected[t] = reference;
            spikes.push(Spike {
                index: t,
                raw: values[t],
                corrected: reference,
            });
        }
    }

    (corrected, spikes)
}

/// Median of the days within half a reporting cycle of `t`, excluding `t`.
fn local_median(values: &[f64], t: usize) -> f64 {
    let reach = REPORTING_CYCLE / 2;
    let start = t.saturating_sub(reach);
    let end = (t + reach + 1).min(values.len());
    let mut nearby: Vec<f64> = (start..end)
        .filter(|&i| i != t)
        .map(|i| values[i].max(0.0))
        .collect();
    if nearby.is_empty() {
        return values[t].max(0.0);
    }
    nearby.sort_by(|a, b| a.total_cmp(b));
    let mid = nearby.len() / 2;
    if nearby.len() % 2 == 0 {
        0.5 * (nearby[mid - 1] + nearby[mid])
    } else {
        nearby[mid]
    }
}
