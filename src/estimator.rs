//! Rt estimation from a daily case-count series.
//!
//! Under an SIR-type model with recovery rate `gamma`, daily incidence grows
//! as `exp(gamma * (Rt - 1))` per day, so each consecutive pair of smoothed
//! counts gives
//!
//! ```text
//! r_t  = ln(s_t / s_{t-1})
//! Rt_t = 1 + r_t / gamma
//! ```
//!
//! Counts are modelled as Poisson. Because the smoother is linear, the
//! variance of `r_t` follows from the delta method using the kernel weights
//! `w` and the corrected daily counts `x` as Poisson means:
//!
//! ```text
//! Var(s_t)            = sum_k w_k^2 x_{t-h+k}
//! Cov(s_t, s_{t-1})   = sum_k w_k w_{k+1} x_{t-h+k}
//! Var(r_t)            = Var(s_t)/s_t^2 + Var(s_{t-1})/s_{t-1}^2
//!                       - 2 Cov(s_t, s_{t-1}) / (s_t s_{t-1})
//! ```
//!
//! The interval is symmetric in `r` and mapped to Rt and to the one-step
//! predicted count through the same transforms as the point estimate.
//!
//! Alignment: with `m` daily values (one fewer than the input when the
//! input holds cumulative totals) and `h = smoothing_window / 2`, estimates
//! are produced for daily indices `h + 1 ..= m - h - 1`. Days whose ratio has
//! a zero on either side are dropped.

use chrono::NaiveDate;
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::debug;

use crate::config::EstimatorConfig;
use crate::error::{EstimationError, EstimationResult};
use crate::models::{AnomalyKind, AnomalyRecord, EstimationRun, RawSeries, RtEstimate};
use crate::smoothing::{NotchSmoother, Smoothed};

#[derive(Debug, Clone)]
pub struct RtEstimator {
    config: EstimatorConfig,
    smoother: NotchSmoother,
    z: f64,
}

impl RtEstimator {
    pub fn new(config: EstimatorConfig) -> EstimationResult<Self> {
        config.validate()?;
        let smoother = NotchSmoother::new(config.smoothing_window)?;
        let z = two_sided_quantile(config.ci)?;
        Ok(Self {
            config,
            smoother,
            z,
        })
    }

    pub fn estimate(&self, series: &RawSeries) -> EstimationResult<EstimationRun> {
        if let Some(point) = series.points.iter().find(|point| !point.count.is_finite()) {
            debug!(region = %series.name, date = %point.date, "rejecting non-finite count");
            return Err(EstimationError::InvalidParameter {
                name: "count",
                value: point.count,
                reason: "case counts must be finite",
            });
        }

        let window = self.config.smoothing_window;
        let required = window + usize::from(self.config.totals);
        if series.len() < required {
            return Err(EstimationError::InsufficientData {
                len: series.len(),
                window,
            });
        }

        let counts = series.counts();
        let all_dates = series.dates();

        let (dates, raw_daily, base) = if self.config.totals {
            let base = counts.first().copied().unwrap_or(0.0);
            let dates = all_dates.get(1..).unwrap_or_default().to_vec();
            (dates, difference(&counts), base)
        } else {
            (all_dates, counts, 0.0)
        };

        let mut anomalies = Vec::new();
        let daily: Vec<f64> = raw_daily
            .iter()
            .zip(dates.iter())
            .map(|(&value, &date)| {
                if value < 0.0 {
                    anomalies.push(AnomalyRecord {
                        date,
                        kind: AnomalyKind::NegativeRevision,
                        raw: value,
                        corrected: 0.0,
                    });
                    0.0
                } else {
                    value
                }
            })
            .collect();

        let cumulative = accumulate(base, &daily);
        let smoothed = self.smoother.smooth(&daily)?;
        merge_spikes(&mut anomalies, &smoothed, &dates);

        for anomaly in &anomalies {
            debug!(
                region = %series.name,
                date = %anomaly.date,
                kind = ?anomaly.kind,
                raw = anomaly.raw,
                corrected = anomaly.corrected,
                "replaced anomalous count"
            );
        }

        let h = self.smoother.half_width();
        let m = daily.len();
        let gamma = self.config.gamma;

        let mut estimates = Vec::new();
        let mut cumulative_total = Vec::new();
        let mut smoothed_new_cases = Vec::new();
        let mut degenerate_dates = Vec::new();

        for t in (h + 1)..m.saturating_sub(h) {
            let previous = smoothed.values[t - 1];
            let current = smoothed.values[t];

            if !(previous > 0.0 && current > 0.0) {
                debug!(region = %series.name, date = %dates[t], "skipping day with zero count ratio");
                degenerate_dates.push(dates[t]);
                continue;
            }

            let growth = (current / previous).ln();
            let spread = self.z * self.growth_variance(&smoothed, t).sqrt();
            let (growth_low, growth_high) = (growth - spread, growth + spread);

            estimates.push(RtEstimate {
                date: dates[t],
                rt_mean: 1.0 + growth / gamma,
                rt_ci_low: 1.0 + growth_low / gamma,
                rt_ci_high: 1.0 + growth_high / gamma,
                predicted_mean: previous * growth.exp(),
                predicted_ci_low: previous * growth_low.exp(),
                predicted_ci_high: previous * growth_high.exp(),
            });
            cumulative_total.push(cumulative[t]);
            smoothed_new_cases.push(current);
        }

        if estimates.len() < self.config.min_usable_days {
            return Err(EstimationError::InsufficientHistory {
                usable: estimates.len(),
                required: self.config.min_usable_days,
            });
        }

        Ok(EstimationRun {
            region: series.name.clone(),
            estimates,
            cumulative_total,
            smoothed_new_cases,
            anomalies,
            degenerate_dates,
        })
    }

    /// Poisson variance of `ln(s_t / s_{t-1})`. Only valid where the kernel
    /// support of both days lies inside the series.
    fn growth_variance(&self, smoothed: &Smoothed, t: usize) -> f64 {
        let kernel = self.smoother.kernel();
        let x = &smoothed.corrected;
        let h = self.smoother.half_width();
        let current = smoothed.values[t];
        let previous = smoothed.values[t - 1];

        let mut var_current = 0.0;
        let mut var_previous = 0.0;
        for (k, w) in kernel.iter().enumerate() {
            var_current += w * w * x[t - h + k];
            var_previous += w * w * x[t - 1 - h + k];
        }
        let covariance: f64 = kernel
            .windows(2)
            .enumerate()
            .map(|(k, pair)| pair[0] * pair[1] * x[t - h + k])
            .sum();

        let variance = var_current / (current * current) + var_previous / (previous * previous)
            - 2.0 * covariance / (current * previous);
        variance.max(0.0)
    }
}

/// Day-over-day differences of a cumulative series. Negative values are kept.
pub fn difference(totals: &[f64]) -> Vec<f64> {
    totals.windows(2).map(|pair| pair[1] - pair[0]).collect()
}

/// Running totals of `daily`, starting from `base`.
pub fn accumulate(base: f64, daily: &[f64]) -> Vec<f64> {
    daily
        .iter()
        .scan(base, |total, value| {
            *total += value;
            Some(*total)
        })
        .collect()
}

fn two_sided_quantile(ci: f64) -> EstimationResult<f64> {
    let invalid = EstimationError::InvalidParameter {
        name: "ci",
        value: ci,
        reason: "must lie strictly between 0 and 1",
    };
    let normal = Normal::new(0.0, 1.0).map_err(|_| invalid.clone())?;
    let z = normal.inverse_cdf(0.5 + ci / 2.0);
    if z.is_finite() && z > 0.0 {
        Ok(z)
    } else {
        Err(invalid)
    }
}

/// Folds spike corrections into the anomaly list, one record per date.
fn merge_spikes(anomalies: &mut Vec<AnomalyRecord>, smoothed: &Smoothed, dates: &[NaiveDate]) {
    for spike in &smoothed.spikes {
        let date = dates[spike.index];
        match anomalies.iter_mut().find(|anomaly| anomaly.date == date) {
            Some(existing) => existing.corrected = spike.corrected,
            None => anomalies.push(AnomalyRecord {
                date,
                kind: AnomalyKind::Spike,
                raw: spike.raw,
                corrected: spike.corrected,
            }),
        }
    }
    anomalies.sort_by_key(|anomaly| anomaly.date);
}
