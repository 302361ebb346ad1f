use chrono::NaiveDate;
use serde::Serialize;

/// One observation of a daily case-count series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: f64,
}

/// A named, date-ordered series with one value per calendar day.
///
/// Values are either daily increments or cumulative totals; which one is
/// decided by the caller through `EstimatorConfig::totals`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSeries {
    pub name: String,
    pub points: Vec<DailyCount>,
}

impl RawSeries {
    pub fn new(name: impl Into<String>, points: Vec<DailyCount>) -> Self {
        Self {
            name: name.into(),
            points,
        }
    }

    /// Builds a series of consecutive days starting at `start`.
    #[cfg(test)]
    pub fn from_values(name: impl Into<String>, start: NaiveDate, values: &[f64]) -> Self {
        let points = values
            .iter()
            .enumerate()
            .map(|(offset, &count)| DailyCount {
                date: start + chrono::Duration::days(offset as i64),
                count,
            })
            .collect();
        Self::new(name, points)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.points.iter().map(|point| point.date).collect()
    }

    pub fn counts(&self) -> Vec<f64> {
        self.points.iter().map(|point| point.count).collect()
    }

    /// Keeps the last `lookback` days, then drops the most recent `cutoff`
    /// of those.
    pub fn window(&self, lookback: usize, cutoff: usize) -> RawSeries {
        let start = self.len().saturating_sub(lookback);
        let end = self.len().saturating_sub(cutoff).max(start);
        RawSeries::new(self.name.clone(), self.points[start..end].to_vec())
    }
}

/// A case-count row as delivered by a data source, before grouping into
/// per-region series.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseRecord {
    pub state: String,
    pub district: Option<String>,
    pub date: NaiveDate,
    pub count: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// A negative daily count, usually a downward revision of a cumulative total.
    NegativeRevision,
    /// A one-off spike or dip far from the same weekday in adjacent weeks.
    Spike,
}

/// An observation replaced before estimation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyRecord {
    pub date: NaiveDate,
    pub kind: AnomalyKind,
    pub raw: f64,
    pub corrected: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RtEstimate {
    pub date: NaiveDate,
    pub rt_mean: f64,
    pub rt_ci_low: f64,
    pub rt_ci_high: f64,
    pub predicted_mean: f64,
    pub predicted_ci_low: f64,
    pub predicted_ci_high: f64,
}

/// Everything one estimator call produces for one region.
///
/// `estimates`, `cumulative_total` and `smoothed_new_cases` are index-aligned.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimationRun {
    pub region: String,
    pub estimates: Vec<RtEstimate>,
    pub cumulative_total: Vec<f64>,
    pub smoothed_new_cases: Vec<f64>,
    pub anomalies: Vec<AnomalyRecord>,
    /// Days dropped because the growth ratio had a zero count on either side.
    /// These are kept apart from `anomalies`: no count was replaced, so there
    /// is no raw/corrected pair to record.
    pub degenerate_dates: Vec<NaiveDate>,
}

impl EstimationRun {
    pub fn latest(&self) -> Option<&RtEstimate> {
        self.estimates.last()
    }

    pub fn rows(&self) -> Vec<EstimateRow> {
        self.estimates
            .iter()
            .zip(self.cumulative_total.iter())
            .zip(self.smoothed_new_cases.iter())
            .map(|((estimate, &total_cases), &new_cases)| EstimateRow {
                date: estimate.date,
                rt_pred: estimate.rt_mean,
                rt_ci_upper: estimate.rt_ci_high,
                rt_ci_lower: estimate.rt_ci_low,
                t_pred: estimate.predicted_mean,
                t_ci_upper: estimate.predicted_ci_high,
                t_ci_lower: estimate.predicted_ci_low,
                total_cases,
                new_cases,
            })
            .collect()
    }
}

/// One output table row. Column names follow the published CSV layout.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EstimateRow {
    #[serde(rename = "dates")]
    pub date: NaiveDate,
    #[serde(rename = "Rt_pred")]
    pub rt_pred: f64,
    #[serde(rename = "Rt_CI_upper")]
    pub rt_ci_upper: f64,
    #[serde(rename = "Rt_CI_lower")]
    pub rt_ci_lower: f64,
    #[serde(rename = "T_pred")]
    pub t_pred: f64,
    #[serde(rename = "T_CI_upper")]
    pub t_ci_upper: f64,
    #[serde(rename = "T_CI_lower")]
    pub t_ci_lower: f64,
    pub total_cases: f64,
    #[serde(rename = "new_cases_ts")]
    pub new_cases: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 4, d).unwrap()
    }

    #[test]
    fn from_values_assigns_consecutive_dates() {
        let series = RawSeries::from_values("Goa", day(1), &[1.0, 2.0, 3.0]);
        assert_eq!(series.dates(), vec![day(1), day(2), day(3)]);
        assert_eq!(series.counts(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn window_keeps_lookback_and_drops_cutoff() {
        let values: Vec<f64> = (0..10).map(|v| v as f64).collect();
        let series = RawSeries::from_values("Goa", day(1), &values);

        let windowed = series.window(6, 2);
        assert_eq!(windowed.counts(), vec![4.0, 5.0, 6.0, 7.0]);
        assert_eq!(windowed.name, "Goa");
    }

    #[test]
    fn window_larger_than_series_keeps_everything_before_cutoff() {
        let series = RawSeries::from_values("Goa", day(1), &[1.0, 2.0, 3.0]);
        assert_eq!(series.window(120, 1).counts(), vec![1.0, 2.0]);
        assert!(series.window(120, 5).points.is_empty());
    }

    #[test]
    fn rows_align_estimates_with_totals() {
        let run = EstimationRun {
            region: "Goa".to_string(),
            estimates: vec![RtEstimate {
                date: day(3),
                rt_mean: 1.2,
                rt_ci_low: 1.0,
                rt_ci_high: 1.4,
                predicted_mean: 12.0,
                predicted_ci_low: 10.0,
                predicted_ci_high: 14.0,
            }],
            cumulative_total: vec![40.0],
            smoothed_new_cases: vec![12.0],
            anomalies: Vec::new(),
            degenerate_dates: Vec::new(),
        };

        let rows = run.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date, day(3));
        assert_eq!(rows[0].rt_ci_upper, 1.4);
        assert_eq!(rows[0].total_cases, 40.0);
        assert_eq!(run.latest().map(|e| e.rt_mean), Some(1.2));
    }
}
