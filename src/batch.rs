use std::collections::BTreeMap;

use anyhow::Context;
use rayon::prelude::*;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::crosswalk::RegionLookup;
use crate::error::EstimationError;
use crate::estimator::RtEstimator;
use crate::models::{EstimationRun, RawSeries};
use crate::source::CaseTable;

#[derive(Debug, Clone)]
pub struct DistrictOutcome {
    pub district_id: Option<u32>,
    pub result: Result<EstimationRun, EstimationError>,
}

/// All estimates for one state: the state itself plus each of its districts.
#[derive(Debug, Clone)]
pub struct StateReport {
    pub run_id: Uuid,
    pub state_code: String,
    pub state: String,
    pub config: PipelineConfig,
    pub state_result: Result<EstimationRun, EstimationError>,
    pub districts: BTreeMap<String, DistrictOutcome>,
}

impl StateReport {
    pub fn succeeded(&self) -> impl Iterator<Item = (&String, &EstimationRun)> {
        self.districts
            .iter()
            .filter_map(|(name, outcome)| outcome.result.as_ref().ok().map(|run| (name, run)))
    }

    pub fn failed(&self) -> impl Iterator<Item = (&String, &EstimationError)> {
        self.districts
            .iter()
            .filter_map(|(name, outcome)| outcome.result.as_ref().err().map(|err| (name, err)))
    }

    /// Districts ranked by their most recent Rt, highest first.
    pub fn top_districts(&self, limit: usize) -> Vec<(String, f64)> {
        let mut latest: Vec<(String, f64)> = self
            .succeeded()
            .filter_map(|(name, run)| run.latest().map(|estimate| (name.clone(), estimate.rt_mean)))
            .collect();
        latest.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        latest.truncate(limit);
        latest
    }
}

pub fn estimate_state(
    table: &CaseTable,
    lookup: &dyn RegionLookup,
    state_code: &str,
    config: &PipelineConfig,
) -> anyhow::Result<StateReport> {
    let state = lookup
        .state_name(state_code)
        .with_context(|| format!("unknown state code {state_code}"))?
        .to_string();
    let estimator = RtEstimator::new(config.estimator)?;

    let state_series = table
        .state(&state)
        .with_context(|| format!("no case counts found for {state} ({state_code})"))?;

    info!(state_code, state = %state, "estimating state-level Rt");
    let state_result = estimate_region(&estimator, &state_series, config);

    let candidates: Vec<(&String, &RawSeries)> = table
        .districts(&state)
        .filter(|(district, _)| !config.is_excluded(district))
        .collect();

    info!(
        state_code,
        districts = candidates.len(),
        "estimating district-level Rt"
    );
    let districts: BTreeMap<String, DistrictOutcome> = candidates
        .into_par_iter()
        .map(|(district, series)| {
            let outcome = DistrictOutcome {
                district_id: lookup.district_id(&state, district),
                result: estimate_region(&estimator, series, config),
            };
            (district.clone(), outcome)
        })
        .collect();

    Ok(StateReport {
        run_id: Uuid::new_v4(),
        state_code: state_code.to_uppercase(),
        state,
        config: config.clone(),
        state_result,
        districts,
    })
}

fn estimate_region(
    estimator: &RtEstimator,
    series: &RawSeries,
    config: &PipelineConfig,
) -> Result<EstimationRun, EstimationError> {
    let windowed = series.window(config.lookback, config.cutoff);
    match estimator.estimate(&windowed) {
        Ok(run) => {
            info!(
                region = %run.region,
                days = run.estimates.len(),
                anomalies = run.anomalies.len(),
                latest_rt = run.latest().map(|estimate| estimate.rt_mean),
                "estimated Rt"
            );
            Ok(run)
        }
        Err(err) => {
            warn!(region = %series.name, error = %err, "Rt estimation failed");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crosswalk::Crosswalk;
    use crate::models::CaseRecord;
    use chrono::{Duration, NaiveDate};

    fn records(state: &str, district: Option<&str>, values: &[f64]) -> Vec<CaseRecord> {
        let start = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(offset, &count)| CaseRecord {
                state: state.to_string(),
                district: district.map(str::to_string),
                date: start + Duration::days(offset as i64),
                count,
            })
            .collect()
    }

    fn crosswalk() -> Crosswalk {
        let data = "\
state_code,state,district,district_id
GA,Goa,,
GA,Goa,North Goa,585
";
        Crosswalk::from_reader(data.as_bytes()).unwrap()
    }

    fn growing(rate: f64) -> Vec<f64> {
        (0..60).map(|t| 40.0 * (rate * t as f64).exp()).collect()
    }

    fn table() -> CaseTable {
        let mut rows = records("Goa", None, &growing(0.02));
        rows.extend(records("Goa", Some("North Goa"), &growing(0.05)));
        rows.extend(records("Goa", Some("South Goa"), &growing(-0.01)));
        rows.extend(records("Goa", Some("Mormugao"), &[3.0, 4.0, 2.0]));
        rows.extend(records("Goa", Some("Unknown"), &growing(0.2)));
        CaseTable::from_records(rows)
    }

    #[test]
    fn district_failures_do_not_abort_the_state() {
        let report =
            estimate_state(&table(), &crosswalk(), "GA", &PipelineConfig::default()).unwrap();

        assert_eq!(report.state, "Goa");
        assert!(report.state_result.is_ok());
        assert_eq!(report.districts.len(), 3);
        assert!(!report.districts.contains_key("Unknown"));

        let failed: Vec<_> = report.failed().map(|(name, _)| name.clone()).collect();
        assert_eq!(failed, vec!["Mormugao".to_string()]);
        assert!(matches!(
            report.districts["Mormugao"].result,
            Err(EstimationError::InsufficientData { .. })
        ));
        assert_eq!(report.succeeded().count(), 2);
        assert_eq!(report.districts["North Goa"].district_id, Some(585));
        assert_eq!(report.districts["South Goa"].district_id, None);
    }

    #[test]
    fn lookback_and_cutoff_bound_each_series() {
        let config = PipelineConfig {
            lookback: 30,
            cutoff: 2,
            ..PipelineConfig::default()
        };
        let report = estimate_state(&table(), &crosswalk(), "GA", &config).unwrap();
        let run = report.state_result.as_ref().unwrap();

        // 28 days survive the window, h = 5 trims 5 + 1 in front and 5 behind
        assert_eq!(run.estimates.len(), 28 - 11);
        let last_input = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap() + Duration::days(59 - 2);
        assert_eq!(run.estimates.last().map(|e| e.date), Some(last_input - Duration::days(5)));
    }

    #[test]
    fn top_districts_rank_by_latest_rt() {
        let report =
            estimate_state(&table(), &crosswalk(), "GA", &PipelineConfig::default()).unwrap();
        let top = report.top_districts(10);

        assert_eq!(top.len(), 2);
        assert_eq!(top[0].0, "North Goa");
        assert!((top[0].1 - 1.5).abs() < 1e-6);
        assert_eq!(top[1].0, "South Goa");
        assert_eq!(report.top_districts(1).len(), 1);
    }

    #[test]
    fn unknown_state_code_is_an_error() {
        let err = estimate_state(&table(), &crosswalk(), "ZZ", &PipelineConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("unknown state code ZZ"));
    }

    #[test]
    fn missing_state_data_is_an_error() {
        let empty = CaseTable::default();
        assert!(estimate_state(&empty, &crosswalk(), "GA", &PipelineConfig::default()).is_err());
    }
}
