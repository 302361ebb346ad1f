use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::batch::StateReport;
use crate::config::PipelineConfig;
use crate::models::{EstimateRow, EstimationRun};

/// Destination for a finished state run.
pub trait EstimateSink {
    fn publish(&mut self, report: &StateReport) -> anyhow::Result<()>;
}

/// Writes CSV tables and a JSON run summary into a directory.
#[derive(Debug, Clone)]
pub struct CsvDirSink {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

#[derive(Debug, Serialize)]
struct DistrictEstimateRow {
    #[serde(rename = "dates")]
    date: NaiveDate,
    #[serde(rename = "Rt_pred")]
    rt_pred: f64,
    #[serde(rename = "Rt_CI_upper")]
    rt_ci_upper: f64,
    #[serde(rename = "Rt_CI_lower")]
    rt_ci_lower: f64,
    #[serde(rename = "T_pred")]
    t_pred: f64,
    #[serde(rename = "T_CI_upper")]
    t_ci_upper: f64,
    #[serde(rename = "T_CI_lower")]
    t_ci_lower: f64,
    total_cases: f64,
    #[serde(rename = "new_cases_ts")]
    new_cases: f64,
    district: String,
    district_id: Option<u32>,
}

impl DistrictEstimateRow {
    fn new(row: EstimateRow, district: &str, district_id: Option<u32>) -> Self {
        Self {
            date: row.date,
            rt_pred: row.rt_pred,
            rt_ci_upper: row.rt_ci_upper,
            rt_ci_lower: row.rt_ci_lower,
            t_pred: row.t_pred,
            t_ci_upper: row.t_ci_upper,
            t_ci_lower: row.t_ci_lower,
            total_cases: row.total_cases,
            new_cases: row.new_cases,
            district: district.to_string(),
            district_id,
        }
    }
}

#[derive(Debug, Serialize)]
struct TopDistrictRow {
    district: String,
    #[serde(rename = "Rt")]
    rt: String,
}

#[derive(Debug, Serialize)]
struct RegionSummary {
    retained_days: usize,
    latest_rt: Option<f64>,
    anomalies: usize,
    degenerate_days: usize,
}

impl RegionSummary {
    fn from_run(run: &EstimationRun) -> Self {
        Self {
            retained_days: run.estimates.len(),
            latest_rt: run.latest().map(|estimate| estimate.rt_mean),
            anomalies: run.anomalies.len(),
            degenerate_days: run.degenerate_dates.len(),
        }
    }
}

#[derive(Debug, Serialize)]
struct RunSummary<'a> {
    run_id: Uuid,
    state_code: &'a str,
    state: &'a str,
    parameters: &'a PipelineConfig,
    state_estimate: Result<RegionSummary, String>,
    districts_succeeded: BTreeMap<&'a str, RegionSummary>,
    districts_failed: BTreeMap<&'a str, String>,
    top_districts: Vec<(String, f64)>,
}

impl CsvDirSink {
    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create output directory {}", dir.display()))?;
        Ok(Self {
            dir,
            written: Vec::new(),
        })
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    fn path(&self, report: &StateReport, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}_{suffix}", report.state_code))
    }

    fn write_state(&mut self, report: &StateReport) -> anyhow::Result<()> {
        let Ok(run) = &report.state_result else {
            return Ok(());
        };
        let path = self.path(report, "state_Rt.csv");
        let mut writer = open_csv(&path)?;
        for row in run.rows() {
            writer.serialize(row)?;
        }
        writer.flush()?;
        self.written.push(path);
        Ok(())
    }

    fn write_districts(&mut self, report: &StateReport) -> anyhow::Result<()> {
        let path = self.path(report, "district_Rt.csv");
        let mut writer = open_csv(&path)?;
        for (district, outcome) in &report.districts {
            let Ok(run) = &outcome.result else {
                continue;
            };
            for row in run.rows() {
                writer.serialize(DistrictEstimateRow::new(row, district, outcome.district_id))?;
            }
        }
        writer.flush()?;
        self.written.push(path);
        Ok(())
    }

    fn write_top(&mut self, report: &StateReport) -> anyhow::Result<()> {
        let path = self.path(report, "top10_district.csv");
        let mut writer = open_csv(&path)?;
        for (district, rt) in report.top_districts(report.config.top_n) {
            writer.serialize(TopDistrictRow {
                district,
                rt: format!("{rt:.2}"),
            })?;
        }
        writer.flush()?;
        self.written.push(path);
        Ok(())
    }

    fn write_summary(&mut self, report: &StateReport) -> anyhow::Result<()> {
        let summary = RunSummary {
            run_id: report.run_id,
            state_code: &report.state_code,
            state: &report.state,
            parameters: &report.config,
            state_estimate: report
                .state_result
                .as_ref()
                .map(RegionSummary::from_run)
                .map_err(|err| err.to_string()),
            districts_succeeded: report
                .succeeded()
                .map(|(name, run)| (name.as_str(), RegionSummary::from_run(run)))
                .collect(),
            districts_failed: report
                .failed()
                .map(|(name, err)| (name.as_str(), err.to_string()))
                .collect(),
            top_districts: report.top_districts(report.config.top_n),
        };

        let path = self.path(report, "run.json");
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        self.written.push(path);
        Ok(())
    }
}

impl EstimateSink for CsvDirSink {
    fn publish(&mut self, report: &StateReport) -> anyhow::Result<()> {
        self.write_state(report)?;
        self.write_districts(report)?;
        self.write_top(report)?;
        self.write_summary(report)?;
        Ok(())
    }
}

fn open_csv(path: &Path) -> anyhow::Result<csv::Writer<std::fs::File>> {
    csv::Writer::from_path(path).with_context(|| format!("failed to create {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::DistrictOutcome;
    use crate::error::EstimationError;
    use crate::models::RtEstimate;

    fn run(region: &str, rt: f64) -> EstimationRun {
        let date = NaiveDate::from_ymd_opt(2021, 6, 1).unwrap();
        EstimationRun {
            region: region.to_string(),
            estimates: vec![RtEstimate {
                date,
                rt_mean: rt,
                rt_ci_low: rt - 0.25,
                rt_ci_high: rt + 0.25,
                predicted_mean: 50.0,
                predicted_ci_low: 45.0,
                predicted_ci_high: 55.0,
            }],
            cumulative_total: vec![1200.0],
            smoothed_new_cases: vec![50.0],
            anomalies: Vec::new(),
            degenerate_dates: Vec::new(),
        }
    }

    fn report() -> StateReport {
        let mut districts = BTreeMap::new();
        districts.insert(
            "North Goa".to_string(),
            DistrictOutcome {
                district_id: Some(585),
                result: Ok(run("North Goa", 1.234)),
            },
        );
        districts.insert(
            "South Goa".to_string(),
            DistrictOutcome {
                district_id: None,
                result: Err(EstimationError::InsufficientData { len: 3, window: 10 }),
            },
        );
        StateReport {
            run_id: Uuid::new_v4(),
            state_code: "GA".to_string(),
            state: "Goa".to_string(),
            config: PipelineConfig::default(),
            state_result: Ok(run("Goa", 1.5)),
            districts,
        }
    }

    #[test]
    fn writes_tables_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvDirSink::new(dir.path()).unwrap();
        sink.publish(&report()).unwrap();
        assert_eq!(sink.written().len(), 4);

        let state = std::fs::read_to_string(dir.path().join("GA_state_Rt.csv")).unwrap();
        let mut lines = state.lines();
        assert_eq!(
            lines.next(),
            Some("dates,Rt_pred,Rt_CI_upper,Rt_CI_lower,T_pred,T_CI_upper,T_CI_lower,total_cases,new_cases_ts")
        );
        assert_eq!(lines.next(), Some("2021-06-01,1.5,1.75,1.25,50.0,55.0,45.0,1200.0,50.0"));

        let districts = std::fs::read_to_string(dir.path().join("GA_district_Rt.csv")).unwrap();
        assert_eq!(districts.lines().count(), 2);
        assert!(districts.lines().nth(1).unwrap().ends_with(",North Goa,585"));

        let top = std::fs::read_to_string(dir.path().join("GA_top10_district.csv")).unwrap();
        assert_eq!(top, "district,Rt\nNorth Goa,1.23\n");

        let summary: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("GA_run.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(summary["state_code"], "GA");
        assert_eq!(summary["state_estimate"]["Ok"]["retained_days"], 1);
        assert_eq!(
            summary["districts_failed"]["South Goa"],
            "series has 3 days, too few for a smoothing window of 10"
        );
    }

    #[test]
    fn failed_state_estimate_skips_the_state_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = report();
        report.state_result = Err(EstimationError::InsufficientHistory {
            usable: 1,
            required: 2,
        });

        let mut sink = CsvDirSink::new(dir.path()).unwrap();
        sink.publish(&report).unwrap();

        assert!(!dir.path().join("GA_state_Rt.csv").exists());
        assert!(dir.path().join("GA_run.json").exists());
    }
}
