use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use anyhow::Context;
use chrono::{Duration, NaiveDate};

use crate::models::{CaseRecord, DailyCount, RawSeries};

/// Daily case series grouped by state and by district.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaseTable {
    states: BTreeMap<String, RawSeries>,
    districts: BTreeMap<String, BTreeMap<String, RawSeries>>,
}

impl CaseTable {
    /// Groups records into one series per region. Counts on the same date are
    /// summed and missing days between a region's first and last date are
    /// filled with zero.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = CaseRecord>,
    {
        let mut states: BTreeMap<String, BTreeMap<NaiveDate, f64>> = BTreeMap::new();
        let mut districts: BTreeMap<String, BTreeMap<String, BTreeMap<NaiveDate, f64>>> =
            BTreeMap::new();

        for record in records {
            let by_date = match record.district {
                Some(district) if !district.trim().is_empty() => districts
                    .entry(record.state)
                    .or_default()
                    .entry(district.trim().to_string())
                    .or_default(),
                _ => states.entry(record.state).or_default(),
            };
            *by_date.entry(record.date).or_insert(0.0) += record.count;
        }

        Self {
            states: states
                .into_iter()
                .map(|(state, by_date)| {
                    let series = fill_calendar(&state, &by_date);
                    (state, series)
                })
                .collect(),
            districts: districts
                .into_iter()
                .map(|(state, by_district)| {
                    let series = by_district
                        .into_iter()
                        .map(|(district, by_date)| {
                            let series = fill_calendar(&district, &by_date);
                            (district, series)
                        })
                        .collect();
                    (state, series)
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty() && self.districts.is_empty()
    }

    /// The state's own series, or the sum of its districts when the source
    /// only carried district rows.
    pub fn state(&self, state: &str) -> Option<RawSeries> {
        if let Some(series) = self.states.get(state) {
            return Some(series.clone());
        }

        let districts = self.districts.get(state)?;
        let mut by_date: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        for series in districts.values() {
            for point in &series.points {
                *by_date.entry(point.date).or_insert(0.0) += point.count;
            }
        }
        Some(fill_calendar(state, &by_date))
    }

    pub fn districts(&self, state: &str) -> impl Iterator<Item = (&String, &RawSeries)> {
        self.districts.get(state).into_iter().flat_map(|map| map.iter())
    }
}

#[derive(serde::Deserialize)]
struct CaseRow {
    detected_state: String,
    #[serde(default)]
    detected_district: Option<String>,
    status_change_date: NaiveDate,
    #[serde(rename = "Hospitalized")]
    hospitalized: f64,
}

pub fn read_records<R: Read>(reader: R) -> anyhow::Result<Vec<CaseRecord>> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut records = Vec::new();

    for (line, result) in reader.deserialize::<CaseRow>().enumerate() {
        let row = result.with_context(|| format!("invalid case row {}", line + 1))?;
        anyhow::ensure!(
            row.hospitalized.is_finite(),
            "invalid case row {}: count {} is not finite",
            line + 1,
            row.hospitalized
        );
        records.push(CaseRecord {
            state: row.detected_state.trim().to_string(),
            district: row.detected_district,
            date: row.status_change_date,
            count: row.hospitalized,
        });
    }

    Ok(records)
}

pub fn load_records(path: &Path) -> anyhow::Result<Vec<CaseRecord>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open case file {}", path.display()))?;
    read_records(file).with_context(|| format!("failed to read case file {}", path.display()))
}

pub fn load_case_table(paths: &[std::path::PathBuf]) -> anyhow::Result<CaseTable> {
    let mut records = Vec::new();
    for path in paths {
        records.extend(load_records(path)?);
    }
    Ok(CaseTable::from_records(records))
}

fn fill_calendar(name: &str, by_date: &BTreeMap<NaiveDate, f64>) -> RawSeries {
    let (Some((&first, _)), Some((&last, _))) = (by_date.first_key_value(), by_date.last_key_value())
    else {
        return RawSeries::new(name, Vec::new());
    };

    let days = (last - first).num_days();
    let points = (0..=days)
        .map(|offset| {
            let date = first + Duration::days(offset);
            DailyCount {
                date,
                count: by_date.get(&date).copied().unwrap_or(0.0),
            }
        })
        .collect();
    RawSeries::new(name, points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 5, d).unwrap()
    }

    const CASES: &str = "\
detected_state,detected_district,status_change_date,Hospitalized
Goa,,2021-05-01,10
Goa,,2021-05-02,12
Goa,,2021-05-04,15
Goa,North Goa,2021-05-01,6
Goa,North Goa,2021-05-01,1
Goa,South Goa,2021-05-02,4
Kerala,,2021-05-01,100
";

    #[test]
    fn groups_rows_by_region_and_fills_gaps() {
        let table = CaseTable::from_records(read_records(CASES.as_bytes()).unwrap());

        let goa = table.state("Goa").unwrap();
        assert_eq!(goa.dates(), vec![day(1), day(2), day(3), day(4)]);
        assert_eq!(goa.counts(), vec![10.0, 12.0, 0.0, 15.0]);

        let districts: Vec<_> = table.districts("Goa").map(|(name, _)| name.clone()).collect();
        assert_eq!(districts, vec!["North Goa".to_string(), "South Goa".to_string()]);

        let (_, north) = table.districts("Goa").next().unwrap();
        assert_eq!(north.counts(), vec![7.0]);
        assert_eq!(table.districts("Kerala").count(), 0);
    }

    #[test]
    fn state_series_falls_back_to_district_sum() {
        let data = "\
detected_state,detected_district,status_change_date,Hospitalized
Goa,North Goa,2021-05-01,6
Goa,South Goa,2021-05-01,4
Goa,South Goa,2021-05-03,2
";
        let table = CaseTable::from_records(read_records(data.as_bytes()).unwrap());
        let goa = table.state("Goa").unwrap();
        assert_eq!(goa.counts(), vec![10.0, 0.0, 2.0]);
        assert!(table.state("Kerala").is_none());
    }

    #[test]
    fn district_column_is_optional() {
        let data = "detected_state,status_change_date,Hospitalized\nGoa,2021-05-01,3\n";
        let table = CaseTable::from_records(read_records(data.as_bytes()).unwrap());
        assert_eq!(table.state("Goa").unwrap().counts(), vec![3.0]);
    }

    #[test]
    fn bad_dates_name_the_row() {
        let data = "detected_state,status_change_date,Hospitalized\nGoa,yesterday,3\n";
        let err = read_records(data.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn non_finite_counts_name_the_row() {
        for count in ["NaN", "inf"] {
            let data = format!(
                "detected_state,status_change_date,Hospitalized\nGoa,2021-05-01,3\nGoa,2021-05-02,{count}\n"
            );
            let err = read_records(data.as_bytes()).unwrap_err();
            assert!(err.to_string().contains("row 2"));
            assert!(err.to_string().contains("not finite"));
        }
    }

    #[test]
    fn loads_from_files() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{CASES}").unwrap();

        let table = load_case_table(&[file.path().to_path_buf()]).unwrap();
        assert!(!table.is_empty());
        assert_eq!(table.state("Kerala").unwrap().counts(), vec![100.0]);
    }
}
