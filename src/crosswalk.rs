use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use anyhow::Context;

const BUILTIN_CROSSWALK: &str = include_str!("../data/crosswalk.csv");

/// Resolves region display names to stable codes and IDs.
pub trait RegionLookup: Sync {
    fn state_name(&self, code: &str) -> Option<&str>;
    fn state_code(&self, name: &str) -> Option<&str>;
    fn district_id(&self, state: &str, district: &str) -> Option<u32>;
}

#[derive(Debug, Clone, Default)]
pub struct Crosswalk {
    names_by_code: HashMap<String, String>,
    codes_by_name: HashMap<String, String>,
    district_ids: HashMap<(String, String), u32>,
}

#[derive(serde::Deserialize)]
struct CrosswalkRow {
    state_code: String,
    state: String,
    district: Option<String>,
    district_id: Option<u32>,
}

impl Crosswalk {
    /// India's state and union territory codes.
    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_reader(BUILTIN_CROSSWALK.as_bytes()).context("built-in crosswalk is malformed")
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open crosswalk {}", path.display()))?;
        Self::from_reader(file).with_context(|| format!("failed to read crosswalk {}", path.display()))
    }

    pub fn from_reader<R: Read>(reader: R) -> anyhow::Result<Self> {
        let mut reader = csv::Reader::from_reader(reader);
        let mut crosswalk = Crosswalk::default();

        for result in reader.deserialize::<CrosswalkRow>() {
            let row = result?;
            let code = row.state_code.trim().to_uppercase();
            let state = row.state.trim().to_string();

            crosswalk
                .names_by_code
                .entry(code.clone())
                .or_insert_with(|| state.clone());
            crosswalk
                .codes_by_name
                .entry(state.clone())
                .or_insert(code);

            if let (Some(district), Some(id)) = (row.district, row.district_id) {
                let district = district.trim().to_string();
                if !district.is_empty() {
                    crosswalk.district_ids.insert((state, district), id);
                }
            }
        }

        Ok(crosswalk)
    }
}

impl RegionLookup for Crosswalk {
    fn state_name(&self, code: &str) -> Option<&str> {
        self.names_by_code
            .get(&code.trim().to_uppercase())
            .map(String::as_str)
    }

    fn state_code(&self, name: &str) -> Option<&str> {
        self.codes_by_name.get(name.trim()).map(String::as_str)
    }

    fn district_id(&self, state: &str, district: &str) -> Option<u32> {
        self.district_ids
            .get(&(state.to_string(), district.to_string()))
            .copied()
    }
}
