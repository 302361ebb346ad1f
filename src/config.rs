use serde::Serialize;

use crate::error::{EstimationError, EstimationResult};

pub const DEFAULT_GAMMA: f64 = 0.1;
pub const DEFAULT_CI: f64 = 0.95;
pub const DEFAULT_SMOOTHING_WINDOW: usize = 10;
pub const DEFAULT_LOOKBACK: usize = 120;
pub const DEFAULT_CUTOFF: usize = 2;
pub const DEFAULT_TOP_N: usize = 10;
pub const MIN_USABLE_DAYS: usize = 2;

/// Pseudo-districts that carry cases without a geography.
pub const DEFAULT_EXCLUDED_DISTRICTS: [&str; 4] = [
    "Unknown",
    "Other State",
    "Airport Quarantine",
    "Railway Quarantine",
];

/// Model parameters for one estimator call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EstimatorConfig {
    /// Recovery rate, the inverse of the mean infectious period in days.
    pub gamma: f64,
    /// Two-sided confidence level.
    pub ci: f64,
    pub smoothing_window: usize,
    /// Input values are cumulative totals rather than daily counts.
    pub totals: bool,
    pub min_usable_days: usize,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            gamma: DEFAULT_GAMMA,
            ci: DEFAULT_CI,
            smoothing_window: DEFAULT_SMOOTHING_WINDOW,
            totals: false,
            min_usable_days: MIN_USABLE_DAYS,
        }
    }
}

impl EstimatorConfig {
    pub fn validate(&self) -> EstimationResult<()> {
        if !self.gamma.is_finite() || self.gamma <= 0.0 {
            return Err(EstimationError::InvalidParameter {
                name: "gamma",
                value: self.gamma,
                reason: "must be finite and positive",
            });
        }
        if !(self.ci > 0.0 && self.ci < 1.0) {
            return Err(EstimationError::InvalidParameter {
                name: "ci",
                value: self.ci,
                reason: "must lie strictly between 0 and 1",
            });
        }
        if self.smoothing_window == 0 {
            return Err(EstimationError::InvalidParameter {
                name: "smoothing_window",
                value: 0.0,
                reason: "must be at least one day",
            });
        }
        if self.min_usable_days == 0 {
            return Err(EstimationError::InvalidParameter {
                name: "min_usable_days",
                value: 0.0,
                reason: "must be at least one day",
            });
        }
        Ok(())
    }
}

/// Settings for a whole state run: the estimator plus how each region's
/// series is sliced and which districts are skipped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineConfig {
    pub estimator: EstimatorConfig,
    pub lookback: usize,
    pub cutoff: usize,
    pub excluded_districts: Vec<String>,
    pub top_n: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            estimator: EstimatorConfig::default(),
            lookback: DEFAULT_LOOKBACK,
            cutoff: DEFAULT_CUTOFF,
            excluded_districts: DEFAULT_EXCLUDED_DISTRICTS
                .iter()
                .map(|name| name.to_string())
                .collect(),
            top_n: DEFAULT_TOP_N,
        }
    }
}

impl PipelineConfig {
    pub fn is_excluded(&self, district: &str) -> bool {
        self.excluded_districts.iter().any(|name| name == district)
    }
}
