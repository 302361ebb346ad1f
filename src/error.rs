use thiserror::Error;

/// Failures that abort estimation for a single region.
///
/// A zero count on either side of a growth ratio is not an error: that day is
/// dropped from the run and listed in `EstimationRun::degenerate_dates`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EstimationError {
    #[error("series has {len} days, too few for a smoothing window of {window}")]
    InsufficientData { len: usize, window: usize },

    #[error("only {usable} usable days remain after trimming, at least {required} are needed")]
    InsufficientHistory { usable: usize, required: usize },

    #[error("invalid {name} = {value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },
}

pub type EstimationResult<T> = Result<T, EstimationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_quantities() {
        let err = EstimationError::InsufficientData { len: 4, window: 10 };
        assert_eq!(
            err.to_string(),
            "series has 4 days, too few for a smoothing window of 10"
        );

        let err = EstimationError::InvalidParameter {
            name: "gamma",
            value: -1.0,
            reason: "must be finite and positive",
        };
        assert_eq!(err.to_string(), "invalid gamma = -1: must be finite and positive");
    }
}
