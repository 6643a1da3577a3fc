//! Rate-monitoring error types.

use thiserror::Error;

use super::SourceError;
use crate::model::{ModelKind, RunId};

/// Rate-monitoring errors.
///
/// `NoValidTriggers` and `NoData` are fatal for a pipeline pass; the others
/// are normally recovered per run or per trigger and recorded as
/// diagnostics.
#[derive(Debug, Error)]
pub enum RateMonError {
    #[error("Data unavailable for run {run}: {reason}")]
    DataUnavailable { run: RunId, reason: String },

    #[error("Insufficient points: required {required}, got {actual}")]
    InsufficientPoints { required: usize, actual: usize },

    #[error("Degenerate {kind} fit: parameter {parameter} is NaN")]
    DegenerateFit { kind: ModelKind, parameter: usize },

    #[error("No valid triggers: {0}")]
    NoValidTriggers(String),

    #[error("No usable data in runs [{}]", join_runs(.runs))]
    NoData { runs: Vec<RunId> },

    #[error("Invalid parameter: {name} - {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RateMonError {
    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        RateMonError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error aborts a whole pipeline pass.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RateMonError::NoValidTriggers(_)
                | RateMonError::NoData { .. }
                | RateMonError::InvalidParameter { .. }
                | RateMonError::Io(_)
                | RateMonError::Serialization(_)
        )
    }
}

impl From<std::io::Error> for RateMonError {
    fn from(err: std::io::Error) -> Self {
        RateMonError::Io(err.to_string())
    }
}

fn join_runs(runs: &[RunId]) -> String {
    runs.iter()
        .map(RunId::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for rate-monitoring operations.
pub type Result<T> = std::result::Result<T, RateMonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_unavailable_display() {
        let error = RateMonError::DataUnavailable {
            run: RunId::new(7),
            reason: "run is not a member of any run group".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Data unavailable for run 7: run is not a member of any run group"
        );
    }

    #[test]
    fn test_insufficient_points_display() {
        let error = RateMonError::InsufficientPoints {
            required: 10,
            actual: 9,
        };
        assert_eq!(error.to_string(), "Insufficient points: required 10, got 9");
    }

    #[test]
    fn test_degenerate_fit_display() {
        let error = RateMonError::DegenerateFit {
            kind: ModelKind::Exp,
            parameter: 3,
        };
        assert_eq!(error.to_string(), "Degenerate exp fit: parameter 3 is NaN");
    }

    #[test]
    fn test_no_valid_triggers_display() {
        let error = RateMonError::NoValidTriggers("HLT_Missing".to_string());
        assert_eq!(error.to_string(), "No valid triggers: HLT_Missing");
    }

    #[test]
    fn test_no_data_display() {
        let error = RateMonError::NoData {
            runs: vec![RunId::new(1), RunId::new(2)],
        };
        assert_eq!(error.to_string(), "No usable data in runs [1, 2]");
    }

    #[test]
    fn test_invalid_parameter_display() {
        let error = RateMonError::invalid_parameter("sigma_multiplier", "must be positive");
        assert_eq!(
            error.to_string(),
            "Invalid parameter: sigma_multiplier - must be positive"
        );
    }

    #[test]
    fn test_source_error_converts() {
        let error: RateMonError = SourceError::RunNotFound(RunId::new(3)).into();
        assert!(matches!(error, RateMonError::Source(_)));
        assert_eq!(error.to_string(), "Source error: Run 3 not found");
        assert!(!error.is_fatal());
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "fits.json");
        let error: RateMonError = io.into();
        assert!(matches!(error, RateMonError::Io(_)));
        assert!(error.is_fatal());
    }

    #[test]
    fn test_fatality() {
        assert!(RateMonError::NoData { runs: vec![] }.is_fatal());
        assert!(!RateMonError::InsufficientPoints {
            required: 10,
            actual: 0
        }
        .is_fatal());
    }

    #[test]
    fn test_result_type_err() {
        let result: Result<i32> = Err(RateMonError::NoValidTriggers(String::new()));
        assert!(matches!(result.unwrap_err(), RateMonError::NoValidTriggers(_)));
    }

    #[test]
    fn test_error_implements_std_error() {
        let error: Box<dyn std::error::Error> =
            Box::new(RateMonError::Serialization("bad json".to_string()));
        assert_eq!(error.to_string(), "Serialization error: bad json");
    }

    #[test]
    fn test_all_error_variants_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RateMonError>();
    }
}
