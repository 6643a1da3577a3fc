//! Trigger-Rate Monitoring Service Provider Interface
//!
//! Defines the data model, error types and collaborator traits shared by
//! the rate-monitoring crates.

pub mod contract;
pub mod error;
pub mod model;

// Re-export all public items at crate root for convenience
pub use contract::{RateSource, ReportWriter, SeriesFilter, TriggerRates, TriggerSelector};
pub use error::{RateMonError, Result, SourceError};
pub use model::{
    compress_ranges, AnomalyReport, Diagnostic, Diagnostics, FitCollection, FitModel, GroupFits,
    GroupName, Lumisection, ModelKind, Prediction, RawRateRecord, RunGroup, RunGroupDefinition,
    RunGroups, RunId, Sample, Series, SkipReason, TriggerId,
};
