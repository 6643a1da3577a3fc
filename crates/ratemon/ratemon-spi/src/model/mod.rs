//! Data models for trigger-rate monitoring.
//!
//! Identifiers, samples and series flow in; fits, predictions, reports and
//! diagnostics flow out.

mod diagnostics;
mod fit;
mod ids;
mod prediction;
mod report;
mod run_group;
mod sample;
mod series;

pub use diagnostics::{Diagnostic, Diagnostics, SkipReason};
pub use fit::{FitCollection, FitModel, GroupFits, ModelKind};
pub use ids::{GroupName, Lumisection, RunId, TriggerId};
pub use prediction::Prediction;
pub use report::{compress_ranges, AnomalyReport};
pub use run_group::{RunGroup, RunGroupDefinition, RunGroups};
pub use sample::{RawRateRecord, Sample};
pub use series::Series;
