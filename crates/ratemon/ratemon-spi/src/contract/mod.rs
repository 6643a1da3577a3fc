//! Contract definitions for trigger-rate monitoring.
//!
//! Collaborators implement these traits: data sources, point filters and
//! report sinks.

mod rate_source;
mod report_writer;
mod series_filter;

pub use rate_source::{RateSource, TriggerRates, TriggerSelector};
pub use report_writer::ReportWriter;
pub use series_filter::SeriesFilter;
