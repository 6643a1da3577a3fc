//! # ratemon
//!
//! Trigger-rate monitoring for collider runs.
//!
//! Rates recorded per lumisection are aggregated across run groups, cleaned,
//! fitted against pileup with several functional forms, and used to flag
//! lumisections whose observed rates fall outside the predicted band.
//!
//! ```rust,ignore
//! use ratemon::prelude::*;
//!
//! let source = FixtureRateSource::from_path("rates.json")?;
//! let monitor = RateMonitor::new(RateMonConfig::from_path("ratemon.json")?)?;
//! let mut reports: Vec<AnomalyReport> = Vec::new();
//! let result = monitor.run(&source, &[RunId::new(305112)], &[RunId::new(305113)], &mut reports)?;
//! println!("{}", result.summary());
//! ```

pub use ratemon_facade::*;

/// Commonly used types.
pub mod prelude {
    pub use ratemon_facade::{
        AggregatorConfig, AnomalyDetector, AnomalyReport, DetectorConfig, Diagnostics,
        FilterConfig, FitCollection, FitModel, FitSelector, FitterConfig, FixtureRateSource,
        GroupName, ModelFitter, ModelKind, PointFilter, Predictor, RateMonConfig, RateMonError,
        RateMonitor, RateSource, RawRateRecord, Result, RunGroupAggregator, RunGroups, RunId,
        Series, SelectionPolicy, SkipReason, TriggerId, TriggerSelector,
    };
}
