//! Rate data source trait definition.

use std::collections::BTreeMap;

use crate::error::SourceError;
use crate::model::{Lumisection, RawRateRecord, RunId, TriggerId};

/// Per-trigger raw records of one run, in lumisection order.
pub type TriggerRates = BTreeMap<TriggerId, Vec<RawRateRecord>>;

/// Which triggers to fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TriggerSelector {
    /// Every trigger the source knows for the run.
    #[default]
    All,
    /// Only the named triggers; unknown names are silently absent.
    Named(Vec<TriggerId>),
}

impl TriggerSelector {
    pub fn named(triggers: impl IntoIterator<Item = impl Into<TriggerId>>) -> Self {
        TriggerSelector::Named(triggers.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, trigger: &TriggerId) -> bool {
        match self {
            TriggerSelector::All => true,
            TriggerSelector::Named(names) => names.contains(trigger),
        }
    }
}

/// Source of per-lumisection trigger rates.
///
/// Fetching is blocking; implementations must be shareable across the
/// worker pool.
pub trait RateSource: Send + Sync {
    /// Source name, for logging.
    fn name(&self) -> &str;

    /// Raw records for the selected triggers of a run.
    fn fetch_rates(&self, run: RunId, triggers: &TriggerSelector) -> Result<TriggerRates, SourceError>;

    /// Colliding-bunch count of a run, if known.
    fn colliding_bunches(&self, run: RunId) -> Result<Option<u32>, SourceError>;

    /// Deadtime fraction (0..1) per lumisection. Missing lumisections have no
    /// recorded deadtime.
    fn deadtime(&self, run: RunId) -> Result<BTreeMap<Lumisection, f64>, SourceError>;

    /// Runs recorded during an LHC fill.
    fn runs_in_fill(&self, fill: u32) -> Result<Vec<RunId>, SourceError> {
        Err(SourceError::Unsupported(format!(
            "{} cannot resolve fill {}",
            self.name(),
            fill
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Empty;

    impl RateSource for Empty {
        fn name(&self) -> &str {
            "empty"
        }

        fn fetch_rates(&self, run: RunId, _: &TriggerSelector) -> Result<TriggerRates, SourceError> {
            Err(SourceError::RunNotFound(run))
        }

        fn colliding_bunches(&self, _: RunId) -> Result<Option<u32>, SourceError> {
            Ok(None)
        }

        fn deadtime(&self, _: RunId) -> Result<BTreeMap<Lumisection, f64>, SourceError> {
            Ok(BTreeMap::new())
        }
    }

    #[test]
    fn test_selector_matches() {
        let selector = TriggerSelector::named(["HLT_A", "HLT_B"]);
        assert!(selector.matches(&"HLT_A".into()));
        assert!(!selector.matches(&"HLT_C".into()));
        assert!(TriggerSelector::All.matches(&"anything".into()));
    }

    #[test]
    fn test_runs_in_fill_defaults_to_unsupported() {
        let err = Empty.runs_in_fill(6371).unwrap_err();
        assert_eq!(
            err,
            SourceError::Unsupported("empty cannot resolve fill 6371".to_string())
        );
    }

    #[test]
    fn test_source_is_object_safe() {
        let source: Box<dyn RateSource> = Box::new(Empty);
        assert!(source.fetch_rates(RunId::new(1), &TriggerSelector::All).is_err());
    }
}
