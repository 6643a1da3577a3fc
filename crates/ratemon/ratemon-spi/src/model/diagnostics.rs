//! Record of runs and triggers that were skipped, and why.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::fit::ModelKind;
use super::ids::{GroupName, RunId, TriggerId};

/// Why a run, trigger or fit was skipped or flagged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// No usable samples (source failure, everything filtered, not grouped).
    DataUnavailable { detail: String },
    /// Too few points reached the fitter.
    InsufficientPoints { required: usize, actual: usize },
    /// The optimizer returned NaN for these parameter indices; they were zeroed.
    DegenerateFit { kind: ModelKind, parameters: Vec<usize> },
    /// The task was never started because processing was cancelled.
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::DataUnavailable { detail } => write!(f, "data unavailable: {}", detail),
            SkipReason::InsufficientPoints { required, actual } => {
                write!(f, "not enough points ({} < {})", actual, required)
            }
            SkipReason::DegenerateFit { kind, parameters } => {
                write!(f, "NaN {} fit parameters {:?} zeroed", kind, parameters)
            }
            SkipReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One diagnostics entry; the scope fields that do not apply are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<RunId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupName>,
    #[serde(flatten)]
    pub reason: SkipReason,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut scope = Vec::new();
        if let Some(run) = self.run {
            scope.push(format!("run {}", run));
        }
        if let Some(trigger) = &self.trigger {
            scope.push(trigger.to_string());
        }
        if let Some(group) = &self.group {
            scope.push(format!("group {}", group));
        }
        if scope.is_empty() {
            write!(f, "{}", self.reason)
        } else {
            write!(f, "{}: {}", scope.join(", "), self.reason)
        }
    }
}

/// Ordered list of diagnostics collected during a pipeline pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.entries.push(diagnostic);
    }

    /// A whole run contributed nothing.
    pub fn run_skipped(&mut self, run: RunId, detail: impl Into<String>) {
        self.push(Diagnostic {
            run: Some(run),
            trigger: None,
            group: None,
            reason: SkipReason::DataUnavailable {
                detail: detail.into(),
            },
        });
    }

    /// A run contributed nothing to one trigger.
    pub fn trigger_run_skipped(&mut self, run: RunId, trigger: TriggerId, detail: impl Into<String>) {
        self.push(Diagnostic {
            run: Some(run),
            trigger: Some(trigger),
            group: None,
            reason: SkipReason::DataUnavailable {
                detail: detail.into(),
            },
        });
    }

    /// A `(trigger, group)` fit was skipped or flagged.
    pub fn fit_skipped(&mut self, trigger: TriggerId, group: GroupName, reason: SkipReason) {
        self.push(Diagnostic {
            run: None,
            trigger: Some(trigger),
            group: Some(group),
            reason,
        });
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs with at least one `DataUnavailable` entry, ascending and distinct.
    pub fn skipped_runs(&self) -> Vec<RunId> {
        let mut runs: Vec<RunId> = self
            .entries
            .iter()
            .filter(|d| matches!(d.reason, SkipReason::DataUnavailable { .. }))
            .filter_map(|d| d.run)
            .collect();
        runs.sort();
        runs.dedup();
        runs
    }

    /// Triggers with a degenerate (NaN) fit.
    pub fn nan_fits(&self) -> Vec<&TriggerId> {
        let mut triggers: Vec<&TriggerId> = self
            .entries
            .iter()
            .filter(|d| matches!(d.reason, SkipReason::DegenerateFit { .. }))
            .filter_map(|d| d.trigger.as_ref())
            .collect();
        triggers.sort();
        triggers.dedup();
        triggers
    }

    /// Entries mentioning the given trigger.
    pub fn for_trigger<'a>(&'a self, trigger: &'a TriggerId) -> impl Iterator<Item = &'a Diagnostic> {
        self.entries
            .iter()
            .filter(move |d| d.trigger.as_ref() == Some(trigger))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skipped_runs_are_distinct_and_sorted() {
        let mut diags = Diagnostics::new();
        diags.run_skipped(RunId::new(5), "run not found");
        diags.trigger_run_skipped(RunId::new(2), "HLT_A".into(), "no samples");
        diags.trigger_run_skipped(RunId::new(5), "HLT_B".into(), "no samples");
        assert_eq!(diags.skipped_runs(), vec![RunId::new(2), RunId::new(5)]);
    }

    #[test]
    fn test_nan_fits() {
        let mut diags = Diagnostics::new();
        diags.fit_skipped(
            "HLT_A".into(),
            GroupName::default_group(),
            SkipReason::DegenerateFit {
                kind: ModelKind::Exp,
                parameters: vec![2, 3],
            },
        );
        diags.fit_skipped(
            "HLT_B".into(),
            GroupName::default_group(),
            SkipReason::InsufficientPoints {
                required: 10,
                actual: 3,
            },
        );
        assert_eq!(diags.nan_fits(), vec![&TriggerId::new("HLT_A")]);
        assert_eq!(diags.for_trigger(&"HLT_B".into()).count(), 1);
    }

    #[test]
    fn test_display_enumerates_scope() {
        let mut diags = Diagnostics::new();
        diags.trigger_run_skipped(RunId::new(7), "HLT_A".into(), "no trigger key");
        assert_eq!(
            diags.entries()[0].to_string(),
            "run 7, HLT_A: data unavailable: no trigger key"
        );
    }

    #[test]
    fn test_diagnostic_json_is_flat() {
        let mut diags = Diagnostics::new();
        diags.fit_skipped(
            "HLT_A".into(),
            "g".into(),
            SkipReason::InsufficientPoints {
                required: 10,
                actual: 9,
            },
        );
        let json = serde_json::to_value(&diags).unwrap();
        assert_eq!(json[0]["reason"], "insufficient_points");
        assert_eq!(json[0]["actual"], 9);
        assert!(json[0].get("run").is_none());
    }
}
