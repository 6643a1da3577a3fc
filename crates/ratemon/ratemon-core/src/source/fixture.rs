//! JSON-document rate source.
//!
//! ```json
//! {
//!   "runs": {
//!     "305112": {
//!       "colliding_bunches": 2544,
//!       "deadtime": {"7": 0.04},
//!       "triggers": {"HLT_IsoMu24": [{"lumisection": 1, "x": 31.2, "rate": 410.0}]}
//!     }
//!   },
//!   "fills": {"6371": [305112]}
//! }
//! ```
//!
//! A run whose `triggers` is `null` has no trigger key.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use ratemon_spi::{
    Lumisection, RateMonError, RateSource, RawRateRecord, Result, RunId, SourceError, TriggerId,
    TriggerRates, TriggerSelector,
};

/// Recorded data of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunFixture {
    #[serde(default)]
    pub colliding_bunches: Option<u32>,
    /// Deadtime fraction per lumisection.
    #[serde(default)]
    pub deadtime: BTreeMap<Lumisection, f64>,
    #[serde(default)]
    pub triggers: Option<BTreeMap<TriggerId, Vec<RawRateRecord>>>,
}

impl RunFixture {
    pub fn new(colliding_bunches: u32) -> Self {
        Self {
            colliding_bunches: Some(colliding_bunches),
            deadtime: BTreeMap::new(),
            triggers: Some(BTreeMap::new()),
        }
    }

    /// A run the source knows about but that has no trigger key.
    pub fn without_trigger_key() -> Self {
        Self {
            colliding_bunches: None,
            deadtime: BTreeMap::new(),
            triggers: None,
        }
    }

    pub fn with_trigger(mut self, trigger: impl Into<TriggerId>, records: Vec<RawRateRecord>) -> Self {
        self.triggers
            .get_or_insert_with(BTreeMap::new)
            .insert(trigger.into(), records);
        self
    }

    pub fn with_deadtime(mut self, lumisection: Lumisection, fraction: f64) -> Self {
        self.deadtime.insert(lumisection, fraction);
        self
    }
}

/// Top-level fixture document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixtureDocument {
    #[serde(default)]
    pub runs: BTreeMap<u32, RunFixture>,
    #[serde(default)]
    pub fills: BTreeMap<u32, Vec<u32>>,
}

/// Rate source serving a [`FixtureDocument`] from memory.
#[derive(Debug, Clone)]
pub struct FixtureRateSource {
    name: String,
    document: FixtureDocument,
}

impl FixtureRateSource {
    pub fn new(document: FixtureDocument) -> Self {
        Self {
            name: "fixture".to_string(),
            document,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let document: FixtureDocument =
            serde_json::from_str(json).map_err(|e| RateMonError::Serialization(e.to_string()))?;
        Ok(Self::new(document))
    }

    /// Load a fixture file; the source is named after the file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| RateMonError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
        let mut source = Self::from_json_str(&content)?;
        source.name = path.display().to_string();
        Ok(source)
    }

    pub fn with_run(mut self, run: u32, fixture: RunFixture) -> Self {
        self.document.runs.insert(run, fixture);
        self
    }

    pub fn with_fill(mut self, fill: u32, runs: impl IntoIterator<Item = u32>) -> Self {
        self.document.fills.insert(fill, runs.into_iter().collect());
        self
    }

    pub fn document(&self) -> &FixtureDocument {
        &self.document
    }

    /// Runs present in the document, ascending.
    pub fn runs(&self) -> Vec<RunId> {
        self.document.runs.keys().copied().map(RunId::new).collect()
    }

    fn run(&self, run: RunId) -> std::result::Result<&RunFixture, SourceError> {
        self.document
            .runs
            .get(&run.number())
            .ok_or(SourceError::RunNotFound(run))
    }
}

impl RateSource for FixtureRateSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch_rates(&self, run: RunId, triggers: &TriggerSelector) -> std::result::Result<TriggerRates, SourceError> {
        let fixture = self.run(run)?;
        let all = fixture.triggers.as_ref().ok_or(SourceError::NoTriggerKey(run))?;
        Ok(all
            .iter()
            .filter(|(trigger, _)| triggers.matches(trigger))
            .map(|(trigger, records)| {
                let mut records = records.clone();
                records.sort_by_key(|r| r.lumisection);
                (trigger.clone(), records)
            })
            .collect())
    }

    fn colliding_bunches(&self, run: RunId) -> std::result::Result<Option<u32>, SourceError> {
        Ok(self.run(run)?.colliding_bunches)
    }

    fn deadtime(&self, run: RunId) -> std::result::Result<BTreeMap<Lumisection, f64>, SourceError> {
        Ok(self.run(run)?.deadtime.clone())
    }

    fn runs_in_fill(&self, fill: u32) -> std::result::Result<Vec<RunId>, SourceError> {
        self.document
            .fills
            .get(&fill)
            .map(|runs| runs.iter().copied().map(RunId::new).collect())
            .ok_or_else(|| SourceError::Unsupported(format!("fill {} not in {}", fill, self.name)))
    }
}
