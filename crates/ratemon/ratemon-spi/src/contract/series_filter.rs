//! Point filter trait definition.

use crate::model::Series;

/// A filter removing invalid or outlying points from a series.
///
/// Filters never reorder samples and applying one twice gives the same
/// result as applying it once.
pub trait SeriesFilter: Send + Sync {
    /// Filter name, for logging.
    fn name(&self) -> &str;

    /// Return the surviving samples.
    fn apply(&self, series: &Series) -> Series;
}
