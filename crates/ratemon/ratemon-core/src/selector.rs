//! Best-model selection and merging of fit collections.

use ratemon_api::SelectionPolicy;
use ratemon_spi::{FitCollection, FitModel, GroupFits, GroupName, ModelKind, TriggerId};

/// Chooses one model per `(trigger, group)` under a [`SelectionPolicy`].
#[derive(Debug, Clone, Default)]
pub struct FitSelector {
    policy: SelectionPolicy,
}

impl FitSelector {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    /// Pick a model from `fits`. Models with a non-finite MSE are never
    /// chosen; `None` when nothing qualifies.
    pub fn choose_best<'a>(&self, fits: &'a GroupFits) -> Option<(ModelKind, &'a FitModel)> {
        match &self.policy {
            SelectionPolicy::BestByMse => choose_by_mse(fits),
            SelectionPolicy::Fixed { kind } => fits
                .get(kind)
                .filter(|m| m.residual_mse.is_finite())
                .map(|m| (*kind, m))
                .or_else(|| choose_by_mse(fits)),
            SelectionPolicy::Weighted { penalties } => choose_weighted(fits, |kind| {
                penalties.get(&kind).copied().unwrap_or(0.0)
            }),
        }
    }

    /// Selected model for one `(trigger, group)` of a collection.
    pub fn best_for<'a>(
        &self,
        fits: &'a FitCollection,
        trigger: &TriggerId,
        group: &GroupName,
    ) -> Option<&'a FitModel> {
        fits.group_fits(trigger, group)
            .and_then(|g| self.choose_best(g))
            .map(|(_, model)| model)
    }
}

/// Smallest residual MSE; ties go to the kind listed first.
pub fn choose_by_mse(fits: &GroupFits) -> Option<(ModelKind, &FitModel)> {
    choose_weighted(fits, |_| 0.0)
}

/// Smallest `|mse - best| / best + penalty(kind)`.
fn choose_weighted(
    fits: &GroupFits,
    penalty: impl Fn(ModelKind) -> f64,
) -> Option<(ModelKind, &FitModel)> {
    let best_mse = fits
        .values()
        .map(|m| m.residual_mse)
        .filter(|mse| mse.is_finite())
        .fold(f64::INFINITY, f64::min);
    if !best_mse.is_finite() {
        return None;
    }

    let mut chosen: Option<(f64, ModelKind, &FitModel)> = None;
    // GroupFits iterates in kind priority order, so strict `<` keeps the
    // earlier kind on ties.
    for (&kind, model) in fits {
        if !model.residual_mse.is_finite() {
            continue;
        }
        let relative = if best_mse > 0.0 {
            (model.residual_mse - best_mse).abs() / best_mse
        } else if model.residual_mse == 0.0 {
            0.0
        } else {
            f64::INFINITY
        };
        let score = relative + penalty(kind);
        if chosen.as_ref().map_or(true, |(best, _, _)| score < *best) {
            chosen = Some((score, kind, model));
        }
    }
    chosen.map(|(_, kind, model)| (kind, model))
}

/// Union of two collections; `b` wins per `(trigger, group, kind)`.
pub fn merge_fits(a: FitCollection, b: FitCollection) -> FitCollection {
    a.merge(b)
}
