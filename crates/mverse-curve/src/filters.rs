use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use mverse_core::errors::{ErrorInfo, MverseError};
use serde::{Deserialize, Serialize};

use crate::build::{SpecTable, Specification};
use crate::codec::load_structured;
use crate::stat::share;

/// Position of the confidence interval relative to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiCase {
    /// `ub < 0`.
    Negative,
    /// `lb > 0`.
    Positive,
    /// `lb < 0 < ub`.
    SpansZero,
}

/// Sign selection on the summary effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectSign {
    /// No restriction.
    #[default]
    All,
    /// `mean < 0`.
    Negative,
    /// `mean >= 0`.
    NonNegative,
}

/// Inclusive integer range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRange {
    /// Lower bound.
    pub min: usize,
    /// Upper bound.
    pub max: usize,
}

impl CountRange {
    fn contains(&self, value: usize) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Interactive filter state. Every predicate is disabled by default.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterState {
    /// Confidence-interval case, when the CI toggle is on.
    pub ci_case: Option<CiCase>,
    /// Allowed cluster-count range.
    pub kc_range: Option<CountRange>,
    /// Allowed row-count range.
    pub k_range: Option<CountRange>,
    /// Keep `p` strictly below this threshold, when the toggle is on.
    pub p_below: Option<f64>,
    /// Effect sign selection.
    pub sign: EffectSign,
    /// Allowed clusters; every cluster of `set` must be listed.
    pub clusters: Option<Vec<u64>>,
    /// Allowed rows; every row of `set_es` must be listed.
    pub rows: Option<Vec<u64>>,
    /// Required value per factor; empty strings mean no selection.
    pub factors: BTreeMap<String, String>,
}

enum Predicate {
    Ci(CiCase),
    ClusterCount(CountRange),
    RowCount(CountRange),
    Significance(f64),
    Sign(EffectSign),
    ClusterSubset(BTreeSet<u64>),
    RowSubset(BTreeSet<u64>),
    FactorEquals { column: usize, value: String },
}

impl Predicate {
    fn keep(&self, spec: &Specification) -> bool {
        match self {
            Predicate::Ci(CiCase::Negative) => spec.ub < 0.0,
            Predicate::Ci(CiCase::Positive) => spec.lb > 0.0,
            Predicate::Ci(CiCase::SpansZero) => spec.lb < 0.0 && 0.0 < spec.ub,
            Predicate::ClusterCount(range) => range.contains(spec.kc),
            Predicate::RowCount(range) => range.contains(spec.k),
            Predicate::Significance(threshold) => spec.p < *threshold,
            Predicate::Sign(EffectSign::All) => true,
            Predicate::Sign(EffectSign::Negative) => spec.mean < 0.0,
            Predicate::Sign(EffectSign::NonNegative) => spec.mean >= 0.0,
            Predicate::ClusterSubset(allowed) => spec.set.iter().all(|id| allowed.contains(&id)),
            Predicate::RowSubset(allowed) => spec.set_es.iter().all(|id| allowed.contains(&id)),
            Predicate::FactorEquals { column, value } => {
                spec.factors.get(*column).map(String::as_str) == Some(value.as_str())
            }
        }
    }
}

impl FilterState {
    /// Returns true when no predicate is enabled.
    pub fn is_disabled(&self) -> bool {
        self.ci_case.is_none()
            && self.kc_range.is_none()
            && self.k_range.is_none()
            && self.p_below.is_none()
            && self.sign == EffectSign::All
            && self.clusters.is_none()
            && self.rows.is_none()
            && self.factors.values().all(String::is_empty)
    }

    fn predicates(&self, table: &SpecTable) -> Result<Vec<Predicate>, MverseError> {
        let mut predicates = Vec::new();
        predicates.extend(self.ci_case.map(Predicate::Ci));
        predicates.extend(self.kc_range.map(Predicate::ClusterCount));
        predicates.extend(self.k_range.map(Predicate::RowCount));
        predicates.extend(self.p_below.map(Predicate::Significance));
        if self.sign != EffectSign::All {
            predicates.push(Predicate::Sign(self.sign));
        }
        if let Some(clusters) = &self.clusters {
            predicates.push(Predicate::ClusterSubset(clusters.iter().copied().collect()));
        }
        if let Some(rows) = &self.rows {
            predicates.push(Predicate::RowSubset(rows.iter().copied().collect()));
        }
        for (factor, value) in &self.factors {
            if value.is_empty() {
                continue;
            }
            let column = table.factor_index(factor).ok_or_else(|| {
                MverseError::Config(
                    ErrorInfo::new("unknown_factor", "filter names a factor absent from the table")
                        .with_context("factor", factor),
                )
            })?;
            predicates.push(Predicate::FactorEquals {
                column,
                value: value.clone(),
            });
        }
        Ok(predicates)
    }
}

/// Percentages describing a filtered view, all in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterSummary {
    /// Specifications in the full table.
    pub total: usize,
    /// Specifications kept.
    pub shown: usize,
    /// `shown / total`.
    pub pct_shown: f64,
    /// Kept specifications with `p < alpha`, over `shown`.
    pub pct_significant: f64,
    /// Kept specifications with `mean >= 0`, over `shown`.
    pub pct_non_negative: f64,
    /// Kept specifications with `mean < 0`, over `shown`.
    pub pct_negative: f64,
    /// True when nothing survived the filters.
    pub empty: bool,
}

/// Filtered view with its summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterOutcome {
    /// Kept specifications, ranks unchanged.
    pub table: SpecTable,
    /// Summary percentages.
    pub summary: FilterSummary,
}

impl FilterOutcome {
    /// Ranks of the kept specifications.
    pub fn ranks(&self) -> Vec<usize> {
        self.table.ranks()
    }
}

/// Applies `state` to `table` in the fixed predicate order, stopping once
/// nothing is left. An empty result is reported, not raised.
pub fn apply_filters(
    table: &SpecTable,
    state: &FilterState,
    alpha: f64,
) -> Result<FilterOutcome, MverseError> {
    let predicates = state.predicates(table)?;
    let mut kept: Vec<&Specification> = table.iter().collect();
    for predicate in &predicates {
        if kept.is_empty() {
            break;
        }
        kept.retain(|spec| predicate.keep(spec));
    }

    let shown = kept.len();
    let significant = kept.iter().filter(|spec| spec.p < alpha).count();
    let negative = kept.iter().filter(|spec| spec.mean < 0.0).count();
    let summary = FilterSummary {
        total: table.len(),
        shown,
        pct_shown: share(shown, table.len()),
        pct_significant: share(significant, shown),
        pct_non_negative: share(shown - negative, shown),
        pct_negative: share(negative, shown),
        empty: shown == 0,
    };
    Ok(FilterOutcome {
        table: SpecTable {
            which: table.which.clone(),
            how: table.how.clone(),
            specs: kept.into_iter().cloned().collect(),
        },
        summary,
    })
}

/// Loads a filter state from JSON, or YAML by extension.
pub fn load_filters(path: &Path) -> Result<FilterState, MverseError> {
    load_structured(path)
}
