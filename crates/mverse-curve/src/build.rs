use std::collections::{BTreeMap, HashSet};

use mverse_core::errors::{ErrorInfo, MverseError};
use mverse_core::{EffectRow, IdSet, RowDataset};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{Factor, MultiverseConfig};
use crate::dispatch::{fit_with_retries, thread_pool, CancelToken};
use crate::enumerate::{Combination, FactorSpace};
use crate::estimator::{EffectEstimator, Estimate, EstimateError};

/// One retained specification with its fitted summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Specification {
    /// Factor values aligned with [`SpecTable::factor_names`].
    pub factors: Vec<String>,
    /// Summary effect on the canonical scale.
    pub mean: f64,
    /// Lower confidence bound.
    pub lb: f64,
    /// Upper confidence bound.
    pub ub: f64,
    /// p-value.
    pub p: f64,
    /// Number of included rows.
    pub k: usize,
    /// Number of distinct included clusters.
    pub kc: usize,
    /// Included cluster identifiers.
    pub set: IdSet,
    /// Included row identifiers.
    pub set_es: IdSet,
    /// True when `set` covers every cluster of the dataset.
    pub full_set: bool,
    /// 1-based position by ascending mean.
    pub rank: usize,
    /// Interval width `ub - lb`.
    pub ci: f64,
}

/// Ranked specification table.
///
/// `specs` is sorted by rank; ranks are `1..=len` unless the table is a
/// filtered view produced by [`SpecTable::subset`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecTable {
    /// Which-factor names, in column order.
    pub which: Vec<String>,
    /// How-factor names, in column order.
    pub how: Vec<String>,
    /// Specifications sorted by rank.
    pub specs: Vec<Specification>,
}

impl SpecTable {
    /// Empty table over the given factor columns.
    pub fn empty(which: Vec<String>, how: Vec<String>) -> Self {
        Self {
            which,
            how,
            specs: Vec::new(),
        }
    }

    /// Number of specifications.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Returns true when no specification is present.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Iterates in rank order.
    pub fn iter(&self) -> std::slice::Iter<'_, Specification> {
        self.specs.iter()
    }

    /// Factor names, which-factors first.
    pub fn factor_names(&self) -> Vec<String> {
        self.which.iter().chain(self.how.iter()).cloned().collect()
    }

    /// Column position of the named factor.
    pub fn factor_index(&self, name: &str) -> Option<usize> {
        self.which
            .iter()
            .chain(self.how.iter())
            .position(|candidate| candidate == name)
    }

    /// Looks up a specification by rank.
    pub fn by_rank(&self, rank: usize) -> Option<&Specification> {
        match self.specs.get(rank.wrapping_sub(1)) {
            Some(spec) if spec.rank == rank => Some(spec),
            _ => self.specs.iter().find(|spec| spec.rank == rank),
        }
    }

    /// Value of the named factor for `spec`.
    pub fn factor_value<'a>(&self, spec: &'a Specification, name: &str) -> Option<&'a str> {
        self.factor_index(name)
            .and_then(|idx| spec.factors.get(idx))
            .map(String::as_str)
    }

    /// How-factor values of `spec` keyed by factor name.
    pub fn how_values(&self, spec: &Specification) -> BTreeMap<String, String> {
        self.how
            .iter()
            .zip(spec.factors.iter().skip(self.which.len()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Copy restricted to the given ranks, keeping rank order and rank values.
    pub fn subset(&self, ranks: &[usize]) -> SpecTable {
        let keep: HashSet<usize> = ranks.iter().copied().collect();
        SpecTable {
            which: self.which.clone(),
            how: self.how.clone(),
            specs: self
                .specs
                .iter()
                .filter(|spec| keep.contains(&spec.rank))
                .cloned()
                .collect(),
        }
    }

    /// Observed means in rank order.
    pub fn observed_curve(&self) -> Vec<f64> {
        self.specs.iter().map(|spec| spec.mean).collect()
    }

    /// Ranks of the table in order.
    pub fn ranks(&self) -> Vec<usize> {
        self.specs.iter().map(|spec| spec.rank).collect()
    }
}

/// Options controlling the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOpts {
    /// Worker threads used for fitting.
    pub concurrency: usize,
    /// Extra estimator attempts after non-convergence.
    pub max_retries: u32,
}

impl Default for BuildOpts {
    fn default() -> Self {
        Self {
            concurrency: 1,
            max_retries: 2,
        }
    }
}

/// Counters describing one build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BuildSummary {
    /// Size of the cartesian product.
    pub enumerated: usize,
    /// Combinations dropped for matching fewer than `k_min` rows.
    pub below_k_min: usize,
    /// Combinations dropped after estimator failure.
    pub failed: usize,
    /// Fitted combinations collapsed by deduplication.
    pub duplicates: usize,
    /// Specifications in the final table.
    pub retained: usize,
}

/// Built table plus its counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildOutcome {
    /// Ranked specification table.
    pub table: SpecTable,
    /// Build counters.
    pub summary: BuildSummary,
}

struct Candidate {
    index: usize,
    factors: Vec<String>,
    estimate: Estimate,
    k: usize,
    set: IdSet,
    set_es: IdSet,
}

enum Slot {
    BelowKMin,
    Failed { index: usize, reason: EstimateError },
    Fitted(Candidate),
}

/// Rows matching every non-wildcard which-value, in dataset order.
pub(crate) fn restrict_rows<'a>(
    dataset: &'a RowDataset,
    which: &[Factor],
    values: &[String],
) -> Vec<&'a EffectRow> {
    let active: Vec<(&str, &str)> = which
        .iter()
        .zip(values)
        .filter(|(factor, value)| !factor.is_wildcard(value))
        .map(|(factor, value)| (factor.name.as_str(), value.as_str()))
        .collect();
    dataset
        .rows()
        .iter()
        .filter(|row| {
            active
                .iter()
                .all(|(name, value)| row.category(name) == Some(*value))
        })
        .collect()
}

fn evaluate<E: EffectEstimator + ?Sized>(
    combo: &Combination,
    space: &FactorSpace,
    config: &MultiverseConfig,
    dataset: &RowDataset,
    estimator: &E,
    opts: &BuildOpts,
    cancel: &CancelToken,
) -> Result<Slot, MverseError> {
    cancel.check("build")?;
    let rows = restrict_rows(dataset, &config.which, combo.which_values(space));
    if rows.len() < config.k_min {
        return Ok(Slot::BelowKMin);
    }
    let set = IdSet::from_ids(rows.iter().map(|row| row.cluster_id));
    let set_es = IdSet::from_ids(rows.iter().map(|row| row.row_id));
    let how: BTreeMap<String, String> = config
        .how
        .iter()
        .map(|factor| factor.name.clone())
        .zip(combo.how_values(space).iter().cloned())
        .collect();

    match fit_with_retries(estimator, &rows, &how, opts.max_retries) {
        Ok(outcome) => {
            let mut estimate = outcome.estimate;
            // -0.0 and 0.0 must share a dedup key and a rank position
            estimate.mean += 0.0;
            debug!(
                index = combo.index,
                k = rows.len(),
                kc = set.len(),
                mean = estimate.mean,
                attempts = outcome.attempts,
                "specification fitted"
            );
            Ok(Slot::Fitted(Candidate {
                index: combo.index,
                factors: combo.values.clone(),
                estimate,
                k: rows.len(),
                set,
                set_es,
            }))
        }
        Err(err) if err.is_fatal() => Err(MverseError::from(err)),
        Err(reason) => Ok(Slot::Failed {
            index: combo.index,
            reason,
        }),
    }
}

/// Enumerates, fits, deduplicates and ranks every specification.
///
/// Combinations matching fewer than `k_min` rows are dropped silently.
/// Estimator failures drop the combination with a warning unless the
/// failure is fatal (unsupported method) or every fitted combination failed.
pub fn build_spec_table<E: EffectEstimator + ?Sized>(
    config: &MultiverseConfig,
    dataset: &RowDataset,
    estimator: &E,
    opts: &BuildOpts,
    cancel: &CancelToken,
) -> Result<BuildOutcome, MverseError> {
    let space = FactorSpace::from_config(config);
    let combos = space.combinations();
    info!(combinations = combos.len(), "factor space enumerated");

    let pool = thread_pool(opts.concurrency)?;
    let slots: Vec<Slot> = pool.install(|| {
        combos
            .par_iter()
            .map(|combo| evaluate(combo, &space, config, dataset, estimator, opts, cancel))
            .collect::<Result<Vec<_>, MverseError>>()
    })?;
    cancel.check("build")?;

    let mut summary = BuildSummary {
        enumerated: combos.len(),
        ..BuildSummary::default()
    };
    let mut fitted = Vec::with_capacity(slots.len());
    for slot in slots {
        match slot {
            Slot::BelowKMin => summary.below_k_min += 1,
            Slot::Failed { index, reason } => {
                warn!(index, values = ?combos[index].values, %reason, "specification dropped");
                summary.failed += 1;
            }
            Slot::Fitted(candidate) => fitted.push(candidate),
        }
    }
    if fitted.is_empty() && summary.failed > 0 {
        return Err(MverseError::Estimate(
            ErrorInfo::new(
                "all_specifications_failed",
                "the estimator failed for every specification",
            )
            .with_context("failed", summary.failed),
        ));
    }

    let n_which = space.n_which();
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(fitted.len());
    for candidate in fitted {
        let key = (
            candidate.estimate.mean.to_bits(),
            candidate.set.clone(),
            candidate.factors[n_which..].to_vec(),
        );
        if seen.insert(key) {
            unique.push(candidate);
        } else {
            summary.duplicates += 1;
        }
    }

    // stable: equal means keep enumeration order
    unique.sort_by(|a, b| {
        a.estimate
            .mean
            .total_cmp(&b.estimate.mean)
            .then(a.index.cmp(&b.index))
    });
    let all_clusters = dataset.cluster_ids();
    let specs: Vec<Specification> = unique
        .into_iter()
        .enumerate()
        .map(|(pos, candidate)| {
            let Estimate { mean, lb, ub, p } = candidate.estimate;
            Specification {
                factors: candidate.factors,
                mean,
                lb,
                ub,
                p,
                k: candidate.k,
                kc: candidate.set.len(),
                full_set: candidate.set == all_clusters,
                set: candidate.set,
                set_es: candidate.set_es,
                rank: pos + 1,
                ci: ub - lb,
            }
        })
        .collect();
    summary.retained = specs.len();
    if specs.is_empty() {
        warn!(k_min = config.k_min, "no combination reached k_min");
    }
    info!(
        retained = summary.retained,
        below_k_min = summary.below_k_min,
        failed = summary.failed,
        duplicates = summary.duplicates,
        "specification table built"
    );

    Ok(BuildOutcome {
        table: SpecTable {
            which: space.names()[..n_which].to_vec(),
            how: space.names()[n_which..].to_vec(),
            specs,
        },
        summary,
    })
}
