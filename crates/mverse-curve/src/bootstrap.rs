use std::collections::{BTreeMap, HashMap};

use mverse_core::errors::{ErrorInfo, MverseError};
use mverse_core::{IdSet, RngHandle, RowDataset};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::build::SpecTable;
use crate::config::MultiverseConfig;
use crate::dispatch::{fit_with_retries, thread_pool, CancelToken};
use crate::estimator::EffectEstimator;
use crate::stat::percentile;

const LOWER_QUANTILE: f64 = 0.025;
const UPPER_QUANTILE: f64 = 0.975;

/// Options for the null bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapOpts {
    /// Number of null iterations.
    pub n_iter: usize,
    /// Master seed; iteration `col` uses substream `col`.
    pub seed: u64,
    /// Worker threads.
    pub concurrency: usize,
    /// Extra estimator attempts after non-convergence.
    pub max_retries: u32,
}

impl BootstrapOpts {
    /// Options using the configured iteration count.
    pub fn from_config(config: &MultiverseConfig, seed: u64) -> Self {
        Self {
            n_iter: config.n_boot_iter,
            seed,
            concurrency: 1,
            max_retries: 2,
        }
    }
}

/// Envelope row at one rank position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NullBootRow {
    /// 1-based rank position.
    pub rank: usize,
    /// Observed mean at this position of the ascending curve.
    pub obs: f64,
    /// 2.5th percentile of the null curve at this position.
    pub boot_lb: f64,
    /// 97.5th percentile of the null curve at this position.
    pub boot_ub: f64,
}

/// Rank-aligned null envelope.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NullBootTable {
    /// Rows in rank order.
    pub rows: Vec<NullBootRow>,
}

impl NullBootTable {
    /// Number of rank positions.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true when the envelope is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Ranks whose observed mean falls outside the null envelope.
    pub fn exceedances(&self) -> Vec<usize> {
        self.rows
            .iter()
            .filter(|row| row.obs < row.boot_lb || row.obs > row.boot_ub)
            .map(|row| row.rank)
            .collect()
    }
}

/// Distinct fitting jobs and the job each specification maps to.
struct JobPlan {
    jobs: Vec<(IdSet, BTreeMap<String, String>)>,
    spec_job: Vec<usize>,
}

impl JobPlan {
    fn new(table: &SpecTable) -> Self {
        let mut index: HashMap<(IdSet, BTreeMap<String, String>), usize> = HashMap::new();
        let mut jobs = Vec::new();
        let mut spec_job = Vec::with_capacity(table.len());
        for spec in table.iter() {
            let key = (spec.set_es.clone(), table.how_values(spec));
            let job = *index.entry(key.clone()).or_insert_with(|| {
                jobs.push(key);
                jobs.len() - 1
            });
            spec_job.push(job);
        }
        Self { jobs, spec_job }
    }
}

fn null_column<E: EffectEstimator + ?Sized>(
    col: usize,
    plan: &JobPlan,
    dataset: &RowDataset,
    estimator: &E,
    opts: &BootstrapOpts,
    cancel: &CancelToken,
) -> Result<Vec<f64>, MverseError> {
    cancel.check("bootstrap")?;
    let mut rng = RngHandle::substream(opts.seed, col as u64);
    let resampled = dataset.null_resample(&mut rng)?;
    let mut means = Vec::with_capacity(plan.jobs.len());
    for (set_es, how) in &plan.jobs {
        let rows = resampled.select(set_es)?;
        let outcome = fit_with_retries(estimator, &rows, how, opts.max_retries).map_err(|err| {
            if err.is_fatal() {
                return MverseError::from(err);
            }
            MverseError::Bootstrap(
                ErrorInfo::new("bootstrap_fit_failed", err.to_string())
                    .with_context("iteration", col)
                    .with_context("set_es", set_es)
                    .with_hint("a dropped null fit would break rank alignment"),
            )
        })?;
        means.push(outcome.estimate.mean);
    }
    let mut column: Vec<f64> = plan.spec_job.iter().map(|&job| means[job]).collect();
    column.sort_by(f64::total_cmp);
    Ok(column)
}

/// Computes the rank-aligned 95% null envelope of the specification curve.
///
/// Every iteration redraws all effects as `z ~ N(0, se²)`, refits each
/// specification on its own rows and how-values, and sorts the resulting
/// null curve. Percentiles are then taken position-wise across iterations
/// and paired with the ascending observed curve.
pub fn null_bootstrap<E: EffectEstimator + ?Sized>(
    table: &SpecTable,
    dataset: &RowDataset,
    estimator: &E,
    opts: &BootstrapOpts,
    cancel: &CancelToken,
) -> Result<NullBootTable, MverseError> {
    if opts.n_iter == 0 {
        return Err(MverseError::Bootstrap(
            ErrorInfo::new("n_iter", "bootstrap needs at least one iteration")
                .with_hint("set n_boot_iter or --iter to a positive value"),
        ));
    }
    if table.is_empty() {
        return Ok(NullBootTable::default());
    }
    let plan = JobPlan::new(table);
    info!(
        specifications = table.len(),
        jobs = plan.jobs.len(),
        iterations = opts.n_iter,
        "null bootstrap started"
    );

    let pool = thread_pool(opts.concurrency)?;
    let columns: Vec<Vec<f64>> = pool.install(|| {
        (1..=opts.n_iter)
            .into_par_iter()
            .map(|col| null_column(col, &plan, dataset, estimator, opts, cancel))
            .collect::<Result<Vec<_>, MverseError>>()
    })?;
    cancel.check("bootstrap")?;

    let n = table.len();
    if let Some(bad) = columns.iter().find(|column| column.len() != n) {
        return Err(MverseError::Bootstrap(
            ErrorInfo::new("alignment", "null column length differs from the specification count")
                .with_context("expected", n)
                .with_context("found", bad.len()),
        ));
    }

    let mut observed = table.observed_curve();
    observed.sort_by(f64::total_cmp);
    let mut rows = Vec::with_capacity(n);
    let mut position_values = Vec::with_capacity(columns.len());
    for (pos, obs) in observed.into_iter().enumerate() {
        position_values.clear();
        position_values.extend(columns.iter().map(|column| column[pos]));
        position_values.sort_by(f64::total_cmp);
        rows.push(NullBootRow {
            rank: pos + 1,
            obs,
            boot_lb: percentile(&position_values, LOWER_QUANTILE),
            boot_ub: percentile(&position_values, UPPER_QUANTILE),
        });
    }
    let result = NullBootTable { rows };
    debug!(exceedances = result.exceedances().len(), "null envelope computed");
    info!(ranks = result.len(), "null bootstrap finished");
    Ok(result)
}
