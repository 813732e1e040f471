use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mverse_core::errors::{ErrorInfo, MverseError};
use mverse_core::EffectRow;
use rayon::ThreadPool;

use crate::estimator::{EffectEstimator, Estimate, EstimateError, MethodParams};

/// Cooperative cancellation flag shared between the caller and a running
/// build or bootstrap. Checked between work units only.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token in the running state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Fails with [`MverseError::Cancelled`] when cancellation was requested.
    pub fn check(&self, stage: &str) -> Result<(), MverseError> {
        if self.is_cancelled() {
            return Err(MverseError::Cancelled(
                ErrorInfo::new("cancelled", "run cancelled between work units")
                    .with_context("stage", stage),
            ));
        }
        Ok(())
    }
}

pub(crate) fn thread_pool(concurrency: usize) -> Result<ThreadPool, MverseError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(concurrency.max(1))
        .build()
        .map_err(|err| MverseError::serde("thread_pool", err))
}

/// Successful estimator call on the canonical scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOutcome {
    /// Canonical-scale estimate.
    pub estimate: Estimate,
    /// Number of estimator calls spent.
    pub attempts: u32,
}

/// Calls the estimator, retrying non-convergence with relaxed controls up to
/// `max_retries` extra times. Fatal and degenerate failures return at once.
pub fn fit_with_retries<E: EffectEstimator + ?Sized>(
    estimator: &E,
    rows: &[&EffectRow],
    how: &BTreeMap<String, String>,
    max_retries: u32,
) -> Result<FitOutcome, EstimateError> {
    let mut params = MethodParams::new(how.clone());
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match estimator.estimate(rows, &params) {
            Ok(fit) => {
                let estimate = fit.canonical();
                let finite = [estimate.mean, estimate.lb, estimate.ub, estimate.p]
                    .iter()
                    .all(|value| value.is_finite());
                if !finite || estimate.lb > estimate.ub {
                    return Err(EstimateError::Degenerate(
                        "estimator returned a non-finite or inverted interval".to_string(),
                    ));
                }
                return Ok(FitOutcome {
                    estimate,
                    attempts: attempt,
                });
            }
            Err(err) if err.is_transient() && attempt <= max_retries => {
                params.control = params.control.relaxed();
            }
            Err(err) => return Err(err),
        }
    }
}
