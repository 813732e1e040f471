use std::collections::BTreeMap;

use mverse_core::errors::{ErrorInfo, MverseError};
use mverse_core::EffectRow;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};
use thiserror::Error;

use crate::config::{MethodRoles, ModelLevel, MultiverseConfig};

/// Iteration and convergence controls for iterative estimators.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitControl {
    /// Step length multiplier applied to each Fisher scoring update.
    pub step_adj: f64,
    /// Maximum number of scoring iterations.
    pub max_iter: usize,
    /// Absolute convergence threshold on the heterogeneity estimate.
    pub tolerance: f64,
}

impl Default for FitControl {
    fn default() -> Self {
        Self {
            step_adj: 0.5,
            max_iter: 2000,
            tolerance: 1e-5,
        }
    }
}

impl FitControl {
    /// Controls used when retrying after non-convergence.
    pub fn relaxed(&self) -> Self {
        Self {
            step_adj: self.step_adj / 2.0,
            max_iter: self.max_iter.saturating_mul(2),
            tolerance: self.tolerance,
        }
    }
}

/// Method parameters handed to an [`EffectEstimator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodParams {
    /// How-factor values keyed by factor name.
    pub how: BTreeMap<String, String>,
    /// Convergence controls.
    #[serde(default)]
    pub control: FitControl,
}

impl MethodParams {
    /// Parameters with default controls.
    pub fn new(how: BTreeMap<String, String>) -> Self {
        Self {
            how,
            control: FitControl::default(),
        }
    }

    /// Value of the named how-factor, if configured.
    pub fn get(&self, factor: &str) -> Option<&str> {
        self.how.get(factor).map(String::as_str)
    }
}

/// Scale an estimate was computed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectScale {
    /// Fisher z; mapped back with `tanh`.
    Z,
    /// Correlation, the canonical reporting scale.
    R,
}

impl EffectScale {
    /// Maps a value on this scale onto the canonical scale.
    pub fn to_canonical(self, value: f64) -> f64 {
        match self {
            EffectScale::Z => value.tanh(),
            EffectScale::R => value,
        }
    }
}

/// Summary effect with its 95% interval and p-value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    /// Summary effect.
    pub mean: f64,
    /// Lower confidence bound.
    pub lb: f64,
    /// Upper confidence bound.
    pub ub: f64,
    /// p-value of the test against zero.
    pub p: f64,
}

/// Estimator output together with the scale it was computed on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fit {
    /// Estimate on `scale`.
    pub estimate: Estimate,
    /// Native scale of `estimate`.
    pub scale: EffectScale,
}

impl Fit {
    /// Returns the estimate on the canonical scale. The p-value is scale free.
    pub fn canonical(&self) -> Estimate {
        let Estimate { mean, lb, ub, p } = self.estimate;
        Estimate {
            mean: self.scale.to_canonical(mean),
            lb: self.scale.to_canonical(lb),
            ub: self.scale.to_canonical(ub),
            p,
        }
    }
}

/// Failure modes of an estimator call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EstimateError {
    /// A how-factor value the estimator does not implement.
    #[error("unsupported value `{value}` for estimator role `{role}`")]
    Unsupported {
        /// Role (factor name) carrying the value.
        role: String,
        /// Offending value.
        value: String,
    },
    /// Inputs cannot support the requested model.
    #[error("degenerate input: {0}")]
    Degenerate(String),
    /// Iterative estimation ran out of iterations.
    #[error("no convergence after {iterations} iterations")]
    NonConvergence {
        /// Iterations spent.
        iterations: usize,
    },
}

impl EstimateError {
    /// Fatal errors indicate configuration and estimator are out of sync.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EstimateError::Unsupported { .. })
    }

    /// Transient errors may succeed with relaxed controls.
    pub fn is_transient(&self) -> bool {
        matches!(self, EstimateError::NonConvergence { .. })
    }

    fn code(&self) -> &'static str {
        match self {
            EstimateError::Unsupported { .. } => "unsupported_method",
            EstimateError::Degenerate(_) => "degenerate_input",
            EstimateError::NonConvergence { .. } => "non_convergence",
        }
    }
}

impl From<EstimateError> for MverseError {
    fn from(err: EstimateError) -> Self {
        let mut info = ErrorInfo::new(err.code(), err.to_string());
        if err.is_fatal() {
            info = info.with_hint("factor configuration and estimator are out of sync");
        }
        MverseError::Estimate(info)
    }
}

/// Stateless summary-effect estimator.
///
/// Implementations must not depend on call order; the pipeline calls them
/// concurrently from several threads.
pub trait EffectEstimator: Send + Sync {
    /// Fits the summary effect of `rows` under `params`.
    fn estimate(&self, rows: &[&EffectRow], params: &MethodParams) -> Result<Fit, EstimateError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pooling {
    Fixed,
    DerSimonianLaird,
    Reml,
    Ml,
    Unweighted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TestKind {
    Z,
    T,
}

/// Reference meta-analytic estimator.
///
/// Two-level models pool independent effects. Three-level models add a
/// between-cluster variance component on top of the within-cluster one,
/// grouping rows by [`EffectRow::cluster_id`].
#[derive(Debug, Clone, Default)]
pub struct MetaEstimator {
    roles: MethodRoles,
    level: ModelLevel,
}

impl MetaEstimator {
    /// Two-level estimator reading its choices from the given roles.
    pub fn new(roles: MethodRoles) -> Self {
        Self {
            roles,
            level: ModelLevel::Two,
        }
    }

    /// Estimator matching the configured roles and model level.
    pub fn from_config(config: &MultiverseConfig) -> Self {
        Self::new(config.methods.clone()).with_level(config.level)
    }

    /// Switches the model level.
    pub fn with_level(mut self, level: ModelLevel) -> Self {
        self.level = level;
        self
    }

    fn resolve(
        &self,
        params: &MethodParams,
    ) -> Result<(EffectScale, Pooling, TestKind), EstimateError> {
        let unsupported = |role: &str, value: &str| EstimateError::Unsupported {
            role: role.to_string(),
            value: value.to_string(),
        };
        let scale = match params.get(&self.roles.effect) {
            None | Some("z") => EffectScale::Z,
            Some("r") => EffectScale::R,
            Some(other) => return Err(unsupported(&self.roles.effect, other)),
        };
        let pooling = match (self.level, params.get(&self.roles.method)) {
            (ModelLevel::Two, None | Some("FE")) => Pooling::Fixed,
            (ModelLevel::Two, Some("RE_DL") | Some("DL")) => Pooling::DerSimonianLaird,
            (ModelLevel::Two, Some("unweighted")) => Pooling::Unweighted,
            (ModelLevel::Three, None) | (_, Some("REML")) => Pooling::Reml,
            (_, Some("ML")) => Pooling::Ml,
            (_, Some(other)) => return Err(unsupported(&self.roles.method, other)),
        };
        let test = match params.get(&self.roles.test) {
            None => TestKind::Z,
            Some(value) if value.starts_with('z') => TestKind::Z,
            Some(value) if value.starts_with('t') => TestKind::T,
            Some(other) => return Err(unsupported(&self.roles.test, other)),
        };
        Ok((scale, pooling, test))
    }
}

impl EffectEstimator for MetaEstimator {
    fn estimate(&self, rows: &[&EffectRow], params: &MethodParams) -> Result<Fit, EstimateError> {
        let (scale, pooling, test) = self.resolve(params)?;
        let (y, v): (Vec<f64>, Vec<f64>) = rows
            .iter()
            .map(|row| match scale {
                EffectScale::Z => (row.effect.z, row.effect.z_se * row.effect.z_se),
                EffectScale::R => (row.effect.r, row.effect.r_se * row.effect.r_se),
            })
            .unzip();
        let estimate = match self.level {
            ModelLevel::Two => fit_two_level(&y, &v, pooling, test, &params.control)?,
            ModelLevel::Three => {
                let clusters: Vec<u64> = rows.iter().map(|row| row.cluster_id).collect();
                let restricted = pooling == Pooling::Reml;
                fit_three_level(&y, &v, &clusters, restricted, test, &params.control)?
            }
        };
        Ok(Fit { estimate, scale })
    }
}

fn check_inputs(y: &[f64], v: &[f64]) -> Result<(), EstimateError> {
    if y.is_empty() {
        return Err(EstimateError::Degenerate("no rows".to_string()));
    }
    if y.iter().any(|value| !value.is_finite()) {
        return Err(EstimateError::Degenerate("non-finite effect".to_string()));
    }
    if v.iter().any(|value| !(value.is_finite() && *value > 0.0)) {
        return Err(EstimateError::Degenerate(
            "non-positive sampling variance".to_string(),
        ));
    }
    Ok(())
}

fn fit_two_level(
    y: &[f64],
    v: &[f64],
    pooling: Pooling,
    test: TestKind,
    control: &FitControl,
) -> Result<Estimate, EstimateError> {
    check_inputs(y, v)?;
    let (mean, variance) = match pooling {
        Pooling::Fixed => weighted(y, v, 0.0),
        Pooling::DerSimonianLaird => weighted(y, v, dl_tau2(y, v)),
        Pooling::Reml => weighted(y, v, scoring_tau2(y, v, true, control)?),
        Pooling::Ml => weighted(y, v, scoring_tau2(y, v, false, control)?),
        Pooling::Unweighted => {
            let kf = y.len() as f64;
            (y.iter().sum::<f64>() / kf, v.iter().sum::<f64>() / (kf * kf))
        }
    };
    interval(mean, variance, y.len(), test)
}

/// Summary effect of a three-level model with random effects for clusters
/// and for effects within clusters.
fn fit_three_level(
    y: &[f64],
    v: &[f64],
    clusters: &[u64],
    restricted: bool,
    test: TestKind,
    control: &FitControl,
) -> Result<Estimate, EstimateError> {
    check_inputs(y, v)?;
    let groups = group_rows(clusters);
    if groups.len() == 1 || groups.iter().all(|rows| rows.len() == 1) {
        // one cluster, or singleton clusters: only the total variance is identified
        let tau2 = scoring_tau2(y, v, restricted, control)?;
        let (mean, variance) = weighted(y, v, tau2);
        return interval(mean, variance, y.len(), test);
    }
    let (sigma2_c, sigma2_e) = scoring_components(y, v, &groups, restricted, control)?;
    let (mean, variance) = nested_gls(y, v, &groups, sigma2_c, sigma2_e);
    interval(mean, variance, y.len(), test)
}

fn interval(mean: f64, variance: f64, k: usize, test: TestKind) -> Result<Estimate, EstimateError> {
    let se = variance.sqrt();
    if !(se.is_finite() && se > 0.0) {
        return Err(EstimateError::Degenerate(
            "non-positive standard error".to_string(),
        ));
    }

    let stat = mean / se;
    let (crit, p) = match test {
        TestKind::Z => {
            let normal =
                Normal::new(0.0, 1.0).map_err(|err| EstimateError::Degenerate(err.to_string()))?;
            (normal.inverse_cdf(0.975), 2.0 * normal.cdf(-stat.abs()))
        }
        TestKind::T => {
            if k < 2 {
                return Err(EstimateError::Degenerate(
                    "t test needs at least two rows".to_string(),
                ));
            }
            let dist = StudentsT::new(0.0, 1.0, (k - 1) as f64)
                .map_err(|err| EstimateError::Degenerate(err.to_string()))?;
            (dist.inverse_cdf(0.975), 2.0 * dist.cdf(-stat.abs()))
        }
    };
    Ok(Estimate {
        mean,
        lb: mean - crit * se,
        ub: mean + crit * se,
        p,
    })
}

fn weighted(y: &[f64], v: &[f64], tau2: f64) -> (f64, f64) {
    let mut sum_w = 0.0;
    let mut sum_wy = 0.0;
    for (yi, vi) in y.iter().zip(v) {
        let w = 1.0 / (vi + tau2);
        sum_w += w;
        sum_wy += w * yi;
    }
    (sum_wy / sum_w, 1.0 / sum_w)
}

fn dl_tau2(y: &[f64], v: &[f64]) -> f64 {
    let k = y.len();
    if k < 2 {
        return 0.0;
    }
    let (mu, _) = weighted(y, v, 0.0);
    let mut q = 0.0;
    let mut sum_w = 0.0;
    let mut sum_w2 = 0.0;
    for (yi, vi) in y.iter().zip(v) {
        let w = 1.0 / vi;
        q += w * (yi - mu).powi(2);
        sum_w += w;
        sum_w2 += w * w;
    }
    let c = sum_w - sum_w2 / sum_w;
    if c <= 0.0 {
        return 0.0;
    }
    ((q - (k as f64 - 1.0)) / c).max(0.0)
}

/// Fisher scoring for the (restricted) maximum likelihood heterogeneity,
/// started from the DerSimonian-Laird estimate and truncated at zero.
fn scoring_tau2(
    y: &[f64],
    v: &[f64],
    restricted: bool,
    control: &FitControl,
) -> Result<f64, EstimateError> {
    if y.len() < 2 {
        return Ok(0.0);
    }
    let mut tau2 = dl_tau2(y, v);
    for _ in 0..control.max_iter {
        let (mu, _) = weighted(y, v, tau2);
        let (mut sw, mut sw2, mut sw3, mut resid) = (0.0, 0.0, 0.0, 0.0);
        for (yi, vi) in y.iter().zip(v) {
            let w = 1.0 / (vi + tau2);
            sw += w;
            sw2 += w * w;
            sw3 += w * w * w;
            resid += w * w * (yi - mu).powi(2);
        }
        let (score, info) = if restricted {
            let trace_p = sw - sw2 / sw;
            let trace_pp = sw2 - 2.0 * sw3 / sw + (sw2 * sw2) / (sw * sw);
            (0.5 * (resid - trace_p), 0.5 * trace_pp)
        } else {
            (0.5 * (resid - sw), 0.5 * sw2)
        };
        if !(info.is_finite() && info > 0.0) {
            return Err(EstimateError::Degenerate("singular information".to_string()));
        }
        let next = (tau2 + control.step_adj * score / info).max(0.0);
        if (next - tau2).abs() < control.tolerance {
            return Ok(next);
        }
        tau2 = next;
    }
    Err(EstimateError::NonConvergence {
        iterations: control.max_iter,
    })
}

/// Row positions per cluster, clusters in ascending id order.
fn group_rows(clusters: &[u64]) -> Vec<Vec<usize>> {
    let mut groups: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
    for (pos, cluster) in clusters.iter().enumerate() {
        groups.entry(*cluster).or_default().push(pos);
    }
    groups.into_values().collect()
}

/// Sums over one cluster of the marginal precision
/// `W = (D + σ²_c 11ᵀ)⁻¹` with `D = diag(v_i + σ²_e)`.
///
/// Sherman-Morrison gives `W = D⁻¹ - c D⁻¹11ᵀD⁻¹` with
/// `c = σ²_c / (1 + σ²_c s1)`, so every quantity the scoring step needs
/// reduces to the power sums `s1..s3` of `1/d_i`.
struct ClusterBlock {
    c: f64,
    g: f64,
    s1: f64,
    s2: f64,
    s3: f64,
    sy: f64,
}

impl ClusterBlock {
    fn new(y: &[f64], v: &[f64], rows: &[usize], sigma2_c: f64, sigma2_e: f64) -> Self {
        let (mut s1, mut s2, mut s3, mut sy) = (0.0, 0.0, 0.0, 0.0);
        for &row in rows {
            let inv = 1.0 / (v[row] + sigma2_e);
            s1 += inv;
            s2 += inv * inv;
            s3 += inv * inv * inv;
            sy += inv * y[row];
        }
        let g = 1.0 / (1.0 + sigma2_c * s1);
        Self {
            c: sigma2_c * g,
            g,
            s1,
            s2,
            s3,
            sy,
        }
    }

    /// `1ᵀ W 1`.
    fn total_weight(&self) -> f64 {
        self.g * self.s1
    }
}

fn nested_gls(
    y: &[f64],
    v: &[f64],
    groups: &[Vec<usize>],
    sigma2_c: f64,
    sigma2_e: f64,
) -> (f64, f64) {
    let mut weight = 0.0;
    let mut weighted_y = 0.0;
    for rows in groups {
        let block = ClusterBlock::new(y, v, rows, sigma2_c, sigma2_e);
        weight += block.total_weight();
        weighted_y += block.g * block.sy;
    }
    (weighted_y / weight, 1.0 / weight)
}

/// Fisher scoring for the cluster and within-cluster variance components
/// `(σ²_c, σ²_e)`, each truncated at zero. Returns `(σ²_c, σ²_e)`.
fn scoring_components(
    y: &[f64],
    v: &[f64],
    groups: &[Vec<usize>],
    restricted: bool,
    control: &FitControl,
) -> Result<(f64, f64), EstimateError> {
    let start = dl_tau2(y, v) / 2.0;
    let (mut sigma2_c, mut sigma2_e) = (start, start);
    for _ in 0..control.max_iter {
        let (mu, _) = nested_gls(y, v, groups, sigma2_c, sigma2_e);

        // trace sums of W against V_c = blockdiag(11ᵀ) and V_e = I
        let (mut tr_e, mut tr_c) = (0.0, 0.0);
        let (mut f_ee, mut f_cc, mut f_ce) = (0.0, 0.0, 0.0);
        // quadratic forms of q = W (y - mu)
        let (mut quad_e, mut quad_c) = (0.0, 0.0);
        // projections on a = W 1, needed for the restricted likelihood
        let (mut total, mut a_e_a, mut a_ewe_a, mut a_cwc_a, mut a_ewc_a) =
            (0.0, 0.0, 0.0, 0.0, 0.0);

        for rows in groups {
            let block = ClusterBlock::new(y, v, rows, sigma2_c, sigma2_e);
            let ClusterBlock {
                c,
                g,
                s1,
                s2,
                s3,
                sy,
            } = block;
            let s_j = g * s1;
            let a_norm = g * g * s2;
            tr_e += s1 - c * s2;
            tr_c += s_j;
            f_ee += s2 - 2.0 * c * s3 + c * c * s2 * s2;
            f_cc += s_j * s_j;
            f_ce += a_norm;

            let resid_sum = sy - mu * s1;
            for &row in rows {
                let q = (y[row] - mu - c * resid_sum) / (v[row] + sigma2_e);
                quad_e += q * q;
            }
            quad_c += (g * resid_sum).powi(2);

            total += s_j;
            a_e_a += a_norm;
            a_ewe_a += g * g * (s3 - c * s2 * s2);
            a_cwc_a += s_j * s_j * s_j;
            a_ewc_a += s_j * a_norm;
        }

        let (trace_e, trace_c, info_ee, info_cc, info_ce) = if restricted {
            let a_c_a = f_cc;
            (
                tr_e - a_e_a / total,
                tr_c - a_c_a / total,
                f_ee - 2.0 * a_ewe_a / total + a_e_a * a_e_a / (total * total),
                f_cc - 2.0 * a_cwc_a / total + a_c_a * a_c_a / (total * total),
                f_ce - 2.0 * a_ewc_a / total + a_e_a * a_c_a / (total * total),
            )
        } else {
            (tr_e, tr_c, f_ee, f_cc, f_ce)
        };
        let score_c = 0.5 * (quad_c - trace_c);
        let score_e = 0.5 * (quad_e - trace_e);
        let (info_cc, info_ee, info_ce) = (0.5 * info_cc, 0.5 * info_ee, 0.5 * info_ce);

        let diagonal = |score: f64, info: f64| {
            if info.is_finite() && info > 0.0 {
                score / info
            } else {
                0.0
            }
        };
        let det = info_cc * info_ee - info_ce * info_ce;
        let (mut step_c, mut step_e) = if det.is_finite() && det > 1e-12 * info_cc * info_ee {
            (
                (info_ee * score_c - info_ce * score_e) / det,
                (info_cc * score_e - info_ce * score_c) / det,
            )
        } else {
            // one component is not identified; move the other alone
            (diagonal(score_c, info_cc), diagonal(score_e, info_ee))
        };
        // a component held at zero drops out of the joint step
        if sigma2_c <= 0.0 && step_c < 0.0 {
            step_c = 0.0;
            step_e = diagonal(score_e, info_ee);
        } else if sigma2_e <= 0.0 && step_e < 0.0 {
            step_e = 0.0;
            step_c = diagonal(score_c, info_cc);
        }
        if !(step_c.is_finite() && step_e.is_finite()) {
            return Err(EstimateError::Degenerate("singular information".to_string()));
        }

        let next_c = (sigma2_c + control.step_adj * step_c).max(0.0);
        let next_e = (sigma2_e + control.step_adj * step_e).max(0.0);
        let converged = (next_c - sigma2_c).abs() < control.tolerance
            && (next_e - sigma2_e).abs() < control.tolerance;
        sigma2_c = next_c;
        sigma2_e = next_e;
        if converged {
            return Ok((sigma2_c, sigma2_e));
        }
    }
    Err(EstimateError::NonConvergence {
        iterations: control.max_iter,
    })
}

#[cfg(test)]
mod tests {
    use mverse_core::EffectSizes;

    use super::*;

    fn params(pairs: &[(&str, &str)]) -> MethodParams {
        MethodParams::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn rows(effects: &[(u64, f64)]) -> Vec<EffectRow> {
        effects
            .iter()
            .enumerate()
            .map(|(idx, (cluster_id, z))| EffectRow {
                row_id: idx as u64 + 1,
                cluster_id: *cluster_id,
                cluster: format!("C{cluster_id}"),
                n: None,
                effect: EffectSizes::from_z(*z, 0.1),
                categories: BTreeMap::new(),
            })
            .collect()
    }

    fn fit(level: ModelLevel, rows: &[EffectRow], how: &[(&str, &str)]) -> Estimate {
        let refs: Vec<&EffectRow> = rows.iter().collect();
        MetaEstimator::default()
            .with_level(level)
            .estimate(&refs, &params(how))
            .unwrap()
            .canonical()
    }

    /// Effects cluster tightly within four clusters whose means spread widely.
    const NESTED: [(u64, f64); 11] = [
        (1, 0.50),
        (1, 0.52),
        (1, 0.48),
        (2, -0.30),
        (2, -0.28),
        (2, -0.32),
        (3, 0.10),
        (3, 0.12),
        (3, 0.08),
        (4, 0.90),
        (4, 0.88),
    ];

    #[test]
    fn fixed_effect_matches_inverse_variance_mean() {
        let control = FitControl::default();
        let est = fit_two_level(&[0.1, 0.3], &[0.01, 0.04], Pooling::Fixed, TestKind::Z, &control)
            .unwrap();
        // weights 100 and 25
        assert!((est.mean - (10.0 + 7.5) / 125.0).abs() < 1e-12);
        let se = (1.0f64 / 125.0).sqrt();
        assert!((est.ub - est.mean - 1.959964 * se).abs() < 1e-5);
        // z = 0.14 / 0.0894 = 1.565
        assert!(est.p > 0.11 && est.p < 0.125);
    }

    #[test]
    fn homogeneous_data_has_zero_heterogeneity() {
        let y = [0.2, 0.2, 0.2];
        let v = [0.01, 0.02, 0.03];
        assert_eq!(dl_tau2(&y, &v), 0.0);
        assert_eq!(
            scoring_tau2(&y, &v, true, &FitControl::default()).unwrap(),
            0.0
        );
    }

    #[test]
    fn heterogeneous_data_widens_random_effects_interval() {
        let y = [-0.4, 0.1, 0.5, 0.9];
        let v = [0.01; 4];
        let control = FitControl::default();
        let fe = fit_two_level(&y, &v, Pooling::Fixed, TestKind::Z, &control).unwrap();
        let dl = fit_two_level(&y, &v, Pooling::DerSimonianLaird, TestKind::Z, &control).unwrap();
        let reml = fit_two_level(&y, &v, Pooling::Reml, TestKind::T, &control).unwrap();
        assert!(dl.ub - dl.lb > fe.ub - fe.lb);
        assert!(reml.ub - reml.lb > fe.ub - fe.lb);
        // equal variances give equal weights, so every method agrees on the mean
        assert!((dl.mean - fe.mean).abs() < 1e-12);
        assert!((reml.mean - fe.mean).abs() < 1e-9);
    }

    #[test]
    fn zero_iterations_report_non_convergence() {
        let control = FitControl {
            max_iter: 0,
            ..FitControl::default()
        };
        let err = scoring_tau2(&[0.0, 1.0], &[0.01, 0.01], true, &control).unwrap_err();
        assert!(err.is_transient());
        let groups = group_rows(&[1, 1, 2, 2]);
        let err = scoring_components(&[0.0, 0.1, 1.0, 1.1], &[0.01; 4], &groups, true, &control)
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(FitControl::default().relaxed().max_iter, 4000);
        assert_eq!(FitControl::default().relaxed().step_adj, 0.25);
    }

    #[test]
    fn unknown_method_is_unsupported() {
        let estimator = MetaEstimator::default();
        let err = estimator
            .resolve(&params(&[("ma_method", "bayes")]))
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(MverseError::from(err).info().code, "unsupported_method");
        assert!(estimator
            .resolve(&params(&[("effect", "r"), ("test", "t")]))
            .is_ok());
    }

    #[test]
    fn three_level_models_only_pool_by_likelihood() {
        let estimator = MetaEstimator::default().with_level(ModelLevel::Three);
        for method in ["FE", "RE_DL", "unweighted"] {
            let err = estimator
                .resolve(&params(&[("ma_method", method)]))
                .unwrap_err();
            assert!(err.is_fatal(), "{method} should be rejected");
        }
        let (_, pooling, test) = estimator
            .resolve(&params(&[("ma_method", "ML"), ("test", "t")]))
            .unwrap();
        assert_eq!(pooling, Pooling::Ml);
        assert_eq!(test, TestKind::T);
        let (_, pooling, _) = estimator.resolve(&params(&[])).unwrap();
        assert_eq!(pooling, Pooling::Reml);
    }

    #[test]
    fn singleton_clusters_reduce_to_two_levels() {
        let data = rows(&[(1, -0.4), (2, 0.1), (3, 0.5), (4, 0.9), (5, 0.3)]);
        for method in ["REML", "ML"] {
            for test in ["z", "t"] {
                let how = [("ma_method", method), ("test", test)];
                let two = fit(ModelLevel::Two, &data, &how);
                let three = fit(ModelLevel::Three, &data, &how);
                assert_eq!(two, three, "{method}/{test}");
            }
        }
    }

    #[test]
    fn nested_effects_shift_and_widen_the_summary() {
        let data = rows(&NESTED);
        let how = [("ma_method", "REML"), ("test", "z")];
        let two = fit(ModelLevel::Two, &data, &how);
        let three = fit(ModelLevel::Three, &data, &how);
        assert!((two.mean - three.mean).abs() > 1e-3);
        // four independent clusters carry less information than eleven effects
        assert!(three.ub - three.lb > two.ub - two.lb);
        assert!(three.lb <= three.mean && three.mean <= three.ub);
    }

    #[test]
    fn variance_components_separate_cluster_and_effect_spread() {
        let y: Vec<f64> = NESTED.iter().map(|(_, z)| *z).collect();
        let clusters: Vec<u64> = NESTED.iter().map(|(c, _)| *c).collect();
        let v = vec![0.01; y.len()];
        let groups = group_rows(&clusters);
        let control = FitControl::default();

        let (reml_c, reml_e) = scoring_components(&y, &v, &groups, true, &control).unwrap();
        let (ml_c, ml_e) = scoring_components(&y, &v, &groups, false, &control).unwrap();
        // within-cluster spread is far below the sampling variance
        assert!(reml_e < 0.005, "sigma2_e = {reml_e}");
        assert!(ml_e < 0.005, "sigma2_e = {ml_e}");
        assert!(reml_c > 0.1, "sigma2_c = {reml_c}");
        // ML ignores the degree of freedom spent on the mean
        assert!(ml_c < reml_c);
    }

    #[test]
    fn z_scale_is_mapped_back_with_tanh() {
        let fit = Fit {
            estimate: Estimate {
                mean: 0.5,
                lb: 0.1,
                ub: 0.9,
                p: 0.01,
            },
            scale: EffectScale::Z,
        };
        let canonical = fit.canonical();
        assert!((canonical.mean - 0.5f64.tanh()).abs() < 1e-15);
        assert_eq!(canonical.p, 0.01);
    }
}
