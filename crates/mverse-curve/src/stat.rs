use serde::{Deserialize, Serialize};

use crate::build::SpecTable;

/// Deterministic histogram descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// Bin edges (inclusive of the left edge, exclusive of the right edge except the last bin).
    pub edges: Vec<f64>,
    /// Counts recorded per bin.
    pub counts: Vec<u64>,
}

impl Histogram {
    /// Total number of recorded values.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// Bins `values` into `bins` equal-width bins over `[start, end]`.
/// Values outside the range are clamped into the first or last bin.
pub fn histogram<I>(values: I, start: f64, end: f64, bins: usize) -> Histogram
where
    I: IntoIterator<Item = f64>,
{
    let bins = bins.max(1);
    let step = (end - start) / bins as f64;
    let edges = (0..=bins).map(|idx| start + idx as f64 * step).collect();
    let mut counts = vec![0u64; bins];
    for value in values {
        let bin = ((value - start) / step).floor();
        let bin = if bin.is_nan() || bin < 0.0 {
            0
        } else {
            (bin as usize).min(bins - 1)
        };
        counts[bin] += 1;
    }
    Histogram { edges, counts }
}

/// Distribution of p-values over `[0, 1]`.
pub fn p_value_histogram(table: &SpecTable, bins: usize) -> Histogram {
    histogram(table.iter().map(|spec| spec.p), 0.0, 1.0, bins)
}

/// Percentile of ascending `values` with linear interpolation between
/// order statistics. `quantile` is in `[0, 1]`; empty input yields NaN.
pub fn percentile(values: &[f64], quantile: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let position = quantile.clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    if lower == upper {
        values[lower]
    } else {
        let weight = position - lower as f64;
        values[lower] * (1.0 - weight) + values[upper] * weight
    }
}

/// Percentage `part / whole` in `[0, 100]`, zero when `whole` is zero.
pub fn share(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&values, 0.5), 3.0);
        assert!((percentile(&values, 0.025) - 1.1).abs() < 1e-12);
        assert!((percentile(&values, 0.975) - 4.9).abs() < 1e-12);
        assert!(percentile(&[], 0.5).is_nan());
        assert_eq!(percentile(&[7.0], 0.975), 7.0);
    }

    #[test]
    fn histogram_clamps_edges() {
        let hist = histogram([0.0, 0.5, 1.0, 2.0, -1.0], 0.0, 1.0, 4);
        assert_eq!(hist.edges.len(), 5);
        assert_eq!(hist.counts, vec![2, 0, 1, 2]);
        assert_eq!(hist.total(), 5);
    }

    #[test]
    fn share_guards_zero() {
        assert_eq!(share(3, 0), 0.0);
        assert_eq!(share(1, 4), 25.0);
    }
}
