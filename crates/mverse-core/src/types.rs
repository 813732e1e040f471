use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorInfo, MverseError};
use crate::rng::RngHandle;

/// Canonical set of integer identifiers: sorted ascending, no duplicates.
///
/// The comma-joined rendering is the content-addressable key used for
/// deduplication and persisted in the `set`/`set_es` table columns.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct IdSet(Vec<u64>);

impl IdSet {
    /// Builds a canonical set from arbitrary identifiers.
    pub fn from_ids<I: IntoIterator<Item = u64>>(ids: I) -> Self {
        let mut ids: Vec<u64> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self(ids)
    }

    /// Number of identifiers in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when the set holds no identifiers.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Membership test.
    pub fn contains(&self, id: u64) -> bool {
        self.0.binary_search(&id).is_ok()
    }

    /// Iterates over the identifiers in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.0.iter().copied()
    }
}

impl fmt::Display for IdSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, id) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{id}")?;
        }
        Ok(())
    }
}

impl FromStr for IdSet {
    type Err = MverseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        let ids = trimmed
            .split(',')
            .map(|part| {
                part.trim().parse::<u64>().map_err(|err| {
                    MverseError::Serde(
                        ErrorInfo::new("id_set_parse", err.to_string())
                            .with_context("field", trimmed),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_ids(ids))
    }
}

impl From<IdSet> for String {
    fn from(value: IdSet) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for IdSet {
    type Error = MverseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Effect size of one row on both supported scales.
///
/// `z` is the Fisher-transformed correlation and `r` the correlation itself;
/// each carries its own standard error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectSizes {
    /// Fisher z effect.
    pub z: f64,
    /// Standard error on the z scale.
    pub z_se: f64,
    /// Correlation effect.
    pub r: f64,
    /// Standard error on the r scale.
    pub r_se: f64,
}

impl EffectSizes {
    /// Derives both scales from a Fisher z effect.
    pub fn from_z(z: f64, z_se: f64) -> Self {
        let r = z.tanh();
        Self {
            z,
            z_se,
            r,
            r_se: (1.0 - r * r) * z_se,
        }
    }

    /// Derives both scales from a correlation effect.
    pub fn from_r(r: f64, r_se: f64) -> Self {
        Self {
            z: r.atanh(),
            z_se: r_se / (1.0 - r * r),
            r,
            r_se,
        }
    }

    /// Draws an effect from the null world `z ~ N(0, z_se²)`, keeping the
    /// precision structure and propagating it to the r scale.
    pub fn null_draw(z_se: f64, rng: &mut RngHandle) -> Result<Self, MverseError> {
        let z = rng.gaussian(0.0, z_se)?;
        Ok(Self::from_z(z, z_se))
    }
}

/// One elementary observation of the meta-analytic dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectRow {
    /// Unique row (effect) identifier.
    pub row_id: u64,
    /// Identifier of the cluster (study) the row belongs to.
    pub cluster_id: u64,
    /// Display label of the cluster.
    pub cluster: String,
    /// Sample size behind the effect, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u64>,
    /// Effect size and its standard error on both scales.
    pub effect: EffectSizes,
    /// Category value per which-factor name.
    #[serde(default)]
    pub categories: BTreeMap<String, String>,
}

impl EffectRow {
    /// Standard error used for the null draw: `1/sqrt(n)` when the sample
    /// size is known, otherwise the recorded z-scale error.
    pub fn null_se(&self) -> f64 {
        match self.n {
            Some(n) if n > 0 => 1.0 / (n as f64).sqrt(),
            _ => self.effect.z_se,
        }
    }

    /// Category value recorded for the named factor.
    pub fn category(&self, factor: &str) -> Option<&str> {
        self.categories.get(factor).map(String::as_str)
    }
}

/// Canonical tabular dataset, one [`EffectRow`] per effect.
#[derive(Debug, Clone, PartialEq)]
pub struct RowDataset {
    rows: Vec<EffectRow>,
    by_row_id: BTreeMap<u64, usize>,
}

impl RowDataset {
    /// Wraps the rows, rejecting empty inputs and duplicate row identifiers.
    pub fn new(rows: Vec<EffectRow>) -> Result<Self, MverseError> {
        if rows.is_empty() {
            return Err(MverseError::dataset("dataset_empty", "dataset has no rows"));
        }
        let mut by_row_id = BTreeMap::new();
        for (idx, row) in rows.iter().enumerate() {
            if by_row_id.insert(row.row_id, idx).is_some() {
                return Err(MverseError::Dataset(
                    ErrorInfo::new("duplicate_row_id", "row identifiers must be unique")
                        .with_context("row_id", row.row_id),
                ));
            }
        }
        Ok(Self { rows, by_row_id })
    }

    /// All rows in dataset order.
    pub fn rows(&self) -> &[EffectRow] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Always false for a constructed dataset; provided for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Looks up a row by its identifier.
    pub fn row(&self, row_id: u64) -> Option<&EffectRow> {
        self.by_row_id.get(&row_id).map(|&idx| &self.rows[idx])
    }

    /// Resolves every identifier of `ids` to its row.
    pub fn select(&self, ids: &IdSet) -> Result<Vec<&EffectRow>, MverseError> {
        ids.iter()
            .map(|id| {
                self.row(id).ok_or_else(|| {
                    MverseError::Dataset(
                        ErrorInfo::new("unknown_row_id", "row id not present in dataset")
                            .with_context("row_id", id),
                    )
                })
            })
            .collect()
    }

    /// Sorted, deduplicated cluster identifiers of the whole dataset.
    pub fn cluster_ids(&self) -> IdSet {
        IdSet::from_ids(self.rows.iter().map(|row| row.cluster_id))
    }

    /// Total row count per cluster identifier.
    pub fn cluster_sizes(&self) -> BTreeMap<u64, usize> {
        let mut sizes = BTreeMap::new();
        for row in &self.rows {
            *sizes.entry(row.cluster_id).or_insert(0) += 1;
        }
        sizes
    }

    /// Display label per cluster identifier, taken from its first row.
    pub fn cluster_labels(&self) -> BTreeMap<u64, String> {
        let mut labels = BTreeMap::new();
        for row in &self.rows {
            labels
                .entry(row.cluster_id)
                .or_insert_with(|| row.cluster.clone());
        }
        labels
    }

    /// Returns a copy of the dataset whose effects are redrawn under the
    /// null hypothesis (true effect zero, same per-row precision).
    pub fn null_resample(&self, rng: &mut RngHandle) -> Result<RowDataset, MverseError> {
        let mut rows = self.rows.clone();
        for row in rows.iter_mut() {
            row.effect = EffectSizes::null_draw(row.null_se(), rng)?;
        }
        Ok(RowDataset {
            rows,
            by_row_id: self.by_row_id.clone(),
        })
    }
}
