use std::collections::BTreeMap;

use mverse_core::errors::{ErrorInfo, MverseError};
use mverse_core::RowDataset;
use serde::{Deserialize, Serialize};

use crate::build::{SpecTable, Specification};
use crate::config::MultiverseConfig;

/// Factor-fill matrix: per rank, `k` in every label slot the specification
/// used and `0` elsewhere. Slots run over (factor, value) pairs in reversed
/// which-then-how order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpecFill {
    /// Display label per slot.
    pub labels: Vec<String>,
    /// Fill row per rank key.
    pub rows: BTreeMap<String, Vec<usize>>,
}

/// Cluster-fill matrix: per rank, the percentage of each cluster's rows the
/// specification includes. Slots run over clusters in reversed id order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClusterFill {
    /// Cluster identifiers, ascending.
    pub cluster_ids: Vec<u64>,
    /// Cluster display labels, ascending by id.
    pub labels: Vec<String>,
    /// Fill row per rank key.
    pub rows: BTreeMap<String, Vec<f64>>,
}

/// Both fill matrices of a specification table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FillMatrices {
    /// Factor-value fill.
    pub spec_fill: SpecFill,
    /// Cluster fill.
    pub cluster_fill: ClusterFill,
}

fn rank_key(rank: usize) -> String {
    rank.to_string()
}

fn mismatch(table_names: &[String], config_names: &[String]) -> MverseError {
    MverseError::Config(
        ErrorInfo::new("table_config_mismatch", "table columns do not match the configured factors")
            .with_context("table", table_names.join(","))
            .with_context("config", config_names.join(",")),
    )
}

impl FillMatrices {
    /// Builds both matrices for every specification of `table`.
    pub fn build(
        config: &MultiverseConfig,
        table: &SpecTable,
        dataset: &RowDataset,
    ) -> Result<Self, MverseError> {
        let names = table.factor_names();
        let config_names = config.factor_names();
        if names != config_names {
            return Err(mismatch(&names, &config_names));
        }

        // (column, value) per slot, already in rendering order
        let mut slots: Vec<(usize, &str, &str)> = config
            .factors()
            .enumerate()
            .flat_map(|(col, factor)| {
                factor
                    .values
                    .iter()
                    .map(move |v| (col, v.value.as_str(), v.label.as_str()))
            })
            .collect();
        slots.reverse();

        let sizes = dataset.cluster_sizes();
        let labels_by_id = dataset.cluster_labels();
        let cluster_ids: Vec<u64> = sizes.keys().copied().collect();

        let mut spec_rows = BTreeMap::new();
        let mut cluster_rows = BTreeMap::new();
        for spec in table.iter() {
            let fill = slots
                .iter()
                .map(|(col, value, _)| {
                    if spec.factors.get(*col).map(String::as_str) == Some(*value) {
                        spec.k
                    } else {
                        0
                    }
                })
                .collect();
            spec_rows.insert(rank_key(spec.rank), fill);
            cluster_rows.insert(rank_key(spec.rank), cluster_row(spec, dataset, &sizes)?);
        }

        Ok(Self {
            spec_fill: SpecFill {
                labels: slots.iter().map(|(_, _, label)| label.to_string()).collect(),
                rows: spec_rows,
            },
            cluster_fill: ClusterFill {
                labels: cluster_ids
                    .iter()
                    .map(|id| labels_by_id.get(id).cloned().unwrap_or_default())
                    .collect(),
                cluster_ids,
                rows: cluster_rows,
            },
        })
    }

    /// Matrices restricted to the given ranks.
    pub fn restrict(&self, ranks: &[usize]) -> Self {
        let mut restricted = Self {
            spec_fill: SpecFill {
                labels: self.spec_fill.labels.clone(),
                rows: BTreeMap::new(),
            },
            cluster_fill: ClusterFill {
                cluster_ids: self.cluster_fill.cluster_ids.clone(),
                labels: self.cluster_fill.labels.clone(),
                rows: BTreeMap::new(),
            },
        };
        for rank in ranks {
            let key = rank_key(*rank);
            if let Some(row) = self.spec_fill.rows.get(&key) {
                restricted.spec_fill.rows.insert(key.clone(), row.clone());
            }
            if let Some(row) = self.cluster_fill.rows.get(&key) {
                restricted.cluster_fill.rows.insert(key, row.clone());
            }
        }
        restricted
    }

    /// Factor-fill row of `rank`.
    pub fn spec_row(&self, rank: usize) -> Option<&[usize]> {
        self.spec_fill.rows.get(&rank_key(rank)).map(Vec::as_slice)
    }

    /// Cluster-fill row of `rank`, in reversed cluster order.
    pub fn cluster_row(&self, rank: usize) -> Option<&[f64]> {
        self.cluster_fill.rows.get(&rank_key(rank)).map(Vec::as_slice)
    }

    /// Fill percentage of one cluster in `rank`.
    pub fn cluster_percent(&self, rank: usize, cluster_id: u64) -> Option<f64> {
        let ids = &self.cluster_fill.cluster_ids;
        let pos = ids.binary_search(&cluster_id).ok()?;
        self.cluster_row(rank)
            .and_then(|row| row.get(ids.len() - 1 - pos))
            .copied()
    }
}

fn cluster_row(
    spec: &Specification,
    dataset: &RowDataset,
    sizes: &BTreeMap<u64, usize>,
) -> Result<Vec<f64>, MverseError> {
    let mut included: BTreeMap<u64, usize> = BTreeMap::new();
    for row in dataset.select(&spec.set_es)? {
        *included.entry(row.cluster_id).or_insert(0) += 1;
    }
    let mut fill = Vec::with_capacity(sizes.len());
    for (cluster_id, total) in sizes {
        if *total == 0 {
            return Err(MverseError::Dataset(
                ErrorInfo::new("cluster_fill_empty_cluster", "cluster has no rows")
                    .with_context("cluster_id", cluster_id),
            ));
        }
        let count = if spec.set.contains(*cluster_id) {
            included.get(cluster_id).copied().unwrap_or(0)
        } else {
            0
        };
        fill.push(100.0 * count as f64 / *total as f64);
    }
    fill.reverse();
    Ok(fill)
}

/// Factor value chosen by a specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorChoice {
    /// Factor name.
    pub factor: String,
    /// Raw value.
    pub value: String,
    /// Display label.
    pub label: String,
}

/// Contribution of one cluster to a specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDetail {
    /// Cluster identifier.
    pub cluster_id: u64,
    /// Display label.
    pub label: String,
    /// Included row identifiers.
    pub row_ids: Vec<u64>,
    /// Share of the cluster's rows that are included.
    pub percent: f64,
}

/// Drill-down view of one specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecDetail {
    /// Rank.
    pub rank: usize,
    /// Summary effect.
    pub mean: f64,
    /// Lower bound.
    pub lb: f64,
    /// Upper bound.
    pub ub: f64,
    /// p-value.
    pub p: f64,
    /// Row count.
    pub k: usize,
    /// Cluster count.
    pub kc: usize,
    /// Whether all clusters are included.
    pub full_set: bool,
    /// Factor choices in column order.
    pub factors: Vec<FactorChoice>,
    /// Included clusters, ascending by id.
    pub clusters: Vec<ClusterDetail>,
}

/// Describes the specification at `rank`.
pub fn describe(
    config: &MultiverseConfig,
    table: &SpecTable,
    fills: &FillMatrices,
    dataset: &RowDataset,
    rank: usize,
) -> Result<SpecDetail, MverseError> {
    let spec = table.by_rank(rank).ok_or_else(|| {
        MverseError::Config(
            ErrorInfo::new("unknown_rank", "no specification has this rank")
                .with_context("rank", rank)
                .with_context("count", table.len()),
        )
    })?;

    let factors = config
        .factors()
        .zip(&spec.factors)
        .map(|(factor, value)| FactorChoice {
            factor: factor.name.clone(),
            value: value.clone(),
            label: factor
                .values
                .iter()
                .find(|v| &v.value == value)
                .map(|v| v.label.clone())
                .unwrap_or_else(|| value.clone()),
        })
        .collect();

    let labels = dataset.cluster_labels();
    let mut by_cluster: BTreeMap<u64, Vec<u64>> = BTreeMap::new();
    for row in dataset.select(&spec.set_es)? {
        by_cluster.entry(row.cluster_id).or_default().push(row.row_id);
    }
    let clusters = by_cluster
        .into_iter()
        .map(|(cluster_id, row_ids)| ClusterDetail {
            cluster_id,
            label: labels.get(&cluster_id).cloned().unwrap_or_default(),
            row_ids,
            percent: fills.cluster_percent(rank, cluster_id).unwrap_or(0.0),
        })
        .collect();

    Ok(SpecDetail {
        rank: spec.rank,
        mean: spec.mean,
        lb: spec.lb,
        ub: spec.ub,
        p: spec.p,
        k: spec.k,
        kc: spec.kc,
        full_set: spec.full_set,
        factors,
        clusters,
    })
}
