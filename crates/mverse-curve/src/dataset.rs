use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};
use mverse_core::errors::{ErrorInfo, MverseError};
use mverse_core::{EffectRow, EffectSizes, RowDataset};
use tracing::debug;

use crate::config::MultiverseConfig;

struct Columns {
    cluster: usize,
    cluster_id: Option<usize>,
    row_id: Option<usize>,
    n: Option<usize>,
    z: Option<(usize, usize)>,
    r: Option<(usize, usize)>,
    factors: Vec<(String, usize)>,
}

impl Columns {
    fn resolve(headers: &StringRecord, config: &MultiverseConfig) -> Result<Self, MverseError> {
        let index: HashMap<&str, usize> = headers
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.trim(), idx))
            .collect();
        let find = |name: &str| index.get(name).copied();
        let require = |name: &str| {
            find(name).ok_or_else(|| {
                MverseError::Dataset(
                    ErrorInfo::new("missing_column", "dataset lacks a required column")
                        .with_context("column", name),
                )
            })
        };
        let colmap = &config.colmap;
        let pair = |a: &str, b: &str| find(a).zip(find(b));
        let columns = Self {
            cluster: require(&colmap.key_c)?,
            cluster_id: find(&colmap.key_c_id),
            row_id: find(&colmap.key_e_id),
            n: find(&colmap.key_n),
            z: pair(&colmap.key_z, &colmap.key_z_se),
            r: pair(&colmap.key_r, &colmap.key_r_se),
            factors: config
                .which
                .iter()
                .map(|factor| Ok((factor.name.clone(), require(&factor.name)?)))
                .collect::<Result<_, MverseError>>()?,
        };
        if columns.z.is_none() && columns.r.is_none() {
            return Err(MverseError::Dataset(
                ErrorInfo::new("missing_effect", "dataset has neither z nor r effect columns")
                    .with_hint("provide (z, z_se) or (r, r_se) as named in colmap"),
            ));
        }
        Ok(columns)
    }
}

fn field<'a>(record: &'a StringRecord, idx: usize, line: usize) -> Result<&'a str, MverseError> {
    record.get(idx).map(str::trim).ok_or_else(|| {
        MverseError::Dataset(
            ErrorInfo::new("short_record", "record has fewer fields than the header")
                .with_context("line", line),
        )
    })
}

fn parse_f64(record: &StringRecord, idx: usize, line: usize) -> Result<f64, MverseError> {
    let raw = field(record, idx, line)?;
    raw.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| {
            MverseError::Dataset(
                ErrorInfo::new("invalid_number", "expected a finite number")
                    .with_context("line", line)
                    .with_context("value", raw),
            )
        })
}

fn parse_id(record: &StringRecord, idx: usize, line: usize) -> Result<u64, MverseError> {
    let value = parse_f64(record, idx, line)?;
    if value < 0.0 || value.fract() != 0.0 {
        return Err(MverseError::Dataset(
            ErrorInfo::new("invalid_integer", "expected a non-negative integer")
                .with_context("line", line)
                .with_context("value", value),
        ));
    }
    Ok(value as u64)
}

/// Reads the canonical row dataset from CSV.
///
/// Cluster ids are taken from the cluster-id column or assigned from 1 in
/// order of first appearance of the cluster label; rows are then stably
/// sorted by cluster id and, if the row-id column is absent, numbered from 1
/// in that order. The missing effect scale is derived from the present one.
pub fn read_dataset<R: Read>(
    reader: R,
    config: &MultiverseConfig,
) -> Result<RowDataset, MverseError> {
    let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(reader);
    let headers = rdr
        .headers()
        .map_err(|err| MverseError::serde("dataset_header", err))?
        .clone();
    let columns = Columns::resolve(&headers, config)?;

    let mut assigned: BTreeMap<String, u64> = BTreeMap::new();
    let mut rows = Vec::new();
    for (offset, record) in rdr.records().enumerate() {
        let line = offset + 2;
        let record = record.map_err(|err| MverseError::serde("dataset_record", err))?;
        let cluster = field(&record, columns.cluster, line)?.to_string();
        let cluster_id = match columns.cluster_id {
            Some(idx) => parse_id(&record, idx, line)?,
            None => {
                let next = assigned.len() as u64 + 1;
                *assigned.entry(cluster.clone()).or_insert(next)
            }
        };
        let row_id = match columns.row_id {
            Some(idx) => parse_id(&record, idx, line)?,
            None => 0,
        };
        let n = match columns.n {
            Some(idx) => Some(parse_id(&record, idx, line)?),
            None => None,
        };
        let effect = match (columns.z, columns.r) {
            (Some((z, z_se)), Some((r, r_se))) => EffectSizes {
                z: parse_f64(&record, z, line)?,
                z_se: parse_f64(&record, z_se, line)?,
                r: parse_f64(&record, r, line)?,
                r_se: parse_f64(&record, r_se, line)?,
            },
            (Some((z, z_se)), None) => {
                EffectSizes::from_z(parse_f64(&record, z, line)?, parse_f64(&record, z_se, line)?)
            }
            (None, Some((r, r_se))) => {
                EffectSizes::from_r(parse_f64(&record, r, line)?, parse_f64(&record, r_se, line)?)
            }
            (None, None) => {
                return Err(MverseError::dataset("missing_effect", "no effect columns"))
            }
        };
        let mut categories = BTreeMap::new();
        for (name, idx) in &columns.factors {
            categories.insert(name.clone(), field(&record, *idx, line)?.to_string());
        }
        rows.push(EffectRow {
            row_id,
            cluster_id,
            cluster,
            n,
            effect,
            categories,
        });
    }

    rows.sort_by_key(|row| row.cluster_id);
    if columns.row_id.is_none() {
        for (idx, row) in rows.iter_mut().enumerate() {
            row.row_id = idx as u64 + 1;
        }
    }
    debug!(rows = rows.len(), "dataset parsed");
    RowDataset::new(rows)
}

/// Loads the row dataset from a CSV file.
pub fn load_dataset<P: AsRef<Path>>(
    path: P,
    config: &MultiverseConfig,
) -> Result<RowDataset, MverseError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|err| {
        MverseError::Serde(
            ErrorInfo::new("dataset_open", err.to_string()).with_context("path", path.display()),
        )
    })?;
    read_dataset(file, config)
}
