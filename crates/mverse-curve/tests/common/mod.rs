#![allow(dead_code)]

use std::path::PathBuf;

use mverse_core::{EffectRow, RowDataset};
use mverse_curve::{
    build_spec_table, load_config, load_dataset, read_dataset, BuildOpts, CancelToken,
    EffectEstimator, EffectScale, Estimate, EstimateError, Fit, MetaEstimator, MethodParams,
    MultiverseConfig, RawConfig, SpecTable,
};
use serde_json::json;

pub fn fixture_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join(relative)
}

pub fn fixture() -> (MultiverseConfig, RowDataset) {
    let config = load_config(fixture_path("fixtures/config.json")).expect("fixture config");
    let dataset = load_dataset(fixture_path("fixtures/data.csv"), &config).expect("fixture data");
    (config, dataset)
}

pub fn fixture_table() -> SpecTable {
    let (config, dataset) = fixture();
    build_spec_table(
        &config,
        &dataset,
        &MetaEstimator::new(config.methods.clone()),
        &BuildOpts::default(),
        &CancelToken::new(),
    )
    .expect("fixture build")
    .table
}

/// Config over a single `region` which-factor and the given methods.
pub fn region_config(regions: &[&str], methods: &[&str], k_min: usize) -> MultiverseConfig {
    let raw: RawConfig = serde_json::from_value(json!({
        "title": "regions",
        "k_min": k_min,
        "n_boot_iter": 10,
        "colmap": { "key_c": "study", "key_c_id": "study_id", "key_e_id": "es_id" },
        "which": {
            "n": 1,
            "keys": ["region"],
            "keys_labels": ["Region"],
            "values": [regions],
            "values_labels": [regions],
            "add_all_values": [true]
        },
        "how": {
            "n": 1,
            "keys": ["ma_method"],
            "keys_labels": ["Method"],
            "values": [methods],
            "values_labels": [methods]
        }
    }))
    .expect("region config");
    raw.validate().expect("valid region config")
}

/// Two clusters of four rows; cluster 1 mixes EU and US rows.
pub fn region_dataset(config: &MultiverseConfig) -> RowDataset {
    let csv = "study,study_id,es_id,N,z,z_se,region\n\
               S1,1,1,50,0.10,0.14,EU\n\
               S1,1,2,60,0.20,0.13,EU\n\
               S1,1,3,70,0.15,0.12,US\n\
               S1,1,4,80,0.05,0.11,US\n\
               S2,2,5,90,0.30,0.10,EU\n\
               S2,2,6,40,-0.10,0.16,EU\n\
               S2,2,7,45,0.25,0.15,EU\n\
               S2,2,8,55,0.00,0.14,EU\n";
    read_dataset(csv.as_bytes(), config).expect("region dataset")
}

/// Returns the same estimate for every input.
pub struct ConstEstimator(pub f64);

impl EffectEstimator for ConstEstimator {
    fn estimate(&self, _rows: &[&EffectRow], _params: &MethodParams) -> Result<Fit, EstimateError> {
        Ok(Fit {
            estimate: Estimate {
                mean: self.0,
                lb: self.0 - 0.1,
                ub: self.0 + 0.1,
                p: 0.5,
            },
            scale: EffectScale::R,
        })
    }
}

/// Fails every call as degenerate.
pub struct DegenerateEstimator;

impl EffectEstimator for DegenerateEstimator {
    fn estimate(&self, _rows: &[&EffectRow], _params: &MethodParams) -> Result<Fit, EstimateError> {
        Err(EstimateError::Degenerate("always".to_string()))
    }
}

/// Reports non-convergence until the iteration cap reaches `needed`.
pub struct StubbornEstimator {
    pub needed: usize,
}

impl EffectEstimator for StubbornEstimator {
    fn estimate(&self, rows: &[&EffectRow], params: &MethodParams) -> Result<Fit, EstimateError> {
        if params.control.max_iter < self.needed {
            return Err(EstimateError::NonConvergence {
                iterations: params.control.max_iter,
            });
        }
        ConstEstimator(rows.len() as f64 / 100.0).estimate(rows, params)
    }
}
