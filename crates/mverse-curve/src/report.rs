use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use mverse_core::errors::MverseError;
use mverse_core::provenance::{RunProvenance, SchemaVersion};
use mverse_core::RowDataset;
use serde::{Deserialize, Serialize};

use crate::bootstrap::{BootstrapOpts, NullBootTable};
use crate::build::BuildSummary;
use crate::codec::{load_structured, stable_hash_string, write_canonical_json};
use crate::config::MultiverseConfig;

/// Pipeline stage a manifest describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ManifestStage {
    /// Specification table and fill matrices.
    Build,
    /// Null bootstrap envelope.
    Bootstrap,
}

/// Record written next to every persisted artefact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    /// Analysis title.
    pub title: String,
    /// Stage that produced the artefacts.
    pub stage: ManifestStage,
    /// Number of specifications involved.
    pub specifications: usize,
    /// Builder counters, for build runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSummary>,
    /// Iterations, for bootstrap runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_iter: Option<usize>,
    /// Ranks outside the null envelope, for bootstrap runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exceedances: Option<Vec<usize>>,
    /// Input hashes and timestamps.
    pub provenance: RunProvenance,
}

fn provenance(
    config: &MultiverseConfig,
    dataset: &RowDataset,
    seed: u64,
) -> Result<RunProvenance, MverseError> {
    let mut versions = BTreeMap::new();
    versions.insert(
        "mverse-curve".to_string(),
        env!("CARGO_PKG_VERSION").to_string(),
    );
    Ok(RunProvenance {
        schema_version: SchemaVersion::default(),
        config_hash: config.config_hash()?,
        dataset_hash: dataset_hash(dataset)?,
        seed,
        created_at: Utc::now().to_rfc3339(),
        tool_versions: versions,
    })
}

/// Stable hash of the canonical row dataset.
pub fn dataset_hash(dataset: &RowDataset) -> Result<String, MverseError> {
    stable_hash_string(dataset.rows())
}

impl RunManifest {
    /// Manifest of a specification table build.
    pub fn for_build(
        config: &MultiverseConfig,
        dataset: &RowDataset,
        summary: &BuildSummary,
    ) -> Result<Self, MverseError> {
        Ok(Self {
            title: config.title.clone(),
            stage: ManifestStage::Build,
            specifications: summary.retained,
            build: Some(*summary),
            n_iter: None,
            exceedances: None,
            provenance: provenance(config, dataset, 0)?,
        })
    }

    /// Manifest of a null bootstrap run.
    pub fn for_bootstrap(
        config: &MultiverseConfig,
        dataset: &RowDataset,
        table: &NullBootTable,
        opts: &BootstrapOpts,
    ) -> Result<Self, MverseError> {
        Ok(Self {
            title: config.title.clone(),
            stage: ManifestStage::Bootstrap,
            specifications: table.len(),
            build: None,
            n_iter: Some(opts.n_iter),
            exceedances: Some(table.exceedances()),
            provenance: provenance(config, dataset, opts.seed)?,
        })
    }

    /// Writes the manifest as canonical JSON.
    pub fn save(&self, path: &Path) -> Result<(), MverseError> {
        write_canonical_json(path, self)
    }

    /// Reads a manifest written by [`RunManifest::save`].
    pub fn load(path: &Path) -> Result<Self, MverseError> {
        load_structured(path)
    }
}
