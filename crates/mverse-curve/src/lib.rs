#![deny(missing_docs)]
#![doc = "Specification-curve enumeration, null bootstrap envelope and interactive filtering for meta-analytic multiverses."]

/// Null-hypothesis bootstrap envelope.
pub mod bootstrap;
/// Specification table builder.
pub mod build;
/// Canonical JSON and hashing helpers.
pub mod codec;
/// Factor configuration loading and validation.
pub mod config;
/// CSV ingestion of the row dataset.
pub mod dataset;
/// Cancellation, worker pools and estimator retries.
pub mod dispatch;
/// Cartesian enumeration of the factor space.
pub mod enumerate;
/// Effect estimator contract and the reference meta-analytic estimator.
pub mod estimator;
/// Filter predicate engine.
pub mod filters;
/// Fill matrices and drill-down views.
pub mod index;
/// Run manifests.
pub mod report;
/// Statistical helpers.
pub mod stat;
/// Table file formats.
pub mod table;

pub use bootstrap::{null_bootstrap, BootstrapOpts, NullBootRow, NullBootTable};
pub use build::{
    build_spec_table, BuildOpts, BuildOutcome, BuildSummary, SpecTable, Specification,
};
pub use config::{
    load_config, Factor, FactorKind, FactorValue, ModelLevel, MultiverseConfig, RawConfig,
};
pub use dataset::{load_dataset, read_dataset};
pub use dispatch::{fit_with_retries, CancelToken, FitOutcome};
pub use enumerate::{Combination, FactorSpace};
pub use estimator::{
    EffectEstimator, EffectScale, Estimate, EstimateError, Fit, FitControl, MetaEstimator,
    MethodParams,
};
pub use filters::{
    apply_filters, load_filters, CiCase, CountRange, EffectSign, FilterOutcome, FilterState,
    FilterSummary,
};
pub use index::{describe, ClusterDetail, FactorChoice, FillMatrices, SpecDetail};
pub use report::{dataset_hash, ManifestStage, RunManifest};
pub use stat::{p_value_histogram, percentile, Histogram};
pub use table::{
    load_boot_table, load_spec_table, read_boot_table, read_spec_table, save_boot_table,
    save_spec_table, write_boot_table, write_spec_table,
};
