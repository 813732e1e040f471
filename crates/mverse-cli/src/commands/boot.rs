use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use mverse_curve::{
    null_bootstrap, save_boot_table, BootstrapOpts, CancelToken, MetaEstimator, RunManifest,
};
use tracing::info;

#[derive(Args, Debug)]
pub struct BootArgs {
    /// Factor configuration (JSON, or YAML by extension).
    #[arg(long)]
    pub config: PathBuf,
    /// Row dataset CSV.
    #[arg(long)]
    pub data: PathBuf,
    /// Specification table produced by `mverse build`.
    #[arg(long)]
    pub specs: PathBuf,
    /// Output directory.
    #[arg(long)]
    pub out: PathBuf,
    /// Iterations; defaults to `n_boot_iter` from the configuration.
    #[arg(long)]
    pub iter: Option<usize>,
    /// Master seed of the null sampler.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
    /// Worker threads.
    #[arg(long, default_value_t = 1)]
    pub concurrency: usize,
    /// Extra estimator attempts after non-convergence.
    #[arg(long, default_value_t = 2)]
    pub max_retries: u32,
}

pub fn run(args: &BootArgs) -> Result<(), Box<dyn Error>> {
    let (config, dataset) = super::load_inputs(&args.config, &args.data)?;
    let table = super::load_specs(&args.specs, &config)?;
    let mut opts = BootstrapOpts::from_config(&config, args.seed);
    if let Some(iter) = args.iter {
        opts.n_iter = iter;
    }
    opts.concurrency = args.concurrency;
    opts.max_retries = args.max_retries;

    let estimator = MetaEstimator::from_config(&config);
    let boot = null_bootstrap(&table, &dataset, &estimator, &opts, &CancelToken::new())?;
    save_boot_table(&args.out.join("boot.csv"), &boot)?;
    RunManifest::for_bootstrap(&config, &dataset, &boot, &opts)?
        .save(&args.out.join("boot_manifest.json"))?;
    info!(
        ranks = boot.len(),
        exceedances = boot.exceedances().len(),
        "bootstrap artefacts written"
    );
    Ok(())
}
