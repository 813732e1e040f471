use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use mverse_curve::codec::write_canonical_json;
use mverse_curve::{
    build_spec_table, save_spec_table, BuildOpts, CancelToken, FillMatrices, MetaEstimator,
    RunManifest,
};
use tracing::info;

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Factor configuration (JSON, or YAML by extension).
    #[arg(long)]
    pub config: PathBuf,
    /// Row dataset CSV.
    #[arg(long)]
    pub data: PathBuf,
    /// Output directory.
    #[arg(long)]
    pub out: PathBuf,
    /// Worker threads used for fitting.
    #[arg(long, default_value_t = 1)]
    pub concurrency: usize,
    /// Extra estimator attempts after non-convergence.
    #[arg(long, default_value_t = 2)]
    pub max_retries: u32,
}

pub fn run(args: &BuildArgs) -> Result<(), Box<dyn Error>> {
    let (config, dataset) = super::load_inputs(&args.config, &args.data)?;
    let estimator = MetaEstimator::from_config(&config);
    let opts = BuildOpts {
        concurrency: args.concurrency,
        max_retries: args.max_retries,
    };
    let outcome = build_spec_table(&config, &dataset, &estimator, &opts, &CancelToken::new())?;
    let fills = FillMatrices::build(&config, &outcome.table, &dataset)?;

    save_spec_table(&args.out.join("specs.csv"), &outcome.table)?;
    write_canonical_json(&args.out.join("fills.json"), &fills)?;
    RunManifest::for_build(&config, &dataset, &outcome.summary)?
        .save(&args.out.join("manifest.json"))?;
    info!(
        out = %args.out.display(),
        specifications = outcome.table.len(),
        "build artefacts written"
    );
    Ok(())
}
