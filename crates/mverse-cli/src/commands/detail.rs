use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use mverse_curve::{describe, FillMatrices};

#[derive(Args, Debug)]
pub struct DetailArgs {
    /// Factor configuration (JSON, or YAML by extension).
    #[arg(long)]
    pub config: PathBuf,
    /// Row dataset CSV.
    #[arg(long)]
    pub data: PathBuf,
    /// Specification table produced by `mverse build`.
    #[arg(long)]
    pub specs: PathBuf,
    /// Rank of the specification to describe.
    #[arg(long)]
    pub rank: usize,
}

pub fn run(args: &DetailArgs) -> Result<(), Box<dyn Error>> {
    let (config, dataset) = super::load_inputs(&args.config, &args.data)?;
    let table = super::load_specs(&args.specs, &config)?;
    let fills = FillMatrices::build(&config, &table, &dataset)?;
    let detail = describe(&config, &table, &fills, &dataset, args.rank)?;
    println!("{}", serde_json::to_string_pretty(&detail)?);
    Ok(())
}
