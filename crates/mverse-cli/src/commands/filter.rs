use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use mverse_curve::codec::{load_structured, write_canonical_json};
use mverse_curve::{
    apply_filters, load_filters, p_value_histogram, save_spec_table, FillMatrices, FilterSummary,
    Histogram,
};
use serde::Serialize;
use tracing::info;

#[derive(Args, Debug)]
pub struct FilterArgs {
    /// Factor configuration (JSON, or YAML by extension).
    #[arg(long)]
    pub config: PathBuf,
    /// Specification table produced by `mverse build`.
    #[arg(long)]
    pub specs: PathBuf,
    /// Filter state (JSON, or YAML by extension).
    #[arg(long)]
    pub filters: PathBuf,
    /// Output directory.
    #[arg(long)]
    pub out: PathBuf,
    /// Fill matrices produced by `mverse build`; restricted to the kept ranks when given.
    #[arg(long)]
    pub fills: Option<PathBuf>,
    /// Bins of the p-value histogram.
    #[arg(long, default_value_t = 20)]
    pub bins: usize,
}

#[derive(Serialize)]
struct FilterReport {
    summary: FilterSummary,
    ranks: Vec<usize>,
    p_histogram: Histogram,
}

pub fn run(args: &FilterArgs) -> Result<(), Box<dyn Error>> {
    let config = mverse_curve::load_config(&args.config)?;
    let table = super::load_specs(&args.specs, &config)?;
    let state = load_filters(&args.filters)?;
    let outcome = apply_filters(&table, &state, config.alpha)?;

    save_spec_table(&args.out.join("filtered.csv"), &outcome.table)?;
    let report = FilterReport {
        summary: outcome.summary,
        ranks: outcome.ranks(),
        p_histogram: p_value_histogram(&outcome.table, args.bins),
    };
    write_canonical_json(&args.out.join("filter_summary.json"), &report)?;
    if let Some(path) = &args.fills {
        let fills: FillMatrices = load_structured(path)?;
        write_canonical_json(
            &args.out.join("filtered_fills.json"),
            &fills.restrict(&outcome.ranks()),
        )?;
    }
    info!(
        shown = outcome.summary.shown,
        total = outcome.summary.total,
        empty = outcome.summary.empty,
        "filter applied"
    );
    Ok(())
}
