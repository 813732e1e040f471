pub mod boot;
pub mod build;
pub mod detail;
pub mod filter;

use std::error::Error;
use std::path::Path;

use mverse_core::RowDataset;
use mverse_curve::{load_config, load_dataset, load_spec_table, MultiverseConfig, SpecTable};

pub(crate) fn load_inputs(
    config: &Path,
    data: &Path,
) -> Result<(MultiverseConfig, RowDataset), Box<dyn Error>> {
    let config = load_config(config)?;
    let dataset = load_dataset(data, &config)?;
    Ok((config, dataset))
}

pub(crate) fn load_specs(
    path: &Path,
    config: &MultiverseConfig,
) -> Result<SpecTable, Box<dyn Error>> {
    Ok(load_spec_table(path, config)?)
}
