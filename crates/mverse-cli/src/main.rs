use std::error::Error;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{boot::BootArgs, build::BuildArgs, detail::DetailArgs, filter::FilterArgs};

#[derive(Parser, Debug)]
#[command(name = "mverse", about = "Specification-curve analysis for meta-analytic multiverses")]
struct Cli {
    /// Log filter used when RUST_LOG is unset (e.g. `info`, `debug`).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the specification table, fill matrices and manifest.
    Build(BuildArgs),
    /// Compute the null bootstrap envelope for a built table.
    Boot(BootArgs),
    /// Apply a filter state to a built table.
    Filter(FilterArgs),
    /// Print the drill-down of one specification as JSON.
    Detail(DetailArgs),
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    match cli.command {
        Command::Build(args) => commands::build::run(&args),
        Command::Boot(args) => commands::boot::run(&args),
        Command::Filter(args) => commands::filter::run(&args),
        Command::Detail(args) => commands::detail::run(&args),
    }
}
