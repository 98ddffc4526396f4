use clap::{Parser, Subcommand};

mod error;
mod runner;

pub use error::CliError;
pub use runner::LocalRunner;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path of a TOML runtime configuration.
    #[arg(short, long)]
    pub config: Option<String>,

    #[arg(short, long)]
    pub verbose: Option<bool>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Deploys a contract on a local runtime and executes it.
    Run {
        /// WebAssembly module, binary or text format.
        #[arg(short, long)]
        contract: String,

        #[arg(short = 'f', long)]
        max_fuel: Option<u64>,

        #[arg(short, long)]
        stateful: Option<bool>,

        /// Number of executions.
        #[arg(short = 'n', long)]
        times: Option<u32>,
    },

    /// Prints the fuel tank of a fresh local runtime.
    Stats,

    /// Prints the effective configuration.
    Config,
}
