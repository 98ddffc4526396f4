use clap::Parser;
use fuelvm_cli::{Cli, CliError, Commands, LocalRunner};
use fuelvm_common::fuel::FUEL_QUICK_ACTION_AMOUNT;
use fuelvm_env::{config::VmConfig, VmStandard};
use tracing_subscriber::filter::LevelFilter;

fn load_config(path: Option<&str>) -> Result<VmConfig, CliError> {
    let config = match path {
        Some(path) => VmConfig::from_path(path),
        None => VmConfig::vm_standard(),
    }
    .map_err(|err| CliError::Config(format!("{err:#}")))?;

    Ok(config.with_env_overrides()?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if let Some(true) = cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    // Also captures the runtime's `log` records.
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Run {
            contract,
            max_fuel,
            stateful,
            times,
        }) => {
            let runner = LocalRunner::start(&config).await?;
            let deployed = runner
                .deploy(
                    &contract,
                    max_fuel.unwrap_or(FUEL_QUICK_ACTION_AMOUNT),
                    stateful.unwrap_or(false),
                )
                .await?;

            for _ in 0..times.unwrap_or(1) {
                match runner.execute(&deployed).await {
                    Ok(result) => println!("[+] {result}"),
                    Err(CliError::Vm(err)) => println!("[-] {} ({})", err, err.code()),
                    Err(err) => return Err(err.into()),
                }
            }

            println!("{}", serde_json::to_string_pretty(&runner.stats().await?)?);
            runner.close()?;
        }

        Some(Commands::Stats) => {
            let runner = LocalRunner::start(&config).await?;
            println!("{}", serde_json::to_string_pretty(&runner.stats().await?)?);
            runner.close()?;
        }

        Some(Commands::Config) => {
            println!("{}", config.to_toml()?);
        }

        None => {
            println!("Usage: fuelvm run --contract <PATH>")
        }
    };

    Ok(())
}
