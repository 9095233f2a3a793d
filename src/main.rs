use clap::Parser;
use log::{error, info};

mod cli;
use crate::cli::Cli;
use crate::cli::CliError;
use crate::cli::Commands;
use crate::cli::Config;

mod commands;

fn run(cli: &Cli, config: &Config) -> Result<(), CliError> {
    match &cli.command {
        Commands::Info { archive } => {
            print!("{}", commands::info(archive, config)?);
        }
        Commands::Validate { archive } => {
            let report = commands::validate(archive, config)?;
            for message in report.messages.iter() {
                println!("{}", message);
            }
            if !report.is_ok() {
                return Err(CliError::Invalid(archive.clone()));
            }
        }
        Commands::Strip {
            input,
            output,
            backends,
        } => {
            let written = commands::strip(input, output, backends, config)?;
            info!("wrote {} bytes to {}", written, output.display());
        }
        Commands::Append {
            input,
            donor,
            output,
            backends,
        } => {
            let written = commands::append(input, donor, output, backends, config)?;
            info!("wrote {} bytes to {}", written, output.display());
        }
        Commands::Merge { inputs, output, layout } => {
            let layout = layout.unwrap_or(config.layout);
            let report = commands::merge(inputs, output, layout.into(), config)?;
            println!(
                "{} resources, {} duplicates, {} conflicts",
                report.added,
                report.duplicates,
                report.conflicts.len()
            );
            for key in report.conflicts.iter() {
                println!("  kept the first {}", key);
            }
        }
        Commands::Convert { input, output, layout } => {
            let written = commands::convert(input, output, (*layout).into(), config)?;
            info!("wrote {} bytes to {}", written, output.display());
        }
    }
    Ok(())
}

fn main() {
    // Parse the cli
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = run(&cli, &config) {
        error!("{}", e);
        std::process::exit(1);
    }
}
