#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]

mod commands;
mod logging;

use clap::Parser;
use miette::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "packrat")]
#[command(author, version, about = "A config-driven asset bundler", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    /// Config file (default: packrat.config.json in the working directory)
    #[arg(short, long, global = true, value_name = "FILE", env = "PACKRAT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Build all entries and write the output directory
    Build,

    /// Build, watch and serve the output over HTTP
    Dev {
        /// Port to listen on (overrides devServer.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides devServer.host)
        #[arg(long)]
        host: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    match cli.command {
        Commands::Version => commands::version::run(),
        Commands::Build => {
            // --json owns stdout; keep logs at warnings unless asked for more
            if !cli.json || cli.verbose > 0 {
                logging::init(cli.verbose, cli.json);
            }
            let action = commands::build::BuildAction {
                cwd,
                config: cli.config,
            };
            commands::build::run(action, cli.json)
        }
        Commands::Dev { port, host } => {
            logging::init(cli.verbose, cli.json);
            let action = commands::dev::DevAction {
                cwd,
                config: cli.config,
                port,
                host,
            };
            commands::dev::run(action)
        }
    }
}
