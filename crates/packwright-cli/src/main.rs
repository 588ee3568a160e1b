#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_lines)]

mod commands;
mod logging;

use clap::Parser;
use miette::Result;
use packwright_core::Mode;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "packwright")]
#[command(author, version, about = "Build and serve web applications from packwright.json", long_about = None)]
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

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Build the project once
    Build {
        /// Path to config file (overrides auto-discovery)
        #[arg(long, short = 'c', value_name = "FILE")]
        config: Option<PathBuf>,

        /// Build mode: development or production
        #[arg(long, short = 'm')]
        mode: Option<Mode>,
    },

    /// Start the development server with live reload
    Dev {
        /// Path to config file (overrides auto-discovery)
        #[arg(long, short = 'c', value_name = "FILE")]
        config: Option<PathBuf>,

        /// Build mode: development or production
        #[arg(long, short = 'm')]
        mode: Option<Mode>,

        /// Port to listen on (overrides devServer.port)
        #[arg(long, short = 'p')]
        port: Option<u16>,

        /// Host to bind to (overrides devServer.host)
        #[arg(long)]
        host: Option<String>,
    },

    /// Resolve an import specifier the way the build would
    Resolve {
        /// Specifier as written in an import
        specifier: String,

        /// Directory of the importing module (defaults to the project root)
        #[arg(long, value_name = "DIR")]
        from: Option<PathBuf>,

        /// Path to config file (overrides auto-discovery)
        #[arg(long, short = 'c', value_name = "FILE")]
        config: Option<PathBuf>,
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
        Commands::Build { config, mode } => {
            if !cli.json {
                logging::init(cli.verbose, false);
            }
            commands::build::run(
                commands::build::BuildAction { cwd, config, mode },
                cli.json,
            )
        }
        Commands::Dev {
            config,
            mode,
            port,
            host,
        } => {
            logging::init(cli.verbose, cli.json);
            commands::dev::run(commands::dev::DevAction {
                cwd,
                config,
                mode,
                port,
                host,
            })
        }
        Commands::Resolve {
            specifier,
            from,
            config,
        } => {
            logging::init(cli.verbose, cli.json);
            commands::resolve::run(&cwd, &specifier, from, config, cli.json)
        }
    }
}
