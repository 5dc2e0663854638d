mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "wirecell")]
#[command(about = "Build, inspect and run module graphs", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Runtime settings file
    #[arg(long, global = true, default_value = "wirecell.yaml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an agent from a graph file and talk to it
    Run {
        /// Graph declaration (.yaml, .yml or .json)
        graph: PathBuf,

        /// Send one text message and print the response
        #[arg(short, long)]
        text: Option<String>,

        /// Invoke an entry method directly instead of sending text
        #[arg(short, long, conflicts_with = "text")]
        method: Option<String>,

        /// JSON payload for --method
        #[arg(short, long, default_value = "{}", requires = "method")]
        payload: String,

        /// Print every intercepted call
        #[arg(long)]
        trace: bool,

        /// Print trace events as JSON lines
        #[arg(long, requires = "trace")]
        json: bool,
    },

    /// Resolve graph files without running them
    Check {
        /// Graph file or directory of graph files
        path: PathBuf,
    },

    /// List the built-in module types
    Types,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let settings = wirecell_core::RuntimeSettings::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Run {
            graph,
            text,
            method,
            payload,
            trace,
            json,
        } => {
            let trace = match (trace, json) {
                (false, _) => None,
                (true, false) => Some(commands::run::TraceFormat::Text),
                (true, true) => Some(commands::run::TraceFormat::Json),
            };
            commands::run::run(&settings, &graph, text, method, &payload, trace).await?;
        }
        Commands::Check { path } => {
            commands::check::run(&settings, &path)?;
        }
        Commands::Types => {
            commands::types::run();
        }
    }

    Ok(())
}
