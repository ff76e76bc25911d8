use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use shipyard::config::ShipyardConfig;
use shipyard::functions::Secret;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cmd;

#[derive(Parser)]
#[command(name = "shipyard")]
#[command(version, about = "Remote deployment and migration orchestrator")]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to shipyard.toml (defaults to ./shipyard.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print the structured outcome as JSON instead of the log
    #[arg(long, global = true)]
    pub json: bool,

    /// Format of diagnostic logs written to stderr
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Clone, build and publish a target on its host
    Deploy {
        /// Target (deploy configuration) name
        target: String,

        /// Reverse-proxy to a preview server on this port instead of serving static files
        #[arg(long)]
        upstream_port: Option<u16>,
    },
    /// Issue or renew the TLS certificate of an already deployed target
    Ssl {
        /// Target (deploy configuration) name
        target: String,
    },
    /// Show build and proxy diagnostics for a deployed target
    Status {
        /// Target (deploy configuration) name
        target: String,
    },
    /// Apply db_migrations/*.sql from a repository
    Migrate {
        /// Repository as owner/repo or a GitHub URL
        #[arg(long, conflicts_with = "target", required_unless_present = "target")]
        repo: Option<String>,

        /// Take the repository (and database, when set) from a target
        #[arg(long)]
        target: Option<String>,
    },
    /// Deploy serverless functions from a repository in resumable batches
    Functions {
        /// Repository as owner/repo or a GitHub URL
        #[arg(long)]
        repo: String,

        /// Functions per invocation (defaults to functions.default_batch_size)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Position in the sorted function list to resume from
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Deploy only this function
        #[arg(long)]
        only: Option<String>,

        /// Environment variable for every function, as NAME=VALUE (repeatable)
        #[arg(long = "secret", value_name = "NAME=VALUE")]
        secrets: Vec<Secret>,

        /// Keep invoking with the next offset until every batch is done
        #[arg(long)]
        until_done: bool,

        /// Do not update the URL manifest in the repository
        #[arg(long)]
        no_manifest: bool,
    },
    /// Run a pipeline from a serverless-style JSON event and print the JSON response
    Invoke {
        /// deploy, ssl, status, migrate or functions
        pipeline: String,

        /// Event file, or - for stdin
        #[arg(long, default_value = "-")]
        event: PathBuf,
    },
    /// View or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration with secrets masked
    Show,
    /// Write a default shipyard.toml in the current directory
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(verbose: u8, format: LogFormat) {
    let default_filter = match verbose {
        0 => "shipyard=warn",
        1 => "shipyard=info",
        _ => "shipyard=debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let config = ShipyardConfig::load(cli.config.as_deref())?;
    if let Some(source) = &config.source {
        tracing::debug!(path = %source.display(), "Loaded configuration");
    }

    let success = match &cli.command {
        Commands::Deploy {
            target,
            upstream_port,
        } => cmd::cmd_deploy(&config, target, *upstream_port, cli.json).await?,
        Commands::Ssl { target } => cmd::cmd_ssl(&config, target, cli.json).await?,
        Commands::Status { target } => cmd::cmd_status(&config, target, cli.json).await?,
        Commands::Migrate { repo, target } => {
            cmd::cmd_migrate(&config, repo.as_deref(), target.as_deref(), cli.json).await?
        }
        Commands::Functions {
            repo,
            batch_size,
            offset,
            only,
            secrets,
            until_done,
            no_manifest,
        } => {
            let options = cmd::FunctionsOptions {
                batch_size: *batch_size,
                offset: *offset,
                only: only.clone(),
                secrets: secrets.clone(),
                until_done: *until_done,
                update_manifest: !*no_manifest,
            };
            cmd::cmd_functions(&config, repo, options, cli.json).await?
        }
        Commands::Invoke { pipeline, event } => cmd::cmd_invoke(&config, pipeline, event).await?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    };

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
