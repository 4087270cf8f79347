//! servrack: a local multi-process supervisor.
//!
//! This is the entry point of the application. It parses command-line arguments,
//! loads the service configuration, and hands the validated services to the
//! supervisor, which runs them until failure, completion, or a termination signal.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::{ArgAction, Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use servrack::config::{self, Config};
use servrack::output::ConsoleSink;
use servrack::{events, process, Registry, Supervisor, SupervisorConfig};

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "servrack",
    version,
    about = "Run and supervise a group of local services",
    styles = help_styles(),
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Log level for supervisor diagnostics (overridden by RUST_LOG).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start all enabled services.
    Start(StartArgs),
    /// Create an example configuration file in the home directory.
    Init,
    /// Show version information.
    Version,
}

#[derive(Debug, clap::Args)]
struct StartArgs {
    /// Location of the configuration file (default: ~/.servrack.toml).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Stop everything if one of the services encounters an error.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    exit_on_error: bool,
    /// Exit once all services have stopped.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    exit_on_stop: bool,
    /// Disable colored prefixes and strip colors from service output.
    #[arg(long)]
    no_color: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    match cli.command {
        Commands::Start(args) => start(args).await,
        Commands::Init => init(),
        Commands::Version => {
            println!("servrack {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn start(args: StartArgs) -> Result<()> {
    let path = resolve_config_path(args.config.as_deref())?;
    let config = config::load_config(&path)?;
    let descriptors = process::descriptors_from_config(&config)?;

    let settings = SupervisorConfig::default();
    let registry = Registry::register(descriptors, &settings)?;
    tracing::info!(
        config = %path.display(),
        services = registry.processes().len(),
        "starting services"
    );
    let sink = Arc::new(ConsoleSink::new(!args.no_color));
    let supervisor = Supervisor::new(registry, settings, sink);

    let (signal_tx, signal_rx) = mpsc::channel(10);
    events::spawn_signal_listener(signal_tx);

    supervisor
        .start_all(signal_rx, args.exit_on_error, args.exit_on_stop)
        .await
        .context("supervisor stopped with an error")
}

fn init() -> Result<()> {
    let path = config::default_config_path()?;
    let existed = config::create_config(&path, &Config::example())?;
    if existed {
        println!(
            "Config file already exists in {}. Manually delete it to recreate the example config file.",
            path.display()
        );
    } else {
        println!(
            "Successfully initialized. An example config file created in: {}. Use `servrack start` to give it a try.",
            path.display()
        );
    }
    Ok(())
}

fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => config::expand_tilde(path),
        None => config::default_config_path(),
    }
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
        .valid(Style::new().fg_color(Some(AnsiColor::Green.into())))
        .invalid(
            Style::new()
                .fg_color(Some(AnsiColor::Red.into()))
                .effects(Effects::BOLD),
        )
}
