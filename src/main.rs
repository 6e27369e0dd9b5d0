//! warden - fixed-size worker-pool supervisor

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};
use tracing::{Level, info};

use warden::cli::{self, Cli, Commands, RunArgs, WorkerArgs};
use warden::logging::{self, LogConfig};
use warden::supervisor::{Pool, PoolConfig, SignalHandler, WorkerHandler};
use warden::worker;

fn main() {
    let cli = Cli::parse();

    init_logging(&cli);

    let result = match &cli.command {
        Commands::Run(args) => cmd_run(args),
        Commands::Worker(args) => cmd_worker(args),
    };

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        // Print the error chain if there are causes
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

/// Build the logging configuration from CLI flags and the environment.
fn init_logging(cli: &Cli) {
    let mut config = LogConfig::default();

    if cli.quiet {
        config = config.with_level(Level::ERROR);
    } else {
        match cli.verbose {
            0 => {}
            1 => config = config.with_filter("warden=debug".to_string()),
            _ => config = config.with_filter("warden=trace".to_string()),
        }
    }

    if let Some(level) = cli.log_level.as_deref().and_then(logging::parse_level) {
        config = config.with_level(level);
    }
    if let Some(format) = cli.log_format.as_deref().and_then(|f| f.parse().ok()) {
        config = config.with_format(format);
    }
    if let Some(path) = &cli.log_file {
        config = config.with_file(path.clone());
    }

    logging::init(config.with_env_overrides());
}

/// Supervise a pool until the signal loop decides to exit.
fn cmd_run(args: &RunArgs) -> Result<()> {
    let mut worker_handler = WorkerHandler::new(
        &args.name,
        &args.worker_class,
        cli::parse_action_signals(&args.action_signals)?,
    )?;
    if !args.preamble.is_empty() {
        worker_handler = worker_handler.with_preamble(&args.preamble.join("\n"))?;
    }
    if !args.load_path.is_empty() {
        worker_handler = worker_handler.with_load_path(args.load_path.clone());
    }

    let pool = Pool::new(
        PoolConfig {
            name: args.name.clone(),
            size: args.size,
            options: cli::parse_options(&args.options)?,
        },
        worker_handler,
    );

    let mappings = cli::parse_signal_mappings(&args.signals)?;
    info!(
        pool = %args.name,
        size = args.size,
        class = %args.worker_class,
        "Supervisor starting"
    );

    let mut signals = SignalHandler::start(mappings, pool)?;
    let mut pool = signals.join()?;
    pool.drain(Duration::from_secs(args.grace_timeout))?;

    info!(pool = %args.name, "Supervisor exiting");
    Ok(())
}

/// Child-side entry: run the named worker class to completion.
fn cmd_worker(args: &WorkerArgs) -> Result<()> {
    worker::run_worker(&args.class, &args.pool)?;
    Ok(())
}
