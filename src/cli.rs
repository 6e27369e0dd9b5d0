//! Command-line interface definitions using clap.

use crate::error::{Result, WardenError};
use crate::supervisor::{ActionList, SignalMap, WorkerHandler, WorkerOptions};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;

/// warden - fixed-size worker-pool supervisor for POSIX hosts
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log level: error, warn, info, debug, trace.
    #[arg(long, env = "WARDEN_LOG_LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Log format: pretty, compact, json.
    #[arg(long, env = "WARDEN_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Log to file (in addition to stderr).
    #[arg(long, env = "WARDEN_LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Supervise a pool of worker subprocesses.
    Run(RunArgs),

    /// Internal worker entry point (spawned by the supervisor).
    #[command(hide = true)]
    Worker(WorkerArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Pool name, used in logs and worker process arguments.
    #[arg(long, default_value = "warden")]
    pub name: String,

    /// Target number of live workers.
    #[arg(short = 'n', long, default_value_t = 4)]
    pub size: usize,

    /// Worker class to spawn.
    #[arg(long, default_value = "sleeper")]
    pub worker_class: String,

    /// Per-worker option as key=value; the value is parsed as JSON when
    /// possible and falls back to a plain string.
    #[arg(long = "opt", value_name = "KEY=VALUE")]
    pub options: Vec<String>,

    /// Environment preamble entry applied to each worker (KEY=VALUE).
    #[arg(long = "preamble", value_name = "KEY=VALUE")]
    pub preamble: Vec<String>,

    /// Extra directory prepended to the workers' PATH.
    #[arg(long = "load-path", value_name = "DIR")]
    pub load_path: Vec<PathBuf>,

    /// Signal mapping as SIG=action[,action...]. Defaults: TERM and INT to
    /// stop_gracefully, QUIT to stop_forcefully, HUP to reload.
    #[arg(long = "signal", value_name = "SIG=ACTIONS")]
    pub signals: Vec<String>,

    /// Action-to-signal override as ACTION=SIG. Defaults:
    /// stop_forcefully=KILL, stop_gracefully=TERM.
    #[arg(long = "action-signal", value_name = "ACTION=SIG")]
    pub action_signals: Vec<String>,

    /// Seconds to wait for workers to exit after the main loop stops.
    #[arg(long, default_value_t = 30)]
    pub grace_timeout: u64,
}

#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Worker class to run.
    #[arg(long)]
    pub class: String,

    /// Owning pool name (for logs and ps output).
    #[arg(long, default_value = "warden")]
    pub pool: String,
}

/// Split a `KEY=VALUE` argument.
fn split_key_value(raw: &str) -> Result<(&str, &str)> {
    raw.split_once('=')
        .map(|(key, value)| (key.trim(), value.trim()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| WardenError::InvalidOption(format!("'{}' is not KEY=VALUE", raw)))
}

/// Parse repeated `--opt` values into the worker options map.
pub fn parse_options(raw: &[String]) -> Result<WorkerOptions> {
    let mut options = WorkerOptions::new();
    for entry in raw {
        let (key, value) = split_key_value(entry)?;
        let value = serde_json::from_str::<Value>(value)
            .unwrap_or_else(|_| Value::String(value.to_string()));
        options.insert(key.to_string(), value);
    }
    Ok(options)
}

/// Parse repeated `--signal` values; empty input yields the default table.
pub fn parse_signal_mappings(raw: &[String]) -> Result<SignalMap> {
    if raw.is_empty() {
        return default_signal_mappings();
    }
    let mut entries = Vec::new();
    for entry in raw {
        let (signal, actions) = split_key_value(entry)?;
        let actions: Vec<String> = actions
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(String::from)
            .collect();
        if actions.is_empty() {
            return Err(WardenError::InvalidOption(format!(
                "signal mapping '{}' names no actions",
                entry
            )));
        }
        entries.push((signal.to_string(), ActionList::from(actions)));
    }
    SignalMap::new(entries)
}

/// The default supervisor signal table.
pub fn default_signal_mappings() -> Result<SignalMap> {
    SignalMap::new(vec![
        ("TERM".to_string(), ActionList::from("stop_gracefully")),
        ("INT".to_string(), ActionList::from("stop_gracefully")),
        ("QUIT".to_string(), ActionList::from("stop_forcefully")),
        ("HUP".to_string(), ActionList::from("reload")),
    ])
}

/// Parse `--action-signal` overrides merged over the canonical defaults.
pub fn parse_action_signals(raw: &[String]) -> Result<Vec<(String, String)>> {
    let mut table = WorkerHandler::canonical_action_signals();
    for entry in raw {
        let (action, signal) = split_key_value(entry)?;
        if let Some(existing) = table.iter_mut().find(|(a, _)| a == action) {
            existing.1 = signal.to_string();
        } else {
            table.push((action.to_string(), signal.to_string()));
        }
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cli_parses_run_defaults() {
        let cli = Cli::try_parse_from(["warden", "run"]).unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.name, "warden");
                assert_eq!(args.size, 4);
                assert_eq!(args.worker_class, "sleeper");
                assert_eq!(args.grace_timeout, 30);
            }
            _ => panic!("expected run subcommand"),
        }
    }

    #[test]
    fn test_cli_parses_worker_subcommand() {
        let cli = Cli::try_parse_from(["warden", "worker", "--class", "ticker"]).unwrap();
        match cli.command {
            Commands::Worker(args) => {
                assert_eq!(args.class, "ticker");
                assert_eq!(args.pool, "warden");
            }
            _ => panic!("expected worker subcommand"),
        }
    }

    #[test]
    fn test_parse_options_types_values() {
        let raw = vec![
            "sleep=2.5".to_string(),
            "label=blue".to_string(),
            "debug=true".to_string(),
        ];
        let options = parse_options(&raw).unwrap();
        assert_eq!(options.get("sleep"), Some(&json!(2.5)));
        assert_eq!(options.get("label"), Some(&json!("blue")));
        assert_eq!(options.get("debug"), Some(&json!(true)));
    }

    #[test]
    fn test_parse_options_rejects_missing_equals() {
        assert!(parse_options(&["nope".to_string()]).is_err());
    }

    #[test]
    fn test_default_signal_mappings_cover_the_canonical_set() {
        use nix::sys::signal::Signal;
        let map = default_signal_mappings().unwrap();
        assert_eq!(
            map.actions(Signal::SIGTERM).unwrap(),
            &["stop_gracefully".to_string()]
        );
        assert_eq!(
            map.actions(Signal::SIGQUIT).unwrap(),
            &["stop_forcefully".to_string()]
        );
        assert_eq!(map.actions(Signal::SIGHUP).unwrap(), &["reload".to_string()]);
    }

    #[test]
    fn test_parse_signal_mappings_with_action_lists() {
        use nix::sys::signal::Signal;
        let raw = vec!["USR2=reload,stop_gracefully".to_string()];
        let map = parse_signal_mappings(&raw).unwrap();
        assert_eq!(
            map.actions(Signal::SIGUSR2).unwrap(),
            &["reload".to_string(), "stop_gracefully".to_string()]
        );
        assert!(map.actions(Signal::SIGTERM).is_none());
    }

    #[test]
    fn test_parse_signal_mappings_rejects_empty_actions() {
        assert!(parse_signal_mappings(&["USR2=".to_string()]).is_err());
        assert!(parse_signal_mappings(&["USR2=,".to_string()]).is_err());
    }

    #[test]
    fn test_parse_action_signals_merges_overrides() {
        let table = parse_action_signals(&[
            "stop_gracefully=INT".to_string(),
            "pause=STOP".to_string(),
        ])
        .unwrap();
        assert!(table.contains(&("stop_gracefully".to_string(), "INT".to_string())));
        assert!(table.contains(&("stop_forcefully".to_string(), "KILL".to_string())));
        assert!(table.contains(&("pause".to_string(), "STOP".to_string())));
    }
}
