//! `fleetctl` command-line surface: argument parsing, address-selection
//! resolution, and the two subcommands (`exec`, `run`).
//!
//! Grounded on `examples/clawde-io-apps/daemon/src/main.rs`'s `clap::Parser`
//! + `Subcommand` derive shape (global flags, `Option<Command>`). Selection/
//! command flags and exit-code contract grounded on spec.md §6 and
//! `examples/original_source/src/luxos/scripts/luxos_run.py` /
//! `scripts/luxos.py`.

pub mod jobs;

use fleetctl::addr::{self, Endpoint};
use fleetctl::config::{self, Config, TomlConfig};
use fleetctl::params::Param;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;

/// Marks an `anyhow::Error` as a CLI argument/selection error rather than a
/// runtime failure, so `main` can map it to exit code 2 (spec §6: "2
/// argument error").
#[derive(Debug)]
pub struct ArgError(pub String);

impl fmt::Display for ArgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ArgError {}

/// `true` if `err` (or anything it wraps) is an [`ArgError`] — used by
/// `main` to pick exit code 2 over a generic failure exit code.
pub fn is_argument_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ArgError>().is_some()
}

macro_rules! arg_bail {
    ($($arg:tt)*) => {
        return Err(anyhow::Error::new(ArgError(format!($($arg)*))))
    };
}

#[derive(Parser)]
#[command(
    name = "fleetctl",
    about = "Control-plane client for a fleet of LuxOS-style mining devices",
    version
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Increase log verbosity (repeatable).
    #[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Decrease log verbosity (repeatable).
    #[arg(short = 'q', action = clap::ArgAction::Count, global = true)]
    pub quiet: u8,

    /// Path to a fleetctl TOML config file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Send one command to every selected device.
    Exec(ExecArgs),
    /// Run a built-in named job across every selected device.
    Run(RunArgs),
}

#[derive(clap::Args)]
pub struct Selection {
    /// Address expression (`H`, `H:P`, `H1-H2`, comma-joined); repeatable.
    #[arg(long = "range")]
    pub range: Vec<String>,

    /// Load addresses from a CSV or YAML file.
    #[arg(long = "ipfile")]
    pub ipfile: Option<PathBuf>,

    /// Legacy range start (paired with --range-end).
    #[arg(long = "range-start")]
    pub range_start: Option<String>,

    /// Legacy range end (paired with --range-start).
    #[arg(long = "range-end")]
    pub range_end: Option<String>,

    /// Default port for addresses with no explicit port.
    #[arg(long, default_value_t = 4028)]
    pub port: u16,
}

#[derive(clap::Args)]
pub struct Tuning {
    /// Per-attempt timeout, in seconds.
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Maximum retries per command body (and, separately, per session acquisition).
    #[arg(long)]
    pub retries: Option<u32>,

    /// Delay between retries, in seconds.
    #[arg(long = "retries-delay")]
    pub retries_delay: Option<f64>,

    /// Addresses per concurrent batch (0 or unset = all at once).
    #[arg(long)]
    pub batch: Option<usize>,
}

#[derive(clap::Args)]
pub struct OutputFlags {
    /// Print every per-device result, verbosely.
    #[arg(long)]
    pub all: bool,

    /// Print machine-readable JSON instead of a human summary.
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args)]
pub struct ExecArgs {
    #[command(flatten)]
    pub selection: Selection,

    #[command(flatten)]
    pub tuning: Tuning,

    #[command(flatten)]
    pub output: OutputFlags,

    /// Command name from the catalog, e.g. `version`, `profileset`.
    #[arg(long = "cmd")]
    pub cmd: String,

    /// Positional parameter values. All plain values or all `k=v` pairs —
    /// never mixed (spec §6).
    #[arg(long = "params", num_args = 0..)]
    pub params: Vec<String>,
}

#[derive(clap::Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub selection: Selection,

    #[command(flatten)]
    pub tuning: Tuning,

    #[command(flatten)]
    pub output: OutputFlags,

    /// Name of a built-in job (see `src/cli/jobs.rs`).
    pub job: String,
}

/// Parse `--params` into a [`Param`]: all-`k=v` becomes a map, all-plain
/// becomes a list, empty becomes null. Mixed forms are an argument error
/// (exit code 2).
pub fn parse_params(values: &[String]) -> Result<Param> {
    if values.is_empty() {
        return Ok(Param::none());
    }
    let kv_count = values.iter().filter(|v| v.contains('=')).count();
    if kv_count != 0 && kv_count != values.len() {
        arg_bail!("--params values must be all positional or all key=value, never mixed");
    }
    if kv_count == values.len() {
        let pairs: Result<Vec<(String, Value)>> = values
            .iter()
            .map(|v| {
                let (k, val) = v
                    .split_once('=')
                    .context("--params entry missing '=' despite kv detection")?;
                Ok((k.to_string(), Value::String(val.to_string())))
            })
            .collect();
        Ok(Param::map(pairs?))
    } else {
        Ok(Param::list(values.iter().cloned()))
    }
}

/// Resolve a [`Selection`] into the address list the fleet runner should
/// drive, applying legacy `--range-start`/`--range-end` and file loaders.
pub fn resolve_selection(selection: &Selection) -> Result<Vec<(String, u16)>> {
    let mut endpoints: Vec<Endpoint> = Vec::new();

    for expr in &selection.range {
        match addr::iter_ip_ranges(expr, Some(selection.port)) {
            Ok(parsed) => endpoints.extend(parsed),
            Err(e) => arg_bail!("invalid --range expression '{expr}': {e}"),
        }
    }

    if let (Some(start), Some(end)) = (&selection.range_start, &selection.range_end) {
        let legacy_expr = format!("{start}-{end}");
        match addr::iter_ip_ranges(&legacy_expr, Some(selection.port)) {
            Ok(parsed) => endpoints.extend(parsed),
            Err(e) => arg_bail!("invalid --range-start/--range-end: {e}"),
        }
    }

    if let Some(path) = &selection.ipfile {
        let loaded = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => addr::load_yaml(path, selection.port),
            _ => addr::load_csv(path, selection.port),
        };
        match loaded {
            Ok(parsed) => endpoints.extend(parsed),
            Err(e) => arg_bail!("failed to load {}: {e}", path.display()),
        }
    }

    if endpoints.is_empty() {
        arg_bail!("no addresses selected: use --range, --range-start/--range-end, or --ipfile");
    }

    Ok(endpoints
        .into_iter()
        .map(|(host, port)| (host.clone(), port.unwrap_or(selection.port)))
        .collect())
}

/// Resolve the effective [`Config`] for a subcommand invocation from CLI
/// tuning flags, an optional config file, and built-in defaults.
pub fn resolve_config(args: &Args, tuning: &Tuning) -> Result<(Config, u16)> {
    let toml: Option<TomlConfig> = match &args.config {
        Some(path) => {
            let loaded = config::load_toml(path);
            if loaded.is_none() {
                arg_bail!("config file '{}' not found or unparseable", path.display());
            }
            loaded
        }
        None => None,
    };

    Ok(config::resolve(
        toml.as_ref(),
        None,
        tuning.timeout,
        tuning.retries,
        tuning.retries_delay,
    ))
}

/// Verbosity delta from `-v`/`-q` counts, matching `add_arguments_logging`'s
/// `(verbose - quiet)` level-index shift.
pub fn verbosity_delta(args: &Args) -> i32 {
    args.verbose as i32 - args.quiet as i32
}
