//! Built-in named jobs for the `run` subcommand.
//!
//! Spec.md §9 treats "load a user script and call an async entry point on
//! it" as a CLI-layer plugin concern the core is oblivious to. Rather than
//! build a dlopen/wasm plugin ABI out of proportion to that scope (Open
//! Question decision in DESIGN.md), `run` dispatches to one of a small
//! fixed set of named jobs built from the same per-device operations the
//! original's `luxminer.py` module exposes.

use fleetctl::config::Config;
use fleetctl::error::LaunchFailure;
use fleetctl::params::Param;
use fleetctl::session;
use serde_json::Value;

/// One named per-device routine the `run` subcommand can drive across a
/// fleet. Returns the job's result as a `Value` so it serializes uniformly
/// regardless of which job ran.
pub async fn run_job(name: &str, host: String, port: u16, config: Config) -> Result<Value, LaunchFailure> {
    let address = (host.clone(), port);
    let result = match name {
        "version" => job_version(&host, port, &config).await,
        "summary" => job_summary(&host, port, &config).await,
        "health" => job_health(&host, port, &config).await,
        other => {
            return Err(LaunchFailure::Err {
                address,
                brief: format!("unknown job '{other}'"),
                trace: "valid jobs: version, summary, health".to_string(),
            })
        }
    };
    result.map_err(|e| LaunchFailure::from_connection_error(address, &e))
}

async fn job_version(
    host: &str,
    port: u16,
    config: &Config,
) -> Result<Value, fleetctl::error::ConnectionError> {
    let env = session::rexec(host, port, "version", Param::none(), config).await?;
    let address = (host.to_string(), port);
    Ok(env.validate_field(&address, "VERSION", 1, 1)?.unwrap_or(Value::Null))
}

async fn job_summary(
    host: &str,
    port: u16,
    config: &Config,
) -> Result<Value, fleetctl::error::ConnectionError> {
    let env = session::rexec(host, port, "summary", Param::none(), config).await?;
    let address = (host.to_string(), port);
    Ok(env
        .validate_field(&address, "SUMMARY", 0, usize::MAX)?
        .unwrap_or(Value::Null))
}

/// A coarse health check: the device's ATM autotuner status, used as a
/// stand-in for "is this board behaving" the way the original's
/// `luxminer.get_atm` call sites use it.
async fn job_health(
    host: &str,
    port: u16,
    config: &Config,
) -> Result<Value, fleetctl::error::ConnectionError> {
    let env = session::rexec(host, port, "atm", Param::none(), config).await?;
    let address = (host.to_string(), port);
    Ok(env.validate_field(&address, "ATM", 0, usize::MAX)?.unwrap_or(Value::Null))
}
