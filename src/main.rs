mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Args, Command};
use fleetctl::launch::{launch, CancelSignal, LaunchOptions, Outcome};
use fleetctl::session;
use serde_json::{json, Value};
use std::process::ExitCode;
use tracing::info;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    setup_logging(cli::verbosity_delta(&args));

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            if cli::is_argument_error(&e) {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let cancel = install_ctrl_c_cancel();
    match &args.command {
        Command::Exec(exec_args) => run_exec(&args, exec_args, cancel).await,
        Command::Run(run_args) => run_named_job(&args, run_args, cancel).await,
    }
}

/// Propagate a user interrupt (spec §5: "A user signal is expected to
/// propagate to the runner so it can surface 'canceled'") into a
/// [`CancelSignal`] the fleet runner can race each job against.
fn install_ctrl_c_cancel() -> CancelSignal {
    let (tx, rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received — cancelling in-flight fleet run");
            let _ = tx.send(true);
        }
    });
    rx
}

async fn run_exec(args: &Args, exec_args: &cli::ExecArgs, cancel: CancelSignal) -> Result<ExitCode> {
    let addresses = cli::resolve_selection(&exec_args.selection)?;
    let (config, _) = cli::resolve_config(args, &exec_args.tuning)?;
    let params = cli::parse_params(&exec_args.params)?;

    info!(count = addresses.len(), cmd = %exec_args.cmd, "dispatching command across fleet");

    let cmd = exec_args.cmd.clone();
    let outcomes = launch(
        &addresses,
        move |host, port| {
            let cmd = cmd.clone();
            let params = params.clone();
            let config = config.clone();
            async move {
                session::rexec(&host, port, &cmd, params, &config)
                    .await
                    .map(|env| json!({"id": env.id, "fields": env.fields}))
                    .map_err(|e| {
                        fleetctl::error::LaunchFailure::from_connection_error((host, port), &e)
                    })
            }
        },
        LaunchOptions {
            batch: exec_args.tuning.batch,
            progress: Some(|n: usize| info!(completed = n, "batch finished")),
            cancel: Some(cancel),
        },
    )
    .await;

    report(&addresses, &outcomes, &exec_args.output)
}

async fn run_named_job(args: &Args, run_args: &cli::RunArgs, cancel: CancelSignal) -> Result<ExitCode> {
    let addresses = cli::resolve_selection(&run_args.selection)?;
    let (config, _) = cli::resolve_config(args, &run_args.tuning)?;

    info!(count = addresses.len(), job = %run_args.job, "running named job across fleet");

    let job = run_args.job.clone();
    let outcomes = launch(
        &addresses,
        move |host, port| {
            let job = job.clone();
            let config = config.clone();
            async move { cli::jobs::run_job(&job, host, port, config).await }
        },
        LaunchOptions {
            batch: run_args.tuning.batch,
            progress: Some(|n: usize| info!(completed = n, "batch finished")),
            cancel: Some(cancel),
        },
    )
    .await;

    report(&addresses, &outcomes, &run_args.output)
}

fn report<T: serde::Serialize>(
    addresses: &[(String, u16)],
    outcomes: &[Outcome<T>],
    output: &cli::OutputFlags,
) -> Result<ExitCode> {
    let mut ok = 0usize;
    let mut timeouts = 0usize;
    let mut errs = 0usize;

    for outcome in outcomes {
        match outcome {
            Outcome::Ok(_) => ok += 1,
            Outcome::Timeout { .. } => timeouts += 1,
            Outcome::Err { .. } => errs += 1,
        }
    }

    if output.json {
        let rows: Vec<Value> = addresses
            .iter()
            .zip(outcomes)
            .map(|((host, port), outcome)| outcome_to_json(host, *port, outcome))
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if output.all {
        for ((host, port), outcome) in addresses.iter().zip(outcomes) {
            match outcome {
                Outcome::Ok(v) => println!("{host}:{port} ok {}", serde_json::to_string(v)?),
                Outcome::Timeout { brief, .. } => println!("{host}:{port} timeout {brief}"),
                Outcome::Err { brief, .. } => println!("{host}:{port} error {brief}"),
            }
        }
    } else {
        println!("ok={ok} timeout={timeouts} error={errs} total={}", outcomes.len());
    }

    Ok(if errs == 0 && timeouts == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn outcome_to_json<T: serde::Serialize>(host: &str, port: u16, outcome: &Outcome<T>) -> Value {
    match outcome {
        Outcome::Ok(v) => json!({"host": host, "port": port, "status": "ok", "value": v}),
        Outcome::Timeout { brief, .. } => {
            json!({"host": host, "port": port, "status": "timeout", "brief": brief})
        }
        Outcome::Err { brief, .. } => {
            json!({"host": host, "port": port, "status": "error", "brief": brief})
        }
    }
}

/// Initialize the tracing subscriber once, before any tracing calls, per
/// the teacher's `setup_logging` convention. `delta` is `(-v count) -
/// (-q count)`, shifting the base `info` level up or down.
fn setup_logging(delta: i32) {
    let level = match delta {
        d if d <= -1 => "warn",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(format!("fleetctl={level}"))
        .compact()
        .init();
}
