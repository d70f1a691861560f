//! PowerFlex CSI driver entrypoint
//!
//! Validates the startup configuration, inspects the run mode, and either
//! performs the one-shot pre-init discovery or hands the long-running driver
//! workload to the leadership gate. Every failure is terminal: diagnostics
//! go to stderr, the process exits non-zero, and the cluster scheduler owns
//! restarts.

use clap::Parser;
use std::process;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, reload};

use csi_vxflexos::{
    config, driver, mode, DriverShell, LeadershipGate, LogReloadHandle, PreInitService, RunMode,
    StartupOptions, WorkloadRef, DRIVER_DESCRIPTION, DRIVER_NAME, VERSION,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// PowerFlex (VxFlex OS) Container Storage Interface (CSI) driver
#[derive(Parser, Debug)]
#[command(author, version, about = DRIVER_DESCRIPTION, after_help = driver::USAGE)]
struct Args {
    /// yaml file with array(s) configuration
    #[arg(long, default_value = "")]
    array_config: String,

    /// yaml file with driver config params
    #[arg(long, default_value = "")]
    driver_config_params: String,

    /// boolean to enable leader election
    #[arg(long)]
    leader_election: bool,

    /// namespace where leader election lease will be created
    #[arg(long, default_value = "")]
    leader_election_namespace: String,

    /// absolute path to the kubeconfig file
    #[arg(long, default_value = "")]
    kubeconfig: String,

    /// Health endpoint bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = config::DEFAULT_HEALTH_ADDR)]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Debug off, request/response logging on, irrespective of what the
    // caller has specified.
    mode::enforce_csi_logging_policy();

    let log_handle = init_logging(&args);

    let config = match (StartupOptions {
        array_config: args.array_config,
        driver_config_params: args.driver_config_params,
        kubeconfig: args.kubeconfig,
        leader_election: args.leader_election,
        leader_election_namespace: args.leader_election_namespace,
        health_addr: args.health_addr,
    })
    .validate()
    {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    let run_mode = RunMode::from_env(config.leader_election);

    if run_mode == RunMode::PreInit {
        println!(
            "PowerFlex Container Storage Interface (CSI) Plugin starting in pre-init mode."
        );
        match PreInitService::new(config).pre_init().await {
            Ok(report) => {
                println!("{}", report);
                process::exit(0);
            }
            Err(e) => {
                eprintln!("{}", e);
                process::exit(1);
            }
        }
    }

    info!(driver = DRIVER_NAME, version = VERSION, mode = %run_mode, "starting driver");

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    let workload: WorkloadRef = Arc::new(DriverShell::new(config.clone(), Some(log_handle)));
    let gate = LeadershipGate::new(config);
    if let Err(e) = gate.run(run_mode, workload, shutdown).await {
        error!(error = %e, "driver terminated");
        eprintln!("{}", e);
        process::exit(1);
    }

    info!("driver shutdown complete");
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> LogReloadHandle {
    let filter = driver::env_filter(&args.log_level)
        .unwrap_or_else(|_| driver::env_filter("info").expect("default filter parses"));
    let (filter, handle) = reload::Layer::new(filter);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }

    handle
}

// =============================================================================
// Signal Handling
// =============================================================================

fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("termination signal received");
        shutdown.cancel();
    });
}
