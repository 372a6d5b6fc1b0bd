//! Process entry point for `rotor` (spec §2 item 11): loads configuration,
//! constructs the two registries and the orchestration engine, starts the
//! webhook/admin HTTP surfaces, and runs the engine loop for the life of
//! the process.
//!
//! There is no persisted state to drain on shutdown (spec §6, "Persisted
//! state: none") — a SIGINT/SIGTERM just ends the process; the next start
//! re-clones and rebuilds everything from scratch, which is exactly the
//! cold-start behavior the engine is designed around.

mod http;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rotor_core::adapters::{DockerCliRuntime, GitCliVcs};
use rotor_core::config::EngineConfig;
use rotor_core::intake::EventIntake;
use rotor_core::Engine;

/// continuous deployment control plane
#[derive(Parser)]
#[command(name = "rotor", about = "watches repos, rebuilds images, rolls containers", version)]
struct Cli {
    /// Path to the static project list (JSON, spec §4.8).
    #[arg(long, default_value = "rotor.projects.json")]
    projects: PathBuf,

    /// Path to the scalar tunables file (`key=value`, spec §4.8).
    #[arg(long, default_value = "rotor.conf")]
    tunables: PathBuf,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("rotor: fatal: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = EngineConfig::load(&cli.projects, &cli.tunables)
        .map_err(|e| anyhow::anyhow!(e.to_string()))
        .context("loading configuration")?;

    init_logging(&config.log_level);
    info!(
        projects = config.projects.len(),
        webhook_listen = %config.webhook_listen,
        admin_listen = %config.admin_listen,
        "rotor starting"
    );

    let runtime = DockerCliRuntime::new(config.retry.build_timeout, config.retry.exec_timeout);
    runtime
        .preflight()
        .context("docker daemon preflight check failed")?;

    let vcs = Arc::new(GitCliVcs::new(config.retry.pull_timeout, config.retry.exec_timeout));
    let runtime = Arc::new(runtime);
    let intake = EventIntake::new();
    let sender = intake.sender();

    let webhook_addr = config.webhook_listen.clone();
    let admin_addr = config.admin_listen.clone();

    let mut engine = Engine::new(config, vcs, runtime, sender.clone());
    engine.bootstrap();
    let engine = Arc::new(Mutex::new(engine));

    // The engine loop owns the receiving half of the intake queue and is
    // the sole mutator of engine state; everything else only ever reads
    // through the same mutex or posts events through a cloned sender.
    let engine_for_loop = engine.clone();
    let engine_thread = thread::spawn(move || {
        while let Some(event) = intake.recv() {
            let mut guard = engine_for_loop.lock().expect("engine mutex poisoned");
            if let Err(e) = guard.dispatch_event(event) {
                warn!(error = %e, "event dispatch failed");
                if e.is_fatal() {
                    error!("fatal error, engine loop stopping");
                    break;
                }
            }
        }
    });

    let webhook_sender = sender.clone();
    let webhook_thread = thread::spawn(move || {
        if let Err(e) = http::run_webhook_server(&webhook_addr, webhook_sender) {
            error!(error = %e, "webhook listener exited");
        }
    });

    let admin_engine = engine.clone();
    let admin_sender = sender;
    let admin_thread = thread::spawn(move || {
        if let Err(e) = http::run_admin_server(&admin_addr, admin_engine, admin_sender) {
            error!(error = %e, "admin listener exited");
        }
    });

    // All three threads run for the life of the process; a panic or return
    // from any of them (listener bind failure, fatal engine error) is the
    // signal to stop. Ordinary shutdown is an external SIGINT/SIGTERM.
    let _ = engine_thread.join();
    let _ = webhook_thread.join();
    let _ = admin_thread.join();
    Ok(())
}

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_defaults() {
        let cli = Cli::parse_from(["rotor"]);
        assert_eq!(cli.projects, PathBuf::from("rotor.projects.json"));
        assert_eq!(cli.tunables, PathBuf::from("rotor.conf"));
    }

    #[test]
    fn cli_parses_overrides() {
        let cli = Cli::parse_from([
            "rotor",
            "--projects",
            "/etc/rotor/projects.json",
            "--tunables",
            "/etc/rotor/rotor.conf",
        ]);
        assert_eq!(cli.projects, PathBuf::from("/etc/rotor/projects.json"));
        assert_eq!(cli.tunables, PathBuf::from("/etc/rotor/rotor.conf"));
    }
}
