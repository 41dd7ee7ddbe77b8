//! `megg` – MEGG egg-sorting controller service.
//!
//! 1. Loads `~/.megg/config.toml` (or `$MEGG_CONFIG`) plus environment
//!    overrides.
//! 2. Connects to the controller board, falling back to the simulated board
//!    when none answers.
//! 3. Starts the coordinator task and the Connection Hub.
//! 4. On **Ctrl-C** stops accepting clients, halts any running batch and
//!    releases the serial port.

mod config;

use std::process::ExitCode;

use colored::Colorize;
use tracing::{error, info, warn};

use megg_cockpit::ConnectionHub;
use megg_hal::Link;
use megg_middleware::EventBus;
use megg_runtime::{Coordinator, CoordinatorService, init_tracing};
use megg_types::{LinkMode, LinkStatus};

#[tokio::main]
async fn main() -> ExitCode {
    let _telemetry = init_tracing("megg");

    print_banner();

    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };
    info!(path = %config::config_path().display(), ?cfg, "configuration loaded");

    let (messages, rejected) = cfg.message_table();
    for e in &rejected {
        warn!(error = %e, "ignoring calibration message override");
    }

    // ── Hardware link ─────────────────────────────────────────────────────
    let link = Link::connect_with(&cfg.link_settings()).await;
    print_link(&link.status());

    // ── Coordinator + hub ─────────────────────────────────────────────────
    let coordinator = Coordinator::new(link, messages, cfg.work.clone());
    let (handle, task) = CoordinatorService::spawn(coordinator, EventBus::default(), cfg.tick());

    let hub = ConnectionHub::new(handle.clone(), cfg.hub_config());
    let listener = match hub.bind().await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, "cannot start connection hub");
            println!("{}: {}", "Startup failed".red().bold(), e);
            let _ = handle.shutdown().await;
            let _ = task.await;
            return ExitCode::FAILURE;
        }
    };
    println!(
        "  Listening on {}",
        format!("ws://{}:{}", cfg.host, cfg.port).bold()
    );
    println!("  Press {} to stop.\n", "Ctrl-C".bold());

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
    };

    let served = hub.serve(listener, shutdown).await;

    if let Err(e) = handle.shutdown().await {
        warn!(error = %e, "coordinator already stopped");
    }
    if let Err(e) = task.await {
        error!(error = %e, "coordinator task failed");
    }

    match served {
        Ok(()) => {
            println!("{}", "  ✓ Hardware released. Bye.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "connection hub failed");
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"    __  ___ ______ ______ ______"#.bold().yellow());
    println!("{}", r#"   /  |/  // ____// ____// ____/"#.bold().yellow());
    println!("{}", r#"  / /|_/ // __/  / / __ / / __  "#.bold().yellow());
    println!("{}", r#" / /  / // /___ / /_/ // /_/ /  "#.bold().yellow());
    println!("{}", r#"/_/  /_//_____/ \____/ \____/   "#.bold().yellow());
    println!();
    println!(
        "  {} {}",
        "MEGG".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Egg sorting controller");
    println!();
}

fn print_link(status: &LinkStatus) {
    match (status.mode, &status.port) {
        (LinkMode::Real, Some(port)) => {
            println!("  Controller board on {}", port.bold().green());
        }
        _ => {
            let detail = status.detail.as_deref().unwrap_or("simulation requested");
            println!(
                "  Controller board {} ({})",
                "simulated".yellow(),
                detail.dimmed()
            );
        }
    }
}
