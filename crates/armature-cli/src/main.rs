//! `armature-cli` – Armature workbench
//!
//! This binary drives one robot and one teleoperator from the terminal.  It:
//!
//! 1. Loads `~/.armature/config.toml`, writing a simulated default setup on
//!    first run.
//! 2. Resolves the configured device types through the
//!    [`HardwareRegistry`][armature_hal::HardwareRegistry].
//! 3. Drops the user into an **interactive REPL** with slash-commands
//!    (`/connect`, `/calibrate`, `/observe`, `/teleop`, `/help`).
//! 4. Intercepts **Ctrl-C** to stop teleoperation and release the devices.

mod config;
mod operator;
mod repl;
mod telemetry;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

use armature_hal::{HardwareRegistry, Operator};

use crate::operator::StdinOperator;
use crate::repl::Session;

fn main() {
    let _guard = telemetry::init_tracing("armature");

    print_banner();

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping motion …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; Ctrl-C will not stop teleoperation");
    }

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Wrote a simulated setup to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };

    let registry = HardwareRegistry::with_builtin();
    println!(
        "  Robot        : {} ({})",
        cfg.robot.kind.bold(),
        registry.robot_types().join(", ").dimmed()
    );
    println!(
        "  Teleoperator : {} ({})",
        cfg.teleop.kind.bold(),
        registry.teleoperator_types().join(", ").dimmed()
    );
    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    let operator_shutdown = shutdown.clone();
    let session = Session::new(
        cfg,
        registry,
        shutdown.clone(),
        Box::new(move || -> Box<dyn Operator> {
            Box::new(StdinOperator::new(operator_shutdown.clone()))
        }),
    );
    repl::run(session, shutdown);
}

fn print_banner() {
    println!();
    println!("{}", r#"   ___                   __               "#.bold().cyan());
    println!("{}", r#"  / _ | ______ _  ___ _ / /_ __ __ ____ ___"#.bold().cyan());
    println!("{}", r#" / __ |/ __/  ' \/ _ `// __// // // __// -_)"#.bold().cyan());
    println!("{}", r#"/_/ |_/_/ /_/_/_/\_,_/ \__/ \_,_//_/   \__/ "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Armature".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Robot hardware workbench");
    println!();
}
