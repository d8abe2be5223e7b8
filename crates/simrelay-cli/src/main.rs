//! `simrelay` – simulator ⇄ message-bus relay
//!
//! 1. Loads `~/.simrelay/config.toml` (or `$SIMRELAY_CONFIG`), falling back
//!    to defaults, then applies `SIMRELAY_*` overrides.
//! 2. Starts the relay on the configured address and serves one simulator
//!    client at a time until Ctrl-C.
//!
//! `simrelay init` writes the default configuration file and exits.

mod config;
mod telemetry;

use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use tracing::{error, info, warn};

use simrelay_middleware::{shutdown_channel, EventBus, Relay};
use simrelay_types::RelayError;

fn main() -> ExitCode {
    let _telemetry = telemetry::init_tracing("simrelay");

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None => {}
        Some("init") => return write_default_config(),
        Some("-h" | "--help" | "help") => {
            print_usage();
            return ExitCode::SUCCESS;
        }
        Some(other) => {
            eprintln!("{}: unknown argument `{}`", "Error".red(), other);
            print_usage();
            return ExitCode::FAILURE;
        }
    }

    print_banner();

    let cfg = match config::resolve() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start Tokio runtime".red(), e);
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(run(cfg))
}

async fn run(cfg: config::Config) -> ExitCode {
    let (shutdown, mut stopped) = shutdown_channel();
    let shutdown = Arc::new(shutdown);

    let on_ctrlc = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        on_ctrlc.trigger();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    let bus = Arc::new(EventBus::default());
    let handle = match Relay::start(bus, cfg.relay_options(), shutdown.subscribe()).await {
        Ok(handle) => handle,
        Err(e @ RelayError::Bind { .. }) => {
            error!(error = %e, "Failed to bind relay listener");
            eprintln!("{}: {}", "Error".red().bold(), e);
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!(error = %e, "Relay failed to start");
            eprintln!("{}: {}", "Error".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    println!(
        "  Listening on {} ({} framing)",
        handle.local_addr().to_string().bold(),
        cfg.framing
    );
    for entry in &cfg.subscriptions {
        println!("    • {} [{}]", entry.topic.bold(), entry.shape);
    }
    println!();

    stopped.wait().await;
    info!("Shutting down server...");
    handle.join().await;
    println!("{}", "  ✓ Relay stopped.".green());
    ExitCode::SUCCESS
}

fn write_default_config() -> ExitCode {
    let path = config::config_path();
    if path.exists() {
        println!(
            "  Config already exists at {}",
            path.display().to_string().bold()
        );
        return ExitCode::SUCCESS;
    }
    match config::save_to(&config::Config::default(), &path) {
        Ok(()) => {
            println!(
                "  {} Config saved to {}",
                "✓".green().bold(),
                path.display().to_string().bold()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {}", "Error saving config".red(), e);
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    println!("Usage: simrelay [init]");
    println!();
    println!("  (no args)   run the relay until Ctrl-C");
    println!("  init        write the default config to {}", config::config_path().display());
}

fn print_banner() {
    println!();
    println!(
        "  {} {}",
        "simrelay".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Simulator ⇄ message-bus TCP relay");
    println!();
}
