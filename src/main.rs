mod aggregate;
mod auth;
mod automation;
mod browser;
mod config;
mod core;
mod credentials;
mod drafter;
mod jobs;
mod navigator;
mod server;
mod session;
mod state;
mod trigger;

#[cfg(test)]
mod testing;

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chromiumoxide=off")),
        )
        .init();

    let mut config_path = PathBuf::from("config.toml");
    let mut command: Option<String> = None;

    // Handle CLI arguments
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--version" | "-V" => {
                println!("chartpilot {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--config" | "-c" => {
                let Some(path) = args.get(i + 1) else {
                    eprintln!("--config requires a path");
                    std::process::exit(2);
                };
                config_path = PathBuf::from(shellexpand::tilde(path).into_owned());
                i += 1;
            }
            "serve" | "run" if command.is_none() => command = Some(args[i].clone()),
            other => {
                eprintln!("Unknown argument: {}\n", other);
                print_help();
                std::process::exit(2);
            }
        }
        i += 1;
    }

    let config = config::AppConfig::load_or_default(&config_path)?;

    // Run async
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    match command.as_deref().unwrap_or("serve") {
        "run" => runtime.block_on(crate::core::run_once(config)),
        _ => runtime.block_on(crate::core::serve(config)),
    }
}

fn print_help() {
    println!("chartpilot {}", env!("CARGO_PKG_VERSION"));
    println!("{}\n", env!("CARGO_PKG_DESCRIPTION"));
    println!("Usage: chartpilot [OPTIONS] [COMMAND]\n");
    println!("Commands:");
    println!("  serve    Start the HTTP API and job worker (default)");
    println!("  run      Run one automation from the trigger file, then wait for Enter");
    println!("\nOptions:");
    println!("  -c, --config <path>  Config file (default: config.toml)");
    println!("  -h, --help           Print help");
    println!("  -V, --version        Print version");
}
