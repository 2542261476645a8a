//! x86dbg - debugger configuration tool
//!
//! Validates, creates and locates the debugger configuration file.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use xd_core::DebuggerConfig;

fn usage(program: &str) {
    eprintln!("Usage: {} <command> [args]", program);
    eprintln!("\nCommands:");
    eprintln!("  check <file>   Parse a configuration file and print the effective settings");
    eprintln!("  init [file]    Write a default configuration (default location if omitted)");
    eprintln!("  path           Print the default configuration file location");
}

fn main() -> Result<()> {
    xd_core::logging::init_default();

    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("x86dbg");

    let Some(command) = args.get(1) else {
        usage(program);
        std::process::exit(1);
    };

    match command.as_str() {
        "check" => {
            let Some(path) = args.get(2) else {
                usage(program);
                std::process::exit(1);
            };
            check(&PathBuf::from(path))
        }
        "init" => {
            let path = match args.get(2) {
                Some(path) => PathBuf::from(path),
                None => DebuggerConfig::default_path()?,
            };
            init(&path)
        }
        "path" => {
            println!("{}", DebuggerConfig::default_path()?.display());
            Ok(())
        }
        other => {
            usage(program);
            bail!("Unknown command '{}'", other);
        }
    }
}

fn check(path: &Path) -> Result<()> {
    let config = DebuggerConfig::load_from(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    tracing::info!("Configuration {} is valid", path.display());
    print!("{}", config);
    Ok(())
}

fn init(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    DebuggerConfig::default()
        .save_to(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
