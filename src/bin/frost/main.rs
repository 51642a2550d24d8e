//! Frost CLI - freeze Python applications into standalone executables

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};
use frost::builder::BuildError;
use frost::hooks::HookError;
use frost::util::diagnostic::{emit, Diagnostic};

fn main() {
    // Parse CLI
    let cli = Cli::parse();
    let color = !cli.no_color;

    if let Err(e) = run(cli) {
        match diagnostic_for(&e) {
            Some(diag) => emit(&diag.with_context(format!("{:#}", e)), color),
            None => eprintln!("error: {:#}", e),
        }
        std::process::exit(1);
    }
}

/// Structured diagnostic for errors that carry one.
fn diagnostic_for(e: &anyhow::Error) -> Option<Diagnostic> {
    if let Some(build) = e.downcast_ref::<BuildError>() {
        return Some(build.to_diagnostic());
    }
    e.downcast_ref::<HookError>().map(HookError::to_diagnostic)
}

fn run(cli: Cli) -> Result<()> {
    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("frost=debug")
    } else {
        EnvFilter::new("frost=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    // Execute command
    match cli.command {
        Commands::Build(args) => commands::build::execute(args, cli.verbose),
        Commands::Inspect(args) => commands::inspect::execute(args),
        Commands::Hooks(args) => commands::hooks::execute(args),
        Commands::Clean(args) => commands::clean::execute(args),
    }
}
