//! mononpm CLI - build, install and link the packages of an npm monorepo in
//! dependency order

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use mononpm_pkg::{build_queue, transitive_local_deps, NpmRunner, Registry, RunError};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod pipeline;

use pipeline::{Action, Pipeline};

#[derive(Parser)]
#[command(name = "mononpm")]
#[command(version)]
#[command(about = "Build npm monorepo packages in dependency order", long_about = None)]
struct Cli {
    /// Workspace root (defaults to the nearest parent with a `packages` list)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Package manager executable (overrides the workspace setting)
    #[arg(long, global = true)]
    client: Option<String>,

    /// Echo command output; repeat for more log detail
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Update manifests, install, link local dependencies and build every package
    Build,

    /// Update manifests, install and link local dependencies
    Install,

    /// Update manifests and link local dependencies
    Link,

    /// Run a script in every package
    Run {
        /// Name of the script
        script: String,
    },

    /// Print the build queue
    Queue,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(output) = e.downcast_ref::<RunError>().and_then(RunError::output) {
                pipeline::echo(output);
            }
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info,mononpm_pkg=debug,mononpm=debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let mut registry = load_registry(cli)?;

    let action = match &cli.command {
        Commands::Build => Action::Build,
        Commands::Install => Action::Install,
        Commands::Link => Action::Link,
        Commands::Run { script } => Action::Run(script.clone()),
        Commands::Queue => return print_queue(&registry, cli.verbose > 0),
    };

    let mut runner = NpmRunner::new(registry.settings().client.clone());
    Pipeline::new(&mut registry, &mut runner)
        .verbose(cli.verbose > 0)
        .run(&action)?;

    Ok(())
}

fn load_registry(cli: &Cli) -> Result<Registry> {
    let mut registry = match &cli.root {
        Some(root) => Registry::load(root)
            .with_context(|| format!("Failed to load workspace at {}", root.display()))?,
        None => {
            let cwd = std::env::current_dir().context("Failed to get current directory")?;
            Registry::find(&cwd).context("Failed to load workspace")?
        }
    };

    if let Some(client) = &cli.client {
        registry.settings_mut().client.clone_from(client);
    }

    tracing::info!(
        root = %registry.root().display(),
        packages = registry.len(),
        "loaded workspace"
    );
    Ok(registry)
}

fn print_queue(registry: &Registry, verbose: bool) -> Result<()> {
    for name in build_queue(registry)? {
        if verbose {
            let deps = transitive_local_deps(registry, &name)?;
            if deps.is_empty() {
                println!("{name}");
            } else {
                println!("{name} <- {}", deps.join(", "));
            }
        } else {
            println!("{name}");
        }
    }
    Ok(())
}
