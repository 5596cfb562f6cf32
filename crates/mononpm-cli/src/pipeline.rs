//! The per-package step sequence behind `build`, `install`, `link` and `run`.

use anyhow::{Context, Result};
use mononpm_pkg::{
    build_queue, materialize, synchronize, CommandOutput, CommandRunner, LifecycleCommand,
    Registry,
};
use tracing::debug;

/// A top-level action applied to every package in queue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Synchronize, install, link and build.
    Build,
    /// Synchronize, install and link.
    Install,
    /// Synchronize and link.
    Link,
    /// Run a named script, nothing else.
    Run(String),
}

/// One step of an action for a single package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Synchronize,
    Command(LifecycleCommand),
    Materialize,
}

impl Action {
    /// The steps run for each package, in order.
    #[must_use]
    pub fn steps(&self) -> Vec<Step> {
        match self {
            Self::Build => vec![
                Step::Synchronize,
                Step::Command(LifecycleCommand::Install),
                Step::Materialize,
                Step::Command(LifecycleCommand::Build),
            ],
            Self::Install => vec![
                Step::Synchronize,
                Step::Command(LifecycleCommand::Install),
                Step::Materialize,
            ],
            Self::Link => vec![Step::Synchronize, Step::Materialize],
            Self::Run(script) => vec![Step::Command(LifecycleCommand::Script(script.clone()))],
        }
    }
}

/// Drives an action over the whole workspace, one package and one step at a
/// time.
pub struct Pipeline<'a> {
    registry: &'a mut Registry,
    runner: &'a mut dyn CommandRunner,
    verbose: bool,
}

impl<'a> Pipeline<'a> {
    pub fn new(registry: &'a mut Registry, runner: &'a mut dyn CommandRunner) -> Self {
        Self {
            registry,
            runner,
            verbose: false,
        }
    }

    /// Echo captured output of successful install and build commands.
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Run `action` for every package and return the processed names.
    ///
    /// Stops at the first failing step; the error of a failed command is a
    /// [`mononpm_pkg::RunError`] carrying the captured output.
    pub fn run(&mut self, action: &Action) -> Result<Vec<String>> {
        let queue = build_queue(self.registry).context("Failed to compute build queue")?;
        debug!(?queue, ?action, "starting");

        let steps = action.steps();
        let mut processed = Vec::with_capacity(queue.len());

        for name in queue {
            println!("Package: {name}");
            for step in &steps {
                self.run_step(&name, step)?;
            }
            processed.push(name);
        }

        Ok(processed)
    }

    fn run_step(&mut self, name: &str, step: &Step) -> Result<()> {
        match step {
            Step::Synchronize => {
                let report = synchronize(self.registry, name)
                    .with_context(|| format!("Failed to update manifest of `{name}`"))?;
                if report.changed {
                    debug!(
                        package = name,
                        path = %report.manifest_path.display(),
                        "optionalDependencies updated"
                    );
                }
            }
            Step::Materialize => {
                println!(">> link");
                materialize(self.registry, name)
                    .with_context(|| format!("Failed to link dependencies of `{name}`"))?;
            }
            Step::Command(command) => {
                println!(">> {} {command}", self.registry.settings().client);
                let dir = self
                    .registry
                    .get(name)
                    .map(|package| package.path.clone())
                    .with_context(|| format!("Package `{name}` disappeared from the registry"))?;

                let output = self.runner.run(&dir, command)?;
                if self.verbose || matches!(command, LifecycleCommand::Script(_)) {
                    echo(&output);
                }
            }
        }
        Ok(())
    }
}

/// Print captured command output.
pub fn echo(output: &CommandOutput) {
    if !output.stdout.is_empty() {
        println!("{}", output.stdout.trim_end());
    }
    if !output.stderr.is_empty() {
        eprintln!("{}", output.stderr.trim_end());
    }
}
