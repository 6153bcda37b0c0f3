//! gpu-host-bootstrap library
//!
//! Resumable, idempotent bootstrap of a single GPU inference host: driver,
//! compute toolkit, container runtime with GPU shim, group membership and a
//! Python environment.
//!
//! # Design Principles
//!
//! - **Resumable**: a durable progress marker, written atomically after every
//!   stage, is the only thing carried across the driver reboot
//! - **Idempotent**: every stage checks whether its effect already holds
//!   before doing anything
//! - **Fail fast**: any external tool failure aborts the run with its
//!   diagnostics, leaving the marker at the last completed stage

pub mod config;
pub mod context;
pub mod host;
pub mod modules;
pub mod orchestrator;
pub mod reboot;
pub mod stages;
pub mod state;

mod error;

pub use error::BootstrapError;
pub use orchestrator::{Orchestrator, RunOutcome};

use std::sync::Arc;

use crate::config::BootstrapConfig;
use crate::context::RunContext;
use crate::host::{CommandRunner, CommandSpec, SystemRunner};
use crate::modules::deploy;
use crate::modules::download::Fetcher;
use crate::reboot::{ManualRebooter, Rebooter, SystemRebooter};
use crate::state::{MarkerStore, StatePaths};

/// Per-invocation switches that override the config
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Never reboot automatically, even when `auto_reboot` is set
    pub no_reboot: bool,
}

/// Wire the catalogue, marker store and rebooter for this config
pub fn build_orchestrator(
    config: &BootstrapConfig,
    runner: Arc<dyn CommandRunner>,
    options: RunOptions,
) -> Result<Orchestrator, BootstrapError> {
    let stages = stages::catalogue(config, runner.clone(), Fetcher::new()?);
    let store = MarkerStore::new(StatePaths::with_base(&config.state_dir));
    let rebooter: Box<dyn Rebooter> = if config.auto_reboot && !options.no_reboot {
        Box::new(SystemRebooter::new(runner))
    } else {
        Box::new(ManualRebooter)
    };
    Ok(Orchestrator::new(stages, store, rebooter))
}

/// Refuse to run without root; every stage changes system state
pub async fn ensure_root(runner: &dyn CommandRunner) -> Result<(), BootstrapError> {
    let spec = CommandSpec::new("id").arg("-u");
    let output = runner.run(&spec).await?.check(&spec)?;
    if output.stdout.trim() == "0" {
        Ok(())
    } else {
        Err(BootstrapError::UnsupportedHost(
            "must run as root (try sudo)".to_string(),
        ))
    }
}

/// Run the bootstrap on this host
pub async fn run_bootstrap(
    config: &BootstrapConfig,
    options: RunOptions,
) -> Result<RunOutcome, BootstrapError> {
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new());
    ensure_root(runner.as_ref()).await?;

    let mut ctx = RunContext::detect(config).await?;
    let orchestrator = build_orchestrator(config, runner, options)?;
    let outcome = orchestrator.run(&mut ctx).await?;

    if matches!(
        outcome,
        RunOutcome::Completed { .. } | RunOutcome::AlreadyComplete
    ) {
        deploy::report_readiness(&config.deploy);
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mock::MockRunner;

    #[tokio::test]
    async fn test_ensure_root() {
        let runner = MockRunner::new().with_stdout("id -u", "0\n");
        ensure_root(&runner).await.unwrap();

        let runner = MockRunner::new().with_stdout("id -u", "1000\n");
        assert!(matches!(
            ensure_root(&runner).await.unwrap_err(),
            BootstrapError::UnsupportedHost(_)
        ));
    }

    #[test]
    fn test_build_orchestrator() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = BootstrapConfig {
            state_dir: temp.path().to_path_buf(),
            ..Default::default()
        };
        let runner: Arc<dyn CommandRunner> = Arc::new(MockRunner::new());
        let orchestrator = build_orchestrator(&config, runner, RunOptions::default()).unwrap();
        assert_eq!(orchestrator.stages().len(), 6);
        assert_eq!(orchestrator.store().paths().base, temp.path());
    }
}
