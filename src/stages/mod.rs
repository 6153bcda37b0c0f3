//! Provisioning stages
//!
//! Stages run in a fixed total order:
//! 1. base-packages - OS package refresh and build tooling
//! 2. gpu-driver - driver autodetect and install (reboot required)
//! 3. compute-toolkit - toolkit install and PATH registration
//! 4. container-runtime - runtime, GPU shim, runtime restart
//! 5. group-membership - target user joins the runtime group
//! 6. python-env - isolated interpreter with numeric/ML libraries
//!
//! Later stages depend on environment state established by earlier ones, so
//! the order is never changed and stages never run in parallel.

pub mod base;
pub mod container_runtime;
pub mod driver;
pub mod group;
pub mod python_env;
pub mod toolkit;

use async_trait::async_trait;
use std::sync::Arc;

use crate::BootstrapError;
use crate::config::BootstrapConfig;
use crate::context::RunContext;
use crate::host::CommandRunner;
use crate::modules::download::Fetcher;

/// What happened when a stage was visited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// The action ran and succeeded
    Applied,
    /// The idempotency predicate held; nothing ran
    AlreadySatisfied,
    /// The action ran and the host must reboot before the next stage
    RebootRequired,
}

/// One ordered unit of host provisioning work
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stable identifier recorded in the progress marker
    fn id(&self) -> &'static str;

    /// Human-readable label for logs
    fn label(&self) -> &'static str;

    /// Whether the host must reboot after this stage's action
    fn requires_reboot(&self) -> bool {
        false
    }

    /// Add this stage's exports to the run context
    ///
    /// Called for every stage at the start of each run, completed or not,
    /// so a resumed run sees the same environment as an uninterrupted one.
    fn contribute_env(&self, _ctx: &mut RunContext) {}

    /// Cheap, side-effect-free check: does this stage's effect already hold?
    async fn is_satisfied(&self, ctx: &RunContext) -> Result<bool, BootstrapError>;

    /// Perform the stage's action
    async fn apply(&self, ctx: &RunContext) -> Result<(), BootstrapError>;
}

/// Build the stage catalogue in its fixed order
pub fn catalogue(
    config: &BootstrapConfig,
    runner: Arc<dyn CommandRunner>,
    fetcher: Fetcher,
) -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(base::BasePackages::new(config.base.clone(), runner.clone())),
        Box::new(driver::GpuDriver::new(config.driver.clone(), runner.clone())),
        Box::new(toolkit::ComputeToolkit::new(
            config.toolkit.clone(),
            runner.clone(),
            fetcher.clone(),
        )),
        Box::new(container_runtime::ContainerRuntime::new(
            config.runtime.clone(),
            runner.clone(),
            fetcher,
        )),
        Box::new(group::GroupMembership::new(config.group.clone(), runner.clone())),
        Box::new(python_env::PythonEnv::new(config.python.clone(), runner)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mock::MockRunner;

    #[test]
    fn test_catalogue_order() {
        let runner: Arc<dyn CommandRunner> = Arc::new(MockRunner::new());
        let stages = catalogue(&BootstrapConfig::default(), runner, Fetcher::new().unwrap());

        let ids: Vec<&str> = stages.iter().map(|s| s.id()).collect();
        assert_eq!(
            ids,
            vec![
                "base-packages",
                "gpu-driver",
                "compute-toolkit",
                "container-runtime",
                "group-membership",
                "python-env",
            ]
        );

        let reboots: Vec<bool> = stages.iter().map(|s| s.requires_reboot()).collect();
        assert_eq!(reboots, vec![false, true, false, false, false, false]);
    }
}
