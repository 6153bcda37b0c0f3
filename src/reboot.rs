//! Reboot handling
//!
//! A reboot boundary ends the run successfully. The rebooter either asks the
//! host to reboot or tells the operator to do it; in both cases resumption
//! relies on re-invocation and the progress marker.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::BootstrapError;
use crate::host::{CommandRunner, CommandSpec};

#[async_trait]
pub trait Rebooter: Send + Sync {
    /// Called once the marker for `stage` has been persisted
    async fn reboot(&self, stage: &str) -> Result<(), BootstrapError>;
}

/// Reboots the host through systemd
pub struct SystemRebooter {
    runner: Arc<dyn CommandRunner>,
}

impl SystemRebooter {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Rebooter for SystemRebooter {
    async fn reboot(&self, stage: &str) -> Result<(), BootstrapError> {
        info!("Rebooting host after stage '{}'", stage);
        let spec = CommandSpec::new("systemctl").arg("reboot");
        self.runner.run(&spec).await?.check(&spec)?;
        Ok(())
    }
}

/// Leaves the reboot to the operator
#[derive(Debug, Default)]
pub struct ManualRebooter;

#[async_trait]
impl Rebooter for ManualRebooter {
    async fn reboot(&self, stage: &str) -> Result<(), BootstrapError> {
        warn!(
            "Stage '{}' requires a reboot. Reboot the host and re-run gpu-host-bootstrap to continue.",
            stage
        );
        Ok(())
    }
}
