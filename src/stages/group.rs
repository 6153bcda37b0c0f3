//! Group stage - target user joins the container runtime group

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::Stage;
use crate::BootstrapError;
use crate::config::GroupConfig;
use crate::context::RunContext;
use crate::host::CommandRunner;
use crate::modules::groups;

pub struct GroupMembership {
    config: GroupConfig,
    runner: Arc<dyn CommandRunner>,
}

impl GroupMembership {
    pub fn new(config: GroupConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }
}

#[async_trait]
impl Stage for GroupMembership {
    fn id(&self) -> &'static str {
        "group-membership"
    }

    fn label(&self) -> &'static str {
        "Container group membership"
    }

    async fn is_satisfied(&self, ctx: &RunContext) -> Result<bool, BootstrapError> {
        groups::is_member(
            self.runner.as_ref(),
            ctx,
            &ctx.target_user,
            &self.config.name,
        )
        .await
    }

    async fn apply(&self, ctx: &RunContext) -> Result<(), BootstrapError> {
        groups::ensure_group(self.runner.as_ref(), ctx, &self.config.name).await?;
        groups::add_user_to_group(
            self.runner.as_ref(),
            ctx,
            &ctx.target_user,
            &self.config.name,
        )
        .await?;
        info!(
            "{} must log in again for {} membership to take effect",
            ctx.target_user, self.config.name
        );
        Ok(())
    }
}
