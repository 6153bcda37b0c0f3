//! Group membership module

use tracing::{debug, info};

use crate::BootstrapError;
use crate::context::RunContext;
use crate::host::CommandRunner;

/// Check whether `username` is a member of `group`
///
/// Read-only; safe to call from an idempotency predicate.
pub async fn is_member(
    runner: &dyn CommandRunner,
    ctx: &RunContext,
    username: &str,
    group: &str,
) -> Result<bool, BootstrapError> {
    let spec = ctx.command("id").args(["-nG", username]);
    let output = runner.run(&spec).await?.check(&spec)?;

    let member = output.stdout.split_whitespace().any(|g| g == group);
    debug!("User {} in group {}: {}", username, group, member);
    Ok(member)
}

/// Numeric user id of `username`
pub async fn user_id(
    runner: &dyn CommandRunner,
    ctx: &RunContext,
    username: &str,
) -> Result<u32, BootstrapError> {
    let spec = ctx.command("id").args(["-u", username]);
    let output = runner.run(&spec).await?.check(&spec)?;

    output.stdout.trim().parse().map_err(|_| {
        BootstrapError::command(
            spec.display(),
            output.status,
            format!("unexpected output: {:?}", output.stdout),
        )
    })
}

/// Create a group, tolerating one that already exists
pub async fn ensure_group(
    runner: &dyn CommandRunner,
    ctx: &RunContext,
    name: &str,
) -> Result<(), BootstrapError> {
    let spec = ctx.command("groupadd").arg(name);
    let output = runner.run(&spec).await?;

    // Exit code 9 means group already exists, which is fine
    if !output.success() && output.status != Some(9) {
        return Err(BootstrapError::command(
            spec.display(),
            output.status,
            output.stderr,
        ));
    }

    Ok(())
}

/// Add a user to a group
pub async fn add_user_to_group(
    runner: &dyn CommandRunner,
    ctx: &RunContext,
    username: &str,
    group: &str,
) -> Result<(), BootstrapError> {
    info!("Adding user {} to group {}", username, group);

    let spec = ctx
        .command("usermod")
        .args(["--append", "--groups", group, username]);
    runner.run(&spec).await?.check(&spec)?;

    Ok(())
}
