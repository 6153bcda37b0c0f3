//! Package management module
//!
//! Drives apt and dpkg. A failed install is always fatal and carries the
//! package manager's stderr unmodified.

use std::path::Path;
use tracing::{debug, info};

use crate::BootstrapError;
use crate::context::RunContext;
use crate::host::CommandRunner;

/// apt/dpkg front-end bound to one run
pub struct Apt<'a> {
    runner: &'a dyn CommandRunner,
    ctx: &'a RunContext,
}

impl<'a> Apt<'a> {
    pub fn new(runner: &'a dyn CommandRunner, ctx: &'a RunContext) -> Self {
        Self { runner, ctx }
    }

    /// Refresh the package index
    pub async fn update(&self) -> Result<(), BootstrapError> {
        info!("Refreshing package index");
        let spec = self.ctx.command("apt-get").arg("update");
        self.runner.run(&spec).await?.check(&spec)?;
        Ok(())
    }

    /// Install packages
    pub async fn install(&self, packages: &[String]) -> Result<(), BootstrapError> {
        if packages.is_empty() {
            return Ok(());
        }

        info!("Installing {} packages", packages.len());
        debug!("Packages: {:?}", packages);

        let spec = self
            .ctx
            .command("apt-get")
            .args(["install", "-y", "--no-install-recommends"])
            .args(packages.iter().cloned());
        let output = self.runner.run(&spec).await?;

        if !output.success() {
            return Err(BootstrapError::package_install(packages, output.stderr));
        }

        info!("Successfully installed {} packages", packages.len());
        Ok(())
    }

    /// Install a local `.deb` file
    pub async fn install_deb(&self, path: &Path) -> Result<(), BootstrapError> {
        let file = path.to_string_lossy().into_owned();
        info!("Installing {}", file);

        let spec = self.ctx.command("dpkg").args(["-i", file.as_str()]);
        let output = self.runner.run(&spec).await?;
        if !output.success() {
            return Err(BootstrapError::package_install(&[file], output.stderr));
        }
        Ok(())
    }

    /// Packages from `packages` that dpkg does not report as installed
    ///
    /// Read-only; safe to call from an idempotency predicate.
    pub async fn missing(&self, packages: &[String]) -> Result<Vec<String>, BootstrapError> {
        if packages.is_empty() {
            return Ok(Vec::new());
        }

        let spec = self
            .ctx
            .command("dpkg-query")
            .args(["-W", "-f=${Package} ${Status}\\n"])
            .args(packages.iter().cloned());
        // Exit 1 only means some package is unknown; the output still lists the rest
        let output = self.runner.run(&spec).await?;

        let installed = installed_from_query(&output.stdout);
        let missing: Vec<String> = packages
            .iter()
            .filter(|p| !installed.iter().any(|i| i == *p))
            .cloned()
            .collect();

        debug!("Missing packages: {:?}", missing);
        Ok(missing)
    }
}

/// Parse `dpkg-query -f='${Package} ${Status}\n'` output into installed names
fn installed_from_query(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| {
            let (name, status) = line.trim().split_once(' ')?;
            status.ends_with(" installed").then(|| {
                // Strip an architecture qualifier such as `libc6:amd64`
                name.split(':').next().unwrap_or(name).to_string()
            })
        })
        .collect()
}

/// Add `signed-by` to every unannotated `deb` line of a sources list
pub fn signed_sources(list: &str, keyring: &Path) -> String {
    let keyring = keyring.display();
    let mut out = String::with_capacity(list.len() + 64);
    for line in list.lines() {
        let trimmed = line.trim_start();
        match trimmed.strip_prefix("deb ") {
            Some(rest) if !rest.trim_start().starts_with('[') => {
                out.push_str(&format!("deb [signed-by={keyring}] {}", rest.trim_start()));
            }
            _ => out.push_str(line),
        }
        out.push('\n');
    }
    out
}
