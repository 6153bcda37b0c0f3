//! Resume-after-reboot service unit
//!
//! Renders and installs a oneshot systemd unit that re-invokes the bootstrap
//! on every boot. A finished bootstrap is a no-op, so the unit can stay
//! enabled.

use minijinja::{Environment, context};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::BootstrapError;
use crate::context::RunContext;
use crate::host::CommandRunner;
use crate::state::write_atomic;

/// Unit name installed under `/etc/systemd/system`
pub const UNIT_NAME: &str = "gpu-host-bootstrap.service";

/// Default unit directory
pub const UNIT_DIR: &str = "/etc/systemd/system";

const UNIT_TEMPLATE: &str = r#"[Unit]
Description=GPU host bootstrap (resume after reboot)
Wants=network-online.target
After=network-online.target

[Service]
Type=oneshot
ExecStart={{ exe }}{% if config %} --config {{ config }}{% endif %} --state-dir {{ state_dir }} run
Environment=SUDO_USER={{ user }}
RemainAfterExit=yes
StandardOutput=journal+console
StandardError=journal+console

[Install]
WantedBy=multi-user.target
"#;

/// Inputs for the rendered unit
#[derive(Debug, Clone)]
pub struct ServiceUnit {
    pub exe: PathBuf,
    pub config: Option<PathBuf>,
    pub state_dir: PathBuf,
    /// Baked in because there is no invoking user at boot
    pub user: String,
}

impl ServiceUnit {
    /// Render the unit file
    pub fn render(&self) -> Result<String, BootstrapError> {
        let mut env = Environment::new();
        env.add_template("unit", UNIT_TEMPLATE)?;
        let template = env.get_template("unit")?;

        let rendered = template.render(context! {
            exe => self.exe.display().to_string(),
            config => self.config.as_ref().map(|p| p.display().to_string()),
            state_dir => self.state_dir.display().to_string(),
            user => self.user.as_str(),
        })?;
        Ok(rendered)
    }

    /// Write the unit into `unit_dir` and enable it
    pub async fn install(
        &self,
        runner: &dyn CommandRunner,
        ctx: &RunContext,
        unit_dir: &Path,
    ) -> Result<PathBuf, BootstrapError> {
        let path = unit_dir.join(UNIT_NAME);
        write_atomic(&path, self.render()?.as_bytes()).await?;
        info!("Wrote {}", path.display());

        let reload = ctx.command("systemctl").arg("daemon-reload");
        runner.run(&reload).await?.check(&reload)?;

        let enable = ctx.command("systemctl").args(["enable", UNIT_NAME]);
        runner.run(&enable).await?.check(&enable)?;

        info!("Enabled {}", UNIT_NAME);
        Ok(path)
    }
}
