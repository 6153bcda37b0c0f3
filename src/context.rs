//! Per-invocation run context
//!
//! Everything here is recomputed on every run and never persisted: the user
//! that receives group membership, the detected distribution, and the
//! environment exported to child processes.

use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

use crate::BootstrapError;
use crate::config::BootstrapConfig;
use crate::host::CommandSpec;

/// Distribution identity from `/etc/os-release`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distro {
    pub id: String,
    pub version_id: String,
    pub id_like: Vec<String>,
}

impl Distro {
    /// Parse the `KEY=value` lines of an os-release file
    pub fn parse_os_release(content: &str) -> Result<Self, BootstrapError> {
        let mut fields = BTreeMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim().trim_matches('"').trim_matches('\'');
                fields.insert(key.trim().to_string(), value.to_string());
            }
        }

        let id = fields
            .remove("ID")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| BootstrapError::UnsupportedHost("os-release has no ID".to_string()))?;
        let version_id = fields.remove("VERSION_ID").unwrap_or_default();
        let id_like = fields
            .remove("ID_LIKE")
            .map(|v| v.split_whitespace().map(String::from).collect())
            .unwrap_or_default();

        Ok(Self {
            id: id.to_lowercase(),
            version_id,
            id_like,
        })
    }

    /// Read and parse an os-release file
    pub async fn detect(path: &Path) -> Result<Self, BootstrapError> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            BootstrapError::UnsupportedHost(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse_os_release(&content)
    }

    /// Repository slug used by vendor URLs, e.g. `ubuntu2204`
    pub fn repo_slug(&self) -> String {
        format!("{}{}", self.id, self.version_id.replace('.', ""))
    }

    /// Whether apt and dpkg are the native package tools
    pub fn is_debian_family(&self) -> bool {
        self.id == "debian"
            || self.id == "ubuntu"
            || self.id_like.iter().any(|l| l == "debian" || l == "ubuntu")
    }
}

/// Map a Rust target architecture to the vendor repository naming
pub fn repo_arch(arch: &str) -> &str {
    match arch {
        "aarch64" => "sbsa",
        other => other,
    }
}

/// Ephemeral state for one invocation
#[derive(Debug, Clone)]
pub struct RunContext {
    pub target_user: String,
    pub distro: Distro,
    /// Repository architecture (`x86_64`, `sbsa`)
    pub arch: String,
    exports: BTreeMap<String, String>,
}

impl RunContext {
    pub fn new(target_user: impl Into<String>, distro: Distro, arch: impl Into<String>) -> Self {
        Self {
            target_user: target_user.into(),
            distro,
            arch: arch.into(),
            exports: BTreeMap::new(),
        }
    }

    /// Detect the context for this host
    pub async fn detect(config: &BootstrapConfig) -> Result<Self, BootstrapError> {
        let distro = Distro::detect(&config.os_release).await?;
        if !distro.is_debian_family() {
            return Err(BootstrapError::UnsupportedHost(format!(
                "distribution '{}' is not Debian-based",
                distro.id
            )));
        }

        let target_user = resolve_target_user(
            config.target_user.as_deref(),
            std::env::var("SUDO_USER").ok(),
            std::env::var("USER").ok(),
        )?;

        let arch = repo_arch(std::env::consts::ARCH);
        info!(
            "Host: {} {} ({}), target user: {}",
            distro.id, distro.version_id, arch, target_user
        );
        Ok(Self::new(target_user, distro, arch))
    }

    /// Environment exported to every command this run spawns
    pub fn exports(&self) -> &BTreeMap<String, String> {
        &self.exports
    }

    /// Prepend `dir` to a colon-separated search path variable
    ///
    /// The base value is the current export, or the inherited process
    /// environment. Does nothing when `dir` is already present.
    pub fn prepend_path(&mut self, var: &str, dir: &str) {
        let current = self
            .exports
            .get(var)
            .cloned()
            .or_else(|| std::env::var(var).ok())
            .unwrap_or_default();

        if current.split(':').any(|c| c == dir) {
            return;
        }

        let value = if current.is_empty() {
            dir.to_string()
        } else {
            format!("{dir}:{current}")
        };
        debug!("Exporting {}={}", var, value);
        self.exports.insert(var.to_string(), value);
    }

    /// A command carrying this run's exports
    pub fn command(&self, program: &str) -> CommandSpec {
        let mut spec = CommandSpec::new(program);
        spec.env = self.exports.clone();
        spec
    }

    /// Like [`command`](Self::command) from an argv-style list
    pub fn command_argv(&self, argv: &[String]) -> Option<CommandSpec> {
        CommandSpec::from_argv(argv).map(|mut spec| {
            spec.env = self.exports.clone();
            spec
        })
    }

    /// Render a URL template with `distro` and `arch`
    pub fn render_url(&self, template: &str) -> Result<String, BootstrapError> {
        let env = minijinja::Environment::new();
        let rendered = env.render_str(
            template,
            minijinja::context! {
                distro => self.distro.repo_slug(),
                arch => self.arch.as_str(),
            },
        )?;
        Ok(rendered)
    }
}

/// Pick the user that receives group membership and owns the environment
///
/// Order: configured value, `SUDO_USER`, `USER`. A bare `root` from `USER`
/// is refused since it almost always means the operator forgot `sudo -E` or
/// a `target_user` setting; an explicitly configured `root` is allowed.
pub fn resolve_target_user(
    configured: Option<&str>,
    sudo_user: Option<String>,
    user: Option<String>,
) -> Result<String, BootstrapError> {
    if let Some(name) = configured.filter(|n| !n.is_empty()) {
        return Ok(name.to_string());
    }
    if let Some(name) = sudo_user.filter(|n| !n.is_empty() && n != "root") {
        return Ok(name);
    }
    match user.filter(|n| !n.is_empty()) {
        Some(name) if name != "root" => Ok(name),
        _ => Err(BootstrapError::Config(
            "cannot determine target user; run via sudo or set target_user".to_string(),
        )),
    }
}
