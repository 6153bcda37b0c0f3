//! Bootstrap configuration
//!
//! Concrete package names, vendor URLs and host paths are configuration; the
//! stage logic only consumes them. Every field has a default matching an
//! Ubuntu GPU host, so an empty file (or none at all) is a valid config.

pub mod loader;

pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default directory holding the main config and drop-ins
pub const CONFIG_DIR: &str = "/etc/gpu-host-bootstrap";

/// Top-level bootstrap configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BootstrapConfig {
    /// User to grant container access and own the Python environment.
    /// Falls back to `SUDO_USER`, then `USER`.
    pub target_user: Option<String>,

    /// Reboot automatically at a reboot boundary instead of asking
    pub auto_reboot: bool,

    /// Directory holding the progress marker and status file
    pub state_dir: PathBuf,

    /// Path to `os-release` used for distribution detection
    pub os_release: PathBuf,

    pub base: BaseConfig,
    pub driver: DriverConfig,
    pub toolkit: ToolkitConfig,
    pub runtime: RuntimeConfig,
    pub group: GroupConfig,
    pub python: PythonConfig,
    pub deploy: DeployConfig,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            target_user: None,
            auto_reboot: true,
            state_dir: PathBuf::from(crate::state::STATE_DIR),
            os_release: PathBuf::from("/etc/os-release"),
            base: BaseConfig::default(),
            driver: DriverConfig::default(),
            toolkit: ToolkitConfig::default(),
            runtime: RuntimeConfig::default(),
            group: GroupConfig::default(),
            python: PythonConfig::default(),
            deploy: DeployConfig::default(),
        }
    }
}

/// Stage 1: base packages and build tooling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BaseConfig {
    pub packages: Vec<String>,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            packages: [
                "build-essential",
                "dkms",
                "curl",
                "ca-certificates",
                "gnupg",
                "git",
                "python3",
                "python3-venv",
                "python3-pip",
                "ubuntu-drivers-common",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Stage 2: GPU driver
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DriverConfig {
    /// Installer invocation, argv style
    pub install_command: Vec<String>,
    /// Command that exits 0 once the driver is usable
    pub probe_command: Vec<String>,
    /// File exposed by the loaded kernel module
    pub module_version_file: PathBuf,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            install_command: vec!["ubuntu-drivers".into(), "autoinstall".into()],
            probe_command: vec!["nvidia-smi".into()],
            module_version_file: PathBuf::from("/proc/driver/nvidia/version"),
        }
    }
}

/// Stage 3: GPU compute toolkit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolkitConfig {
    /// Keyring package URL; `{{ distro }}` and `{{ arch }}` are substituted
    pub keyring_url: String,
    pub package: String,
    /// Toolkit install prefix
    pub home: PathBuf,
    /// Profile script that registers PATH and library path for login shells
    pub profile_path: PathBuf,
    /// Where the downloaded keyring package is staged before `dpkg -i`
    pub download_dir: PathBuf,
}

impl Default for ToolkitConfig {
    fn default() -> Self {
        Self {
            keyring_url: "https://developer.download.nvidia.com/compute/cuda/repos/{{ distro }}/{{ arch }}/cuda-keyring_1.1-1_all.deb".to_string(),
            package: "cuda-toolkit-12-4".to_string(),
            home: PathBuf::from("/usr/local/cuda"),
            profile_path: PathBuf::from("/etc/profile.d/cuda-toolkit.sh"),
            download_dir: PathBuf::from("/var/cache/gpu-host-bootstrap"),
        }
    }
}

/// Stage 4: container runtime and GPU shim
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub packages: Vec<String>,
    /// Runtime CLI checked on PATH
    pub runtime_command: String,
    /// systemd unit restarted after shim registration
    pub service: String,
    pub shim_key_url: String,
    pub shim_list_url: String,
    pub shim_package: String,
    /// Shim CLI checked on PATH and used for registration
    pub shim_command: String,
    /// Runtime name the shim registers in the daemon config
    pub shim_runtime_name: String,
    pub keyring_path: PathBuf,
    pub sources_path: PathBuf,
    pub daemon_config: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            packages: vec!["docker.io".into(), "docker-compose-v2".into()],
            runtime_command: "docker".to_string(),
            service: "docker".to_string(),
            shim_key_url: "https://nvidia.github.io/libnvidia-container/gpgkey".to_string(),
            shim_list_url:
                "https://nvidia.github.io/libnvidia-container/stable/deb/nvidia-container-toolkit.list"
                    .to_string(),
            shim_package: "nvidia-container-toolkit".to_string(),
            shim_command: "nvidia-ctk".to_string(),
            shim_runtime_name: "nvidia".to_string(),
            keyring_path: PathBuf::from(
                "/usr/share/keyrings/nvidia-container-toolkit-keyring.asc",
            ),
            sources_path: PathBuf::from("/etc/apt/sources.list.d/nvidia-container-toolkit.list"),
            daemon_config: PathBuf::from("/etc/docker/daemon.json"),
        }
    }
}

/// Stage 5: privileged group membership
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GroupConfig {
    pub name: String,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            name: "docker".to_string(),
        }
    }
}

/// Stage 6: isolated Python environment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PythonConfig {
    pub interpreter: String,
    pub venv_path: PathBuf,
    pub packages: Vec<String>,
    /// Extra package index, e.g. a wheel index for a specific accelerator build
    pub extra_index_url: Option<String>,
}

impl Default for PythonConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            venv_path: PathBuf::from("/opt/llm-env"),
            packages: [
                "numpy",
                "scipy",
                "pandas",
                "torch",
                "transformers",
                "accelerate",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            extra_index_url: None,
        }
    }
}

/// Expectations about the downstream deployment descriptor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeployConfig {
    /// Environment variable carrying the shared bearer credential
    pub credential_env: String,
    pub inference_port: u16,
    pub chat_port: u16,
    pub extraction_port: u16,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            credential_env: "LLM_API_KEY".to_string(),
            inference_port: 8000,
            chat_port: 3000,
            extraction_port: 5001,
        }
    }
}

impl BootstrapConfig {
    /// Parse a config document from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_default() {
        let config = BootstrapConfig::from_yaml("").unwrap();
        assert_eq!(config, BootstrapConfig::default());
        assert!(config.auto_reboot);
        assert_eq!(config.group.name, "docker");
    }

    #[test]
    fn test_partial_override() {
        let yaml = r#"
target_user: alice
auto_reboot: false
toolkit:
  package: cuda-toolkit-12-6
python:
  packages:
    - numpy
"#;
        let config = BootstrapConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.target_user.as_deref(), Some("alice"));
        assert!(!config.auto_reboot);
        assert_eq!(config.toolkit.package, "cuda-toolkit-12-6");
        // Untouched fields in the same section keep their defaults
        assert_eq!(config.toolkit.home, PathBuf::from("/usr/local/cuda"));
        assert_eq!(config.python.packages, vec!["numpy"]);
        assert_eq!(config.python.interpreter, "python3");
    }

    #[test]
    fn test_unknown_type_is_error() {
        assert!(BootstrapConfig::from_yaml("auto_reboot: [1, 2]").is_err());
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let config = BootstrapConfig::from_yaml(include_str!("../../dist/bootstrap.yaml")).unwrap();
        assert_eq!(config, BootstrapConfig::default());
    }
}
