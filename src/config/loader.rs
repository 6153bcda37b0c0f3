//! Config loader
//!
//! Loads the main config file and merges drop-ins over it.
//! Precedence, lowest first:
//! 1. built-in defaults
//! 2. `/etc/gpu-host-bootstrap/bootstrap.yaml`
//! 3. `/etc/gpu-host-bootstrap/bootstrap.d/*.yaml` (sorted alphabetically)

use super::{BootstrapConfig, CONFIG_DIR};
use crate::BootstrapError;
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Configuration loader builder
pub struct ConfigLoader {
    main: PathBuf,
    dropin_dir: Option<PathBuf>,
}

impl ConfigLoader {
    /// Loader for the standard locations under `/etc/gpu-host-bootstrap`
    pub fn new() -> Self {
        Self::with_dir(CONFIG_DIR)
    }

    /// Loader for `<dir>/bootstrap.yaml` and `<dir>/bootstrap.d`
    pub fn with_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            main: dir.join("bootstrap.yaml"),
            dropin_dir: Some(dir.join("bootstrap.d")),
        }
    }

    /// Loader for an explicit main file; drop-ins are read from a
    /// `bootstrap.d` directory next to it
    pub fn with_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let dropin_dir = path.parent().map(|p| p.join("bootstrap.d"));
        Self {
            main: path.to_path_buf(),
            dropin_dir,
        }
    }

    /// Skip loading drop-in configs
    pub fn skip_dropins(mut self) -> Self {
        self.dropin_dir = None;
        self
    }

    /// Load and merge all configs
    pub async fn load(self) -> Result<BootstrapConfig, BootstrapError> {
        let mut merged = Value::Mapping(Default::default());

        if let Some(value) = load_config_file(&self.main).await? {
            debug!("Loaded config from {}", self.main.display());
            merged = merge_values(merged, value);
        }

        if let Some(dir) = &self.dropin_dir {
            for value in load_dropin_configs(dir).await? {
                merged = merge_values(merged, value);
            }
        }

        if matches!(&merged, Value::Mapping(m) if m.is_empty()) {
            return Ok(BootstrapConfig::default());
        }

        serde_yaml::from_value(merged).map_err(|e| {
            BootstrapError::Config(format!("invalid configuration: {e}"))
        })
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Read one YAML file; a missing file is `None`, a malformed one is an error
async fn load_config_file(path: &Path) -> Result<Option<Value>, BootstrapError> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path).await?;
    if content.trim().is_empty() {
        return Ok(None);
    }

    let value: Value = serde_yaml::from_str(&content)
        .map_err(|e| BootstrapError::Config(format!("{}: {e}", path.display())))?;

    match value {
        Value::Null => Ok(None),
        Value::Mapping(_) => Ok(Some(value)),
        _ => Err(BootstrapError::Config(format!(
            "{}: top level must be a mapping",
            path.display()
        ))),
    }
}

/// Load all `.yaml`/`.yml` drop-ins from a directory, sorted alphabetically
async fn load_dropin_configs(dir: &Path) -> Result<Vec<Value>, BootstrapError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    let mut read_dir = fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        if path
            .extension()
            .is_some_and(|e| e == "yaml" || e == "yml")
        {
            entries.push(path);
        }
    }
    entries.sort();

    let mut values = Vec::new();
    for path in entries {
        if let Some(value) = load_config_file(&path).await? {
            debug!("Loaded drop-in config from {}", path.display());
            values.push(value);
        }
    }

    if !values.is_empty() {
        info!("Loaded {} drop-in configs", values.len());
    }
    Ok(values)
}

/// Merge `overlay` into `base`: mappings merge key by key, anything else
/// (scalars, sequences) is replaced by the overlay
pub fn merge_values(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(mut base_map), Value::Mapping(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => merge_values(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Mapping(base_map)
        }
        (_, overlay) => overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_files_give_defaults() {
        let temp = TempDir::new().unwrap();
        let config = ConfigLoader::with_dir(temp.path()).load().await.unwrap();
        assert_eq!(config, BootstrapConfig::default());
    }

    #[tokio::test]
    async fn test_dropins_override_main() {
        let temp = TempDir::new().unwrap();
        let dropins = temp.path().join("bootstrap.d");
        fs::create_dir_all(&dropins).await.unwrap();

        fs::write(
            temp.path().join("bootstrap.yaml"),
            "target_user: alice\ntoolkit:\n  package: cuda-toolkit-12-4\n",
        )
        .await
        .unwrap();
        fs::write(
            dropins.join("10-toolkit.yaml"),
            "toolkit:\n  package: cuda-toolkit-12-6\n",
        )
        .await
        .unwrap();
        fs::write(dropins.join("20-user.yml"), "target_user: bob\n")
            .await
            .unwrap();
        // Not a drop-in
        fs::write(dropins.join("notes.txt"), "target_user: mallory\n")
            .await
            .unwrap();

        let config = ConfigLoader::with_dir(temp.path()).load().await.unwrap();
        assert_eq!(config.target_user.as_deref(), Some("bob"));
        assert_eq!(config.toolkit.package, "cuda-toolkit-12-6");
        assert_eq!(config.toolkit.home, PathBuf::from("/usr/local/cuda"));
    }

    #[tokio::test]
    async fn test_skip_dropins() {
        let temp = TempDir::new().unwrap();
        let dropins = temp.path().join("bootstrap.d");
        fs::create_dir_all(&dropins).await.unwrap();
        fs::write(temp.path().join("bootstrap.yaml"), "auto_reboot: false\n")
            .await
            .unwrap();
        fs::write(dropins.join("00.yaml"), "auto_reboot: true\n")
            .await
            .unwrap();

        let config = ConfigLoader::with_file(temp.path().join("bootstrap.yaml"))
            .skip_dropins()
            .load()
            .await
            .unwrap();
        assert!(!config.auto_reboot);
    }

    #[tokio::test]
    async fn test_malformed_file_is_error() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("bootstrap.yaml"), "base: [unterminated")
            .await
            .unwrap();

        let err = ConfigLoader::with_dir(temp.path()).load().await.unwrap_err();
        assert!(matches!(err, BootstrapError::Config(_)));
    }

    #[test]
    fn test_sequences_replace() {
        let base: Value = serde_yaml::from_str("packages: [a, b]\nkeep: 1").unwrap();
        let overlay: Value = serde_yaml::from_str("packages: [c]").unwrap();
        let merged = merge_values(base, overlay);
        let expected: Value = serde_yaml::from_str("packages: [c]\nkeep: 1").unwrap();
        assert_eq!(merged, expected);
    }
}
