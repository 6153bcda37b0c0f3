//! Standard state paths
//!
//! Defines where the bootstrap keeps its durable state.

use std::path::{Path, PathBuf};

/// Base directory for bootstrap state
pub const STATE_DIR: &str = "/var/lib/gpu-host-bootstrap";

/// Durable state locations
#[derive(Debug, Clone)]
pub struct StatePaths {
    /// Base state directory (default: /var/lib/gpu-host-bootstrap)
    pub base: PathBuf,
}

impl Default for StatePaths {
    fn default() -> Self {
        Self::new()
    }
}

impl StatePaths {
    /// Create with the default base directory
    pub fn new() -> Self {
        Self {
            base: PathBuf::from(STATE_DIR),
        }
    }

    /// Create with a custom base directory (useful for testing)
    pub fn with_base(base: impl AsRef<Path>) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
        }
    }

    /// /var/lib/gpu-host-bootstrap/progress - Progress marker
    pub fn marker_file(&self) -> PathBuf {
        self.base.join("progress")
    }

    /// /var/lib/gpu-host-bootstrap/status.json - Current status
    pub fn status_file(&self) -> PathBuf {
        self.base.join("status.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        let paths = StatePaths::new();
        assert_eq!(
            paths.marker_file(),
            PathBuf::from("/var/lib/gpu-host-bootstrap/progress")
        );
        assert_eq!(
            paths.status_file(),
            PathBuf::from("/var/lib/gpu-host-bootstrap/status.json")
        );
    }

    #[test]
    fn test_custom_base() {
        let paths = StatePaths::with_base("/tmp/boot");
        assert_eq!(paths.marker_file(), PathBuf::from("/tmp/boot/progress"));
    }
}
