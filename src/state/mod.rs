//! Durable bootstrap state
//!
//! Manages the state directory:
//! - the progress marker, the single cursor that drives resumption
//! - the status file, an informational snapshot for operators
//!
//! Both are written with [`write_atomic`] so a crash mid-write can never
//! leave a torn file behind.

pub mod paths;

pub use paths::{STATE_DIR, StatePaths};

use crate::BootstrapError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Durable record of the highest stage number completed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressMarker {
    /// Number of stages completed (stage numbers are 1-based)
    pub completed: usize,
    /// Identifier of the last completed stage, if recorded
    #[serde(default)]
    pub stage: Option<String>,
    /// Unix timestamp of the write
    #[serde(default)]
    pub updated_at: u64,
}

impl ProgressMarker {
    pub fn new(completed: usize, stage: Option<&str>) -> Self {
        Self {
            completed,
            stage: stage.map(String::from),
            updated_at: timestamp(),
        }
    }

    /// Parse marker content: the JSON form, or a bare integer written by hand
    pub fn parse(content: &str) -> Result<Self, BootstrapError> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(BootstrapError::State("progress marker is empty".to_string()));
        }
        if let Ok(completed) = trimmed.parse::<usize>() {
            return Ok(Self {
                completed,
                stage: None,
                updated_at: 0,
            });
        }
        serde_json::from_str(trimmed)
            .map_err(|e| BootstrapError::State(format!("progress marker is unreadable: {e}")))
    }
}

/// Lifecycle phase reported in the status file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    NotStarted,
    Running,
    RebootPending,
    Done,
    Error,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not-started"),
            Self::Running => write!(f, "running"),
            Self::RebootPending => write!(f, "reboot-pending"),
            Self::Done => write!(f, "done"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Status of the bootstrap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapStatus {
    pub status: Phase,
    /// Stage being executed, or the one that stopped the run
    pub stage: Option<String>,
    pub completed: usize,
    pub total: usize,
    pub error: Option<String>,
    pub updated_at: u64,
}

impl Default for BootstrapStatus {
    fn default() -> Self {
        Self {
            status: Phase::NotStarted,
            stage: None,
            completed: 0,
            total: 0,
            error: None,
            updated_at: 0,
        }
    }
}

/// Reads and writes the progress marker and status file
#[derive(Debug, Clone)]
pub struct MarkerStore {
    paths: StatePaths,
}

impl Default for MarkerStore {
    fn default() -> Self {
        Self::new(StatePaths::new())
    }
}

impl MarkerStore {
    pub fn new(paths: StatePaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &StatePaths {
        &self.paths
    }

    /// Read the marker; `None` means no stage has completed yet
    pub async fn load(&self) -> Result<Option<ProgressMarker>, BootstrapError> {
        let path = self.paths.marker_file();
        if !path.exists() {
            debug!("No progress marker at {}", path.display());
            return Ok(None);
        }
        let content = fs::read_to_string(&path).await?;
        ProgressMarker::parse(&content).map(Some)
    }

    /// Number of completed stages (0 when the marker is absent)
    pub async fn completed(&self) -> Result<usize, BootstrapError> {
        Ok(self.load().await?.map_or(0, |m| m.completed))
    }

    /// Record stage `completed` as done. The marker only moves forward.
    pub async fn advance(
        &self,
        completed: usize,
        stage: &str,
    ) -> Result<ProgressMarker, BootstrapError> {
        let current = self.completed().await?;
        if completed <= current {
            return Err(BootstrapError::State(format!(
                "refusing to move progress marker from {current} to {completed}"
            )));
        }

        let marker = ProgressMarker::new(completed, Some(stage));
        write_atomic(&self.paths.marker_file(), &serde_json::to_vec(&marker)?).await?;
        debug!("Progress marker advanced to {} ({})", completed, stage);
        Ok(marker)
    }

    /// External reset: remove the marker, or rewind it to `to`
    pub async fn reset(&self, to: Option<usize>) -> Result<(), BootstrapError> {
        let path = self.paths.marker_file();
        match to {
            None | Some(0) => {
                if path.exists() {
                    fs::remove_file(&path).await?;
                }
                info!("Progress marker cleared");
            }
            Some(k) => {
                let marker = ProgressMarker::new(k, None);
                write_atomic(&path, &serde_json::to_vec(&marker)?).await?;
                info!("Progress marker reset to {}", k);
            }
        }
        Ok(())
    }

    /// Update status
    pub async fn write_status(&self, status: &BootstrapStatus) -> Result<(), BootstrapError> {
        let json = serde_json::to_vec_pretty(status)?;
        write_atomic(&self.paths.status_file(), &json).await
    }

    /// Read current status
    pub async fn read_status(&self) -> Result<BootstrapStatus, BootstrapError> {
        let path = self.paths.status_file();
        if path.exists() {
            let content = fs::read_to_string(&path).await?;
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(BootstrapStatus::default())
        }
    }
}

/// Replace `path` with `data` via write-temp, fsync, rename, fsync-dir
pub async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), BootstrapError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    fs::create_dir_all(&parent).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    let tmp = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    let write = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, path).await?;
        Ok::<(), std::io::Error>(())
    };

    if let Err(e) = write.await {
        fs::remove_file(&tmp).await.ok();
        return Err(e.into());
    }

    // Persist the rename itself
    #[cfg(unix)]
    {
        if let Ok(dir) = fs::File::open(&parent).await {
            dir.sync_all().await.ok();
        }
    }

    Ok(())
}

/// Current Unix timestamp in seconds
pub(crate) fn timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (MarkerStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = MarkerStore::new(StatePaths::with_base(temp.path().join("state")));
        (store, temp)
    }

    #[tokio::test]
    async fn test_absent_marker() {
        let (store, _temp) = create_test_store();
        assert_eq!(store.load().await.unwrap(), None);
        assert_eq!(store.completed().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_advance_and_load() {
        let (store, _temp) = create_test_store();
        store.advance(1, "base-packages").await.unwrap();
        store.advance(2, "gpu-driver").await.unwrap();

        let marker = store.load().await.unwrap().unwrap();
        assert_eq!(marker.completed, 2);
        assert_eq!(marker.stage.as_deref(), Some("gpu-driver"));
        assert!(marker.updated_at > 0);
    }

    #[tokio::test]
    async fn test_advance_refuses_regression() {
        let (store, _temp) = create_test_store();
        store.advance(3, "compute-toolkit").await.unwrap();

        let err = store.advance(3, "compute-toolkit").await.unwrap_err();
        assert!(matches!(err, BootstrapError::State(_)));
        assert!(store.advance(2, "gpu-driver").await.is_err());
        assert_eq!(store.completed().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_atomic_write_leaves_no_temp_files() {
        let (store, temp) = create_test_store();
        store.advance(1, "base-packages").await.unwrap();
        store.write_status(&BootstrapStatus::default()).await.unwrap();

        let mut entries = fs::read_dir(temp.path().join("state")).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        assert_eq!(names, vec!["progress", "status.json"]);
    }

    #[tokio::test]
    async fn test_bare_integer_marker() {
        let (store, _temp) = create_test_store();
        fs::create_dir_all(&store.paths().base).await.unwrap();
        fs::write(store.paths().marker_file(), "2\n").await.unwrap();

        let marker = store.load().await.unwrap().unwrap();
        assert_eq!(marker.completed, 2);
        assert_eq!(marker.stage, None);
    }

    #[tokio::test]
    async fn test_corrupt_marker_is_error() {
        let (store, _temp) = create_test_store();
        fs::create_dir_all(&store.paths().base).await.unwrap();
        fs::write(store.paths().marker_file(), "{\"completed\": ")
            .await
            .unwrap();

        assert!(matches!(
            store.load().await.unwrap_err(),
            BootstrapError::State(_)
        ));
    }

    #[tokio::test]
    async fn test_reset() {
        let (store, _temp) = create_test_store();
        store.advance(4, "container-runtime").await.unwrap();

        store.reset(Some(2)).await.unwrap();
        assert_eq!(store.completed().await.unwrap(), 2);

        store.reset(None).await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_status_roundtrip() {
        let (store, _temp) = create_test_store();
        assert_eq!(store.read_status().await.unwrap().status, Phase::NotStarted);

        let status = BootstrapStatus {
            status: Phase::RebootPending,
            stage: Some("gpu-driver".to_string()),
            completed: 2,
            total: 6,
            error: None,
            updated_at: timestamp(),
        };
        store.write_status(&status).await.unwrap();

        let content = fs::read_to_string(store.paths().status_file())
            .await
            .unwrap();
        assert!(content.contains("\"reboot-pending\""));
        assert_eq!(store.read_status().await.unwrap(), status);
    }
}
