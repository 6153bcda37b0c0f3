//! Login-shell environment registration
//!
//! Appends `export` lines to a profile script so interactive shells see the
//! compute toolkit. Lines already present are never appended twice.

use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

use crate::BootstrapError;
use crate::state::write_atomic;

const HEADER: &str = "# Managed by gpu-host-bootstrap";

/// Export lines that put a toolkit installed under `home` on the search paths
pub fn toolkit_exports(home: &Path) -> Vec<String> {
    let home = home.display();
    vec![
        format!("export PATH=\"{home}/bin${{PATH:+:${{PATH}}}}\""),
        format!(
            "export LD_LIBRARY_PATH=\"{home}/lib64${{LD_LIBRARY_PATH:+:${{LD_LIBRARY_PATH}}}}\""
        ),
    ]
}

/// Lines from `lines` not yet present in the profile at `path`
pub async fn missing_lines(path: &Path, lines: &[String]) -> Result<Vec<String>, BootstrapError> {
    let existing = if path.exists() {
        fs::read_to_string(path).await?
    } else {
        String::new()
    };

    Ok(lines
        .iter()
        .filter(|wanted| !existing.lines().any(|l| l.trim() == wanted.trim()))
        .cloned()
        .collect())
}

/// Append the missing `lines` to the profile at `path`
///
/// Returns how many lines were added.
pub async fn register(path: &Path, lines: &[String]) -> Result<usize, BootstrapError> {
    let missing = missing_lines(path, lines).await?;
    if missing.is_empty() {
        debug!("{} already registers all exports", path.display());
        return Ok(0);
    }

    let mut content = if path.exists() {
        fs::read_to_string(path).await?
    } else {
        format!("{HEADER}\n")
    };
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    for line in &missing {
        content.push_str(line);
        content.push('\n');
    }

    write_atomic(path, content.as_bytes()).await?;
    set_mode(path).await?;

    info!("Registered {} exports in {}", missing.len(), path.display());
    Ok(missing.len())
}

async fn set_mode(path: &Path) -> Result<(), BootstrapError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)).await?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_toolkit_exports() {
        let lines = toolkit_exports(Path::new("/usr/local/cuda"));
        assert_eq!(lines[0], "export PATH=\"/usr/local/cuda/bin${PATH:+:${PATH}}\"");
        assert_eq!(
            lines[1],
            "export LD_LIBRARY_PATH=\"/usr/local/cuda/lib64${LD_LIBRARY_PATH:+:${LD_LIBRARY_PATH}}\""
        );
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("profile.d/cuda.sh");
        let lines = toolkit_exports(Path::new("/usr/local/cuda"));

        assert_eq!(missing_lines(&path, &lines).await.unwrap().len(), 2);
        assert_eq!(register(&path, &lines).await.unwrap(), 2);
        assert_eq!(register(&path, &lines).await.unwrap(), 0);
        assert!(missing_lines(&path, &lines).await.unwrap().is_empty());

        let content = fs::read_to_string(&path).await.unwrap();
        assert!(content.starts_with(HEADER));
        assert_eq!(content.matches("export PATH=").count(), 1);
    }

    #[tokio::test]
    async fn test_register_appends_only_missing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bashrc");
        let lines = toolkit_exports(Path::new("/usr/local/cuda"));

        // Operator already has the PATH line, without a trailing newline
        fs::write(&path, format!("alias ll='ls -l'\n{}", lines[0]))
            .await
            .unwrap();

        assert_eq!(register(&path, &lines).await.unwrap(), 1);
        let content = fs::read_to_string(&path).await.unwrap();
        assert!(content.starts_with("alias ll='ls -l'\n"));
        assert!(content.ends_with(&format!("{}\n{}\n", lines[0], lines[1])));
    }
}
