//! Vendor artifact downloads
//!
//! Signing keys, keyring packages and repository lists are fetched over
//! HTTPS. Any transport failure or non-success status is a
//! [`BootstrapError::Download`]; nothing is retried.

use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::BootstrapError;
use crate::state::write_atomic;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// HTTP fetcher for third-party artifacts
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new() -> Result<Self, BootstrapError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("gpu-host-bootstrap/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BootstrapError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Fetch a URL into memory
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, BootstrapError> {
        debug!("Fetching {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BootstrapError::download(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BootstrapError::download(url, format!("HTTP {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| BootstrapError::download(url, e))?;
        Ok(body.to_vec())
    }

    /// Fetch a URL as UTF-8 text
    pub async fn fetch_text(&self, url: &str) -> Result<String, BootstrapError> {
        let body = self.fetch(url).await?;
        String::from_utf8(body).map_err(|e| BootstrapError::download(url, e))
    }

    /// Fetch a URL and atomically store it at `dest`
    pub async fn fetch_to(&self, url: &str, dest: &Path) -> Result<(), BootstrapError> {
        let body = self.fetch(url).await?;
        write_atomic(dest, &body).await?;
        info!("Downloaded {} to {}", url, dest.display());
        Ok(())
    }
}

/// Last path segment of a URL, used to name a downloaded file
pub fn file_name_from_url(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    path.rsplit('/').next().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(
            file_name_from_url("https://example.com/repos/ubuntu2204/x86_64/cuda-keyring_1.1-1_all.deb"),
            Some("cuda-keyring_1.1-1_all.deb")
        );
        assert_eq!(
            file_name_from_url("https://example.com/key.asc?token=1"),
            Some("key.asc")
        );
        assert_eq!(file_name_from_url("https://example.com/dir/"), None);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_download_error() {
        let fetcher = Fetcher::new().unwrap();
        // Port 9 on localhost is discard; nothing listens there in test environments
        let err = fetcher.fetch("http://127.0.0.1:9/key").await.unwrap_err();
        assert!(err.is_download());
    }
}
