//! Fetching raw asset bytes from disk or over HTTP.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use chime_core::{AssetLocation, Error, Result};
use tracing::debug;

/// Connect timeout for asset requests. The per-attempt timeout comes from
/// the preload profile.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Source of raw asset bytes.
pub trait AssetFetcher: Send + Sync {
    fn fetch(&self, location: &AssetLocation) -> impl Future<Output = Result<Bytes>> + Send;
}

/// Fetches files with `tokio::fs` and URLs with `reqwest`.
#[derive(Clone)]
pub struct DefaultFetcher {
    http: reqwest::Client,
}

impl DefaultFetcher {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { http })
    }

    async fn fetch_file(path: &std::path::Path) -> Result<Bytes> {
        match tokio::fs::read(path).await {
            Ok(data) => Ok(Bytes::from(data)),
            // A missing file will not appear on retry.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::InvalidArgument(
                format!("asset not found: {}", path.display()),
            )),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn fetch_url(&self, url: &str) -> Result<Bytes> {
        let response = self.http.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(CONNECT_TIMEOUT.as_millis() as u64)
            } else {
                Error::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_client_error() {
            return Err(Error::InvalidArgument(format!("{url} returned {status}")));
        }
        if !status.is_success() {
            return Err(Error::Network(format!("{url} returned {status}")));
        }

        response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("Failed to read response body: {e}")))
    }
}

impl AssetFetcher for DefaultFetcher {
    async fn fetch(&self, location: &AssetLocation) -> Result<Bytes> {
        let data = match location {
            AssetLocation::File(path) => Self::fetch_file(path).await?,
            AssetLocation::Url(url) => self.fetch_url(url).await?,
        };
        debug!("Fetched {} bytes from {location}", data.len());
        Ok(data)
    }
}
