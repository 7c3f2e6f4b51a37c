use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use tokio::fs;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;
use x509_parser::prelude::{CertificateRevocationList, FromDer};

use crate::config::CrlConfig;
use crate::pki::catalog::IssuerEntry;

use super::errors::{FetchError, FetchResult};

/// Where a [`FetchedCrl`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrlOrigin {
    /// Downloaded in this call and not persisted yet.
    Network,
    Cache,
}

#[derive(Debug, Clone)]
pub struct FetchedCrl {
    pub der: Bytes,
    pub origin: CrlOrigin,
}

/// Where the scheduler gets CRL bytes from.
///
/// A source never persists what it downloads on its own. The scheduler calls
/// [`CrlSource::commit`] once the CRL has been decoded and its signature
/// checked, so a bad download cannot replace the last good copy.
#[async_trait]
pub trait CrlSource: Send + Sync + 'static {
    async fn fetch(&self, issuer: &IssuerEntry) -> FetchResult<FetchedCrl>;

    /// Persist a downloaded CRL that passed decoding and the trust gate.
    async fn commit(&self, _issuer: &IssuerEntry, _der: &[u8]) -> FetchResult<()> {
        Ok(())
    }

    /// The last persisted CRL, whatever its age.
    async fn last_known(&self, _issuer: &IssuerEntry) -> Option<Bytes> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub base_url: String,
    pub cache_dir: PathBuf,
    pub timeout: Duration,
    pub max_size: u64,
    /// Cached files younger than this are served without a download.
    pub cache_max_age: Duration,
}

impl From<&CrlConfig> for FetcherConfig {
    fn from(config: &CrlConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            cache_dir: config.cache_dir.clone(),
            timeout: config.fetch_timeout(),
            max_size: config.max_size_bytes,
            cache_max_age: config.cache_max_age(),
        }
    }
}

/// Downloads CRLs over HTTP and keeps the last good copy of each on disk.
#[derive(Debug, Clone)]
pub struct CrlFetcher {
    client: Client,
    config: FetcherConfig,
}

impl CrlFetcher {
    /// Returns an error if the HTTP client cannot be initialized
    pub fn new(config: FetcherConfig) -> FetchResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.timeout)
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn distribution_url(&self, resource_id: &str) -> FetchResult<Url> {
        let raw = format!(
            "{}/{resource_id}.crl",
            self.config.base_url.trim_end_matches('/')
        );
        Url::parse(&raw).map_err(|_| FetchError::InvalidUrl(raw))
    }

    pub fn cache_path(&self, resource_id: &str) -> PathBuf {
        self.config.cache_dir.join(format!("{resource_id}.crl"))
    }

    /// Cached bytes if present and younger than the staleness threshold,
    /// otherwise a fresh download. Downloads are not written to the cache
    /// here; see [`CrlFetcher::store`].
    pub async fn fetch_resource(&self, resource_id: &str) -> FetchResult<FetchedCrl> {
        if let Some(der) = self
            .read_cache(resource_id, Some(self.config.cache_max_age))
            .await
        {
            debug!(resource_id, "Using cached CRL");
            return Ok(FetchedCrl {
                der,
                origin: CrlOrigin::Cache,
            });
        }

        let url = self.distribution_url(resource_id)?;
        let der = self.download(&url).await?;
        check_consistency(&der)?;

        info!(resource_id, bytes = der.len(), "Fetched CRL from {url}");
        Ok(FetchedCrl {
            der,
            origin: CrlOrigin::Network,
        })
    }

    /// Replace the cached copy. Write to a temporary file and rename over
    /// the old copy, so readers never see a half-written CRL.
    pub async fn store(&self, resource_id: &str, der: &[u8]) -> FetchResult<()> {
        fs::create_dir_all(&self.config.cache_dir).await?;
        let target = self.cache_path(resource_id);
        let staging = self
            .config
            .cache_dir
            .join(format!(".{resource_id}.{}.tmp", uuid::Uuid::new_v4()));

        fs::write(&staging, der).await?;
        if let Err(e) = fs::rename(&staging, &target).await {
            let _ = fs::remove_file(&staging).await;
            return Err(e.into());
        }
        debug!(resource_id, bytes = der.len(), "Cached CRL");
        Ok(())
    }

    /// The cached copy regardless of its age, if it is still a well-formed CRL.
    pub async fn last_cached(&self, resource_id: &str) -> Option<Bytes> {
        self.read_cache(resource_id, None).await
    }

    async fn read_cache(&self, resource_id: &str, max_age: Option<Duration>) -> Option<Bytes> {
        let path = self.cache_path(resource_id);
        if let Some(max_age) = max_age {
            let modified = fs::metadata(&path).await.ok()?.modified().ok()?;
            // A timestamp in the future reads as fresh.
            let age = modified.elapsed().unwrap_or_default();
            if age >= max_age {
                debug!(resource_id, ?age, "Cached CRL is stale");
                return None;
            }
        }

        let body = fs::read(&path).await.ok()?;
        if body.len() as u64 > self.config.max_size || check_consistency(&body).is_err() {
            debug!(resource_id, "Ignoring unusable cached CRL");
            return None;
        }
        Some(Bytes::from(body))
    }

    async fn download(&self, url: &Url) -> FetchResult<Bytes> {
        match timeout(self.config.timeout, self.download_inner(url)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        }
    }

    async fn download_inner(&self, url: &Url) -> FetchResult<Bytes> {
        debug!("Fetching CRL from: {url}");
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status,
                url: url.to_string(),
            });
        }

        let limit = self.config.max_size;
        if let Some(length) = response.content_length()
            && length > limit
        {
            return Err(FetchError::Oversize { limit });
        }

        // Content-Length may be absent or wrong, so count while streaming too.
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(transport)? {
            if (body.len() + chunk.len()) as u64 > limit {
                return Err(FetchError::Oversize { limit });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(Bytes::from(body))
    }
}

#[async_trait]
impl CrlSource for CrlFetcher {
    async fn fetch(&self, issuer: &IssuerEntry) -> FetchResult<FetchedCrl> {
        self.fetch_resource(&issuer.resource_id).await
    }

    async fn commit(&self, issuer: &IssuerEntry, der: &[u8]) -> FetchResult<()> {
        self.store(&issuer.resource_id, der).await
    }

    async fn last_known(&self, issuer: &IssuerEntry) -> Option<Bytes> {
        let der = self.last_cached(&issuer.resource_id).await?;
        warn!(
            resource_id = %issuer.resource_id,
            "Falling back to stale cached CRL"
        );
        Some(der)
    }
}

fn transport(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Transport(e)
    }
}

/// The whole payload must be exactly one DER-encoded CRL.
fn check_consistency(body: &[u8]) -> FetchResult<()> {
    match CertificateRevocationList::from_der(body) {
        Ok((rest, _)) if rest.is_empty() => Ok(()),
        Ok((rest, _)) => Err(FetchError::Corrupt(format!(
            "{} trailing bytes after the CRL",
            rest.len()
        ))),
        Err(e) => Err(FetchError::Corrupt(e.to_string())),
    }
}
