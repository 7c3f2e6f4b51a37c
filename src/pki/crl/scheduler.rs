use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, error, info, warn};

use crate::pki::catalog::IssuerEntry;
use crate::pki::truststore::{TrustStore, verify_crl};

use super::errors::{FetchError, RefreshError};
use super::fetcher::{CrlOrigin, CrlSource, FetchedCrl};
use super::index::RevocationIndexBuilder;
use super::parser::CrlDecoder;
use super::registry::RevocationRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssuerState {
    /// No refresh has succeeded yet.
    Bootstrapping,
    Ready,
    Refreshing,
}

/// Refresh bookkeeping for one issuer.
#[derive(Debug, Clone, Serialize)]
pub struct IssuerStatus {
    pub issuer_id: String,
    pub state: IssuerState,
    /// The last attempt failed and an older index (if any) is still serving.
    pub stale: bool,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
}

impl IssuerStatus {
    fn new(issuer_id: &str) -> Self {
        Self {
            issuer_id: issuer_id.to_string(),
            state: IssuerState::Bootstrapping,
            stale: false,
            last_error: None,
            consecutive_failures: 0,
            last_success: None,
        }
    }
}

/// Outcome of one [`RefreshScheduler::refresh_all`] cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub refreshed: usize,
    pub failed: usize,
}

/// Configuration for the refresh loop
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    /// Upper bound on a single fetch, independent of the source's own limits.
    pub fetch_timeout: Duration,
}

/// Keeps every issuer's revocation index current.
///
/// Each cycle refreshes all issuers concurrently. One issuer's failure is
/// recorded in its status and leaves its previous index in the registry.
pub struct RefreshScheduler {
    config: SchedulerConfig,
    issuers: Vec<IssuerEntry>,
    source: Arc<dyn CrlSource>,
    trust_store: TrustStore,
    decoder: CrlDecoder,
    builder: RevocationIndexBuilder,
    registry: Arc<RevocationRegistry>,
    statuses: DashMap<String, IssuerStatus>,
}

impl RefreshScheduler {
    pub fn new(
        config: SchedulerConfig,
        issuers: Vec<IssuerEntry>,
        source: Arc<dyn CrlSource>,
        trust_store: TrustStore,
        decoder: CrlDecoder,
        builder: RevocationIndexBuilder,
        registry: Arc<RevocationRegistry>,
    ) -> Self {
        let statuses = issuers
            .iter()
            .map(|issuer| {
                (
                    issuer.resource_id.clone(),
                    IssuerStatus::new(&issuer.resource_id),
                )
            })
            .collect();

        Self {
            config,
            issuers,
            source,
            trust_store,
            decoder,
            builder,
            registry,
            statuses,
        }
    }

    pub fn registry(&self) -> &Arc<RevocationRegistry> {
        &self.registry
    }

    pub fn issuers(&self) -> &[IssuerEntry] {
        &self.issuers
    }

    pub fn status(&self, issuer_id: &str) -> Option<IssuerStatus> {
        self.statuses.get(issuer_id).map(|s| s.value().clone())
    }

    /// Every issuer's status, sorted by issuer id.
    pub fn statuses(&self) -> Vec<IssuerStatus> {
        let mut all: Vec<_> = self.statuses.iter().map(|s| s.value().clone()).collect();
        all.sort_by(|a, b| a.issuer_id.cmp(&b.issuer_id));
        all
    }

    /// Run the full pipeline for one issuer and publish the result.
    pub async fn refresh_issuer(&self, issuer: &IssuerEntry) -> Result<usize, RefreshError> {
        let issuer_id = issuer.resource_id.as_str();
        self.mark_refreshing(issuer_id);

        let result = self.run_pipeline(issuer).await;
        match &result {
            Ok(revoked) => {
                debug!(issuer_id, revoked, "Refresh succeeded");
                self.mark_success(issuer_id);
            }
            Err(e) => {
                warn!(issuer_id, stage = e.stage(), "Refresh failed: {e}");
                self.mark_failure(issuer_id, e);
            }
        }
        result
    }

    async fn run_pipeline(&self, issuer: &IssuerEntry) -> Result<usize, RefreshError> {
        // The authority is re-checked every cycle: its validity window moves.
        self.trust_store.verify_entry(&issuer.certificate)?;

        let fetched = match self.fetch(issuer).await {
            Ok(fetched) => fetched,
            Err(e) => return Err(self.fall_back(issuer, e).await),
        };

        let revoked = self.publish(issuer, &fetched.der)?;
        if fetched.origin == CrlOrigin::Network
            && let Err(e) = self.source.commit(issuer, &fetched.der).await
        {
            warn!(issuer_id = %issuer.resource_id, "Failed to cache CRL: {e}");
        }
        Ok(revoked)
    }

    async fn fetch(&self, issuer: &IssuerEntry) -> Result<FetchedCrl, FetchError> {
        match timeout(self.config.fetch_timeout, self.source.fetch(issuer)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        }
    }

    /// Decode, check the signature, then build and swap in the index.
    fn publish(&self, issuer: &IssuerEntry, der: &[u8]) -> Result<usize, RefreshError> {
        let document = self.decoder.decode(&issuer.resource_id, der)?;
        verify_crl(&issuer.certificate, der)?;
        let index = self.builder.build(&document);
        let revoked = index.revoked_count();
        self.registry.swap(&issuer.resource_id, index);
        Ok(revoked)
    }

    /// An issuer with no index yet gets one from the last persisted CRL, which
    /// still goes through decoding and the trust gate. The download error is
    /// reported either way.
    async fn fall_back(&self, issuer: &IssuerEntry, error: FetchError) -> RefreshError {
        let issuer_id = issuer.resource_id.as_str();
        if self.registry.get(issuer_id).is_some() {
            return error.into();
        }
        let Some(der) = self.source.last_known(issuer).await else {
            return error.into();
        };
        match self.publish(issuer, &der) {
            Ok(revoked) => info!(issuer_id, revoked, "Indexed last cached CRL"),
            Err(e) => warn!(issuer_id, stage = e.stage(), "Last cached CRL unusable: {e}"),
        }
        error.into()
    }

    /// One cycle over every issuer, one task each.
    pub async fn refresh_all(self: &Arc<Self>) -> RefreshSummary {
        let mut tasks = JoinSet::new();
        for position in 0..self.issuers.len() {
            let scheduler = Arc::clone(self);
            tasks.spawn(async move {
                let issuer = &scheduler.issuers[position];
                scheduler.refresh_issuer(issuer).await
            });
        }

        let mut summary = RefreshSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(_)) => summary.refreshed += 1,
                Ok(Err(_)) => summary.failed += 1,
                Err(e) => {
                    error!("Refresh task failed: {e}");
                    summary.failed += 1;
                }
            }
        }

        info!(
            refreshed = summary.refreshed,
            failed = summary.failed,
            "CRL refresh cycle complete"
        );
        summary
    }

    /// Spawn the refresh loop. The first cycle starts immediately.
    pub fn start(self: &Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let scheduler = Arc::clone(self);
        let period = self.config.interval;
        info!(
            "Starting CRL scheduler for {} issuers with interval of {} seconds",
            self.issuers.len(),
            period.as_secs()
        );

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        debug!("Running scheduled CRL refresh");
                        scheduler.refresh_all().await;
                    }
                    _ = shutdown_rx.changed() => {
                        info!("CRL scheduler stopped");
                        break;
                    }
                }
            }
        });

        SchedulerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    fn mark_refreshing(&self, issuer_id: &str) {
        let mut status = self
            .statuses
            .entry(issuer_id.to_string())
            .or_insert_with(|| IssuerStatus::new(issuer_id));
        if status.state == IssuerState::Ready {
            status.state = IssuerState::Refreshing;
        }
    }

    fn mark_success(&self, issuer_id: &str) {
        if let Some(mut status) = self.statuses.get_mut(issuer_id) {
            status.state = IssuerState::Ready;
            status.stale = false;
            status.last_error = None;
            status.consecutive_failures = 0;
            status.last_success = Some(Utc::now());
        }
    }

    fn mark_failure(&self, issuer_id: &str, e: &RefreshError) {
        let serving = self.registry.get(issuer_id).is_some();
        if let Some(mut status) = self.statuses.get_mut(issuer_id) {
            if serving {
                status.state = IssuerState::Ready;
                status.stale = true;
            }
            status.last_error = Some(format!("{}: {e}", e.stage()));
            status.consecutive_failures = status.consecutive_failures.saturating_add(1);
        }
    }
}

impl fmt::Debug for RefreshScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let issuers: Vec<&str> = self
            .issuers
            .iter()
            .map(|issuer| issuer.resource_id.as_str())
            .collect();
        f.debug_struct("RefreshScheduler")
            .field("config", &self.config)
            .field("issuers", &issuers)
            .field("indexed", &self.registry.len())
            .finish_non_exhaustive()
    }
}

/// Stops the loop started by [`RefreshScheduler::start`]. Dropping the handle
/// stops it as well.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal the loop and wait for it. A cycle already in progress completes
    /// first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!("CRL scheduler task ended abnormally: {e}");
        }
    }
}
