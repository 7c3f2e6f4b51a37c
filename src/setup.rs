use std::sync::Arc;

use color_eyre::eyre::{Context, eyre};

use crate::config::Config;
use crate::pki::catalog::{IssuerCatalog, IssuerEntry};
use crate::pki::crl::{
    CrlDecoder, CrlFetcher, CrlSource, FetcherConfig, RefreshScheduler, RevocationIndexBuilder,
    RevocationRegistry, SchedulerConfig,
};
use crate::pki::truststore::TrustStore;

/// Build the refresh pipeline from configuration, fetching over HTTP.
pub async fn setup(config: &Config) -> color_eyre::Result<Arc<RefreshScheduler>> {
    let fetcher = CrlFetcher::new(FetcherConfig::from(&config.crl))
        .wrap_err("Failed to build CRL fetcher")?;
    setup_with_source(config, Arc::new(fetcher)).await
}

/// Same as [`setup`] with a caller-provided CRL source.
///
/// Fails when no trust anchor loads, when the issuer bundle is unusable, or
/// when none of its authorities chains to an anchor.
pub async fn setup_with_source(
    config: &Config,
    source: Arc<dyn CrlSource>,
) -> color_eyre::Result<Arc<RefreshScheduler>> {
    let trust_store = TrustStore::load(&config.trust.anchors_path)
        .await
        .wrap_err_with(|| {
            format!(
                "Failed to load trust anchors from {}",
                config.trust.anchors_path.display()
            )
        })?;

    let catalog = IssuerCatalog::new(
        config.catalog.rules.clone(),
        &config.trust.root_fingerprints,
    )
    .wrap_err("Invalid issuer name rules")?;
    let issuers = catalog
        .load_file(&config.catalog.bundle_path)
        .await
        .wrap_err_with(|| {
            format!(
                "Failed to load issuer bundle from {}",
                config.catalog.bundle_path.display()
            )
        })?;

    let issuers = trusted_issuers(&trust_store, issuers);
    if issuers.is_empty() {
        return Err(eyre!("No issuing authority chains to a trusted root"));
    }

    let builder = RevocationIndexBuilder::new(config.crl.false_positive_rate)
        .wrap_err("Invalid CRL index settings")?
        .with_min_capacity(config.crl.min_index_capacity);
    let decoder = CrlDecoder::new(config.crl.accept_expired, config.crl.clock_skew());

    Ok(Arc::new(RefreshScheduler::new(
        SchedulerConfig {
            interval: config.crl.refresh_interval(),
            fetch_timeout: config.crl.fetch_timeout(),
        },
        issuers,
        source,
        trust_store,
        decoder,
        builder,
        Arc::new(RevocationRegistry::new()),
    )))
}

fn trusted_issuers(trust_store: &TrustStore, issuers: Vec<IssuerEntry>) -> Vec<IssuerEntry> {
    issuers
        .into_iter()
        .filter(|issuer| match trust_store.verify_entry(&issuer.certificate) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    resource_id = %issuer.resource_id,
                    "Dropping untrusted issuing authority: {e}"
                );
                false
            }
        })
        .collect()
}
