//! Issuing authority catalog.
//!
//! Reads the authority bundle, drops the roots, and gives every remaining
//! issuing authority a stable resource id through an ordered table of
//! `prefix -> template` rules. An authority that no rule covers is an error:
//! its CRL would otherwise never be indexed.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};
use x509_parser::prelude::X509Certificate;

use super::truststore::{CertificateEntry, normalize_fingerprint, pem_bundle_to_der};

const SUFFIX: &str = "{suffix}";
const COMMON_NAME: &str = "{cn}";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("issuer bundle contains no certificates")]
    Empty,

    #[error("issuer bundle is unreadable: {0}")]
    Unreadable(String),

    #[error("I/O error reading issuer bundle: {0}")]
    Io(#[from] std::io::Error),

    #[error("no issuing authorities left after removing roots")]
    NoIssuers,

    #[error("no name rule matches issuing authority {0:?}")]
    Unmapped(String),

    #[error("issuers {first:?} and {second:?} both map to resource id {id}")]
    DuplicateId {
        id: String,
        first: String,
        second: String,
    },

    #[error("invalid name rule {prefix:?}: {reason}")]
    InvalidRule { prefix: String, reason: String },

    #[error("resource id {0:?} may only contain [A-Za-z0-9_.-]")]
    InvalidResourceId(String),
}

/// Maps common names starting with `prefix` to a resource id built from
/// `template`. `{suffix}` is the part of the CN after its first `-`, `{cn}` is
/// the whole CN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRule {
    pub prefix: String,
    pub template: String,
}

impl NameRule {
    pub fn new(prefix: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            template: template.into(),
        }
    }

    fn validate(&self) -> Result<(), CatalogError> {
        let invalid = |reason: &str| CatalogError::InvalidRule {
            prefix: self.prefix.clone(),
            reason: reason.to_string(),
        };

        if self.prefix.trim().is_empty() {
            return Err(invalid("prefix is empty"));
        }
        if !self.template.contains(SUFFIX) && !self.template.contains(COMMON_NAME) {
            return Err(invalid("template needs a {suffix} or {cn} placeholder"));
        }
        let literal = self.template.replace(SUFFIX, "").replace(COMMON_NAME, "");
        if !literal.chars().all(is_id_char) {
            return Err(invalid("template contains characters outside [A-Za-z0-9_.-]"));
        }
        Ok(())
    }

    fn apply(&self, common_name: &str) -> Option<Result<String, CatalogError>> {
        if !common_name.starts_with(&self.prefix) {
            return None;
        }

        let mut id = self.template.replace(COMMON_NAME, common_name);
        if id.contains(SUFFIX) {
            let Some((_, suffix)) = common_name.split_once('-') else {
                return Some(Err(CatalogError::Unmapped(common_name.to_string())));
            };
            id = id.replace(SUFFIX, suffix.trim());
        }

        if id.is_empty() || !id.chars().all(is_id_char) {
            return Some(Err(CatalogError::InvalidResourceId(id)));
        }
        Some(Ok(id))
    }
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

/// Name rules for the DoD issuing CA layout. Order matters: `DOD ID SW` has
/// to be tried before `DOD ID`.
pub fn default_rules() -> Vec<NameRule> {
    vec![
        NameRule::new("DOD EMAIL", "DODEMAILCA_{suffix}"),
        NameRule::new("DOD ID SW", "DODIDSWCA_{suffix}"),
        NameRule::new("DOD ID", "DODIDCA_{suffix}"),
        NameRule::new("DOD SW", "DODSWCA_{suffix}"),
    ]
}

/// An issuing authority whose CRL gets indexed.
#[derive(Debug, Clone)]
pub struct IssuerEntry {
    pub common_name: String,
    /// Lowercase hex SHA-256 of the DER certificate.
    pub fingerprint: String,
    pub resource_id: String,
    pub certificate: CertificateEntry,
}

#[derive(Debug, Clone)]
pub struct IssuerCatalog {
    rules: Vec<NameRule>,
    root_fingerprints: HashSet<String>,
}

impl IssuerCatalog {
    /// Rules are validated here so a broken table fails at startup.
    pub fn new<I, S>(rules: Vec<NameRule>, root_fingerprints: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for rule in &rules {
            rule.validate()?;
        }
        Ok(Self {
            rules,
            root_fingerprints: root_fingerprints
                .into_iter()
                .map(|fp| normalize_fingerprint(fp.as_ref()))
                .collect(),
        })
    }

    /// Resource id for a common name, using the first rule whose prefix matches.
    pub fn resource_id(&self, common_name: &str) -> Result<String, CatalogError> {
        self.rules
            .iter()
            .find_map(|rule| rule.apply(common_name))
            .unwrap_or_else(|| Err(CatalogError::Unmapped(common_name.to_string())))
    }

    pub async fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<Vec<IssuerEntry>, CatalogError> {
        let path = path.as_ref();
        let bundle = fs::read(path).await?;
        let entries = self.load(&bundle)?;
        info!(
            "Loaded {} issuing authorities from {}",
            entries.len(),
            path.display()
        );
        Ok(entries)
    }

    pub fn load(&self, bundle: &[u8]) -> Result<Vec<IssuerEntry>, CatalogError> {
        let text = std::str::from_utf8(bundle)
            .map_err(|e| CatalogError::Unreadable(format!("bundle is not UTF-8: {e}")))?;

        let ders = pem_bundle_to_der(text);
        if ders.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut entries: Vec<IssuerEntry> = Vec::new();
        let mut seen_fingerprints = HashSet::new();
        let mut ids: HashMap<String, String> = HashMap::new();

        for der in ders {
            let certificate = match CertificateEntry::from_der(&der) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unparsable certificate in bundle: {e}");
                    continue;
                }
            };
            if !seen_fingerprints.insert(certificate.fingerprint.clone()) {
                debug!("Skipping duplicate certificate {}", certificate.subject);
                continue;
            }

            let Ok(cert) = certificate.parse() else {
                continue;
            };
            if self.is_root(&certificate, &cert) {
                debug!("Skipping root certificate {}", certificate.subject);
                continue;
            }
            let common_name = common_name(&cert).unwrap_or_else(|| certificate.subject.clone());
            drop(cert);

            let resource_id = self.resource_id(&common_name)?;
            if let Some(first) = ids.insert(resource_id.clone(), common_name.clone()) {
                return Err(CatalogError::DuplicateId {
                    id: resource_id,
                    first,
                    second: common_name,
                });
            }

            debug!(%resource_id, fingerprint = %certificate.fingerprint, "Catalogued {common_name}");
            entries.push(IssuerEntry {
                common_name,
                fingerprint: certificate.fingerprint.clone(),
                resource_id,
                certificate,
            });
        }

        if entries.is_empty() {
            return Err(CatalogError::NoIssuers);
        }
        Ok(entries)
    }

    fn is_root(&self, entry: &CertificateEntry, cert: &X509Certificate<'_>) -> bool {
        cert.subject() == cert.issuer() || self.root_fingerprints.contains(&entry.fingerprint)
    }
}

fn common_name(cert: &X509Certificate<'_>) -> Option<String> {
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
}
