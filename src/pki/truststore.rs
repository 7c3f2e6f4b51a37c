use std::fmt;
use std::path::Path;
use std::sync::Arc;

use ring::digest::{SHA256, digest};
use thiserror::Error;
use tokio::fs;
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::*;

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

/// Error type for trust store operations.
#[derive(Debug, Error)]
pub enum TrustError {
    #[error("X.509 error: {0}")]
    X509(#[from] X509Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no trust anchors could be loaded")]
    NoAnchors,

    #[error("certificate {subject} rejected: {reason}")]
    Rejected {
        subject: String,
        reason: RejectReason,
    },

    #[error("CRL issuer {crl_issuer} does not match authority {authority}")]
    IssuerMismatch {
        crl_issuer: String,
        authority: String,
    },

    #[error("CRL signature verification failed")]
    CrlSignature,
}

/// Why a candidate certificate failed the anchor check. Only used for logging;
/// callers see a plain yes/no.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NoMatchingAnchor,
    BadSignature,
    Expired,
    NotCa,
    Malformed,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            RejectReason::NoMatchingAnchor => "no-matching-anchor",
            RejectReason::BadSignature => "bad-signature",
            RejectReason::Expired => "expired",
            RejectReason::NotCa => "not-ca",
            RejectReason::Malformed => "malformed",
        };
        f.write_str(code)
    }
}

/// Represents a certificate with additional metadata.
#[derive(Debug, Clone)]
pub struct CertificateEntry {
    pub raw: Arc<Vec<u8>>,
    pub serial_number: String,
    pub subject: String,
    pub issuer: String,
    /// Lowercase hex SHA-256 of the DER encoding.
    pub fingerprint: String,
}

impl CertificateEntry {
    /// Create a certificate entry from DER-encoded bytes
    pub fn from_der(der: impl AsRef<[u8]>) -> Result<Self, TrustError> {
        let der_bytes = der.as_ref();
        let (_, cert) =
            X509Certificate::from_der(der_bytes).map_err(|e| TrustError::X509(e.into()))?;

        Ok(Self {
            raw: Arc::new(der_bytes.to_vec()),
            serial_number: cert.tbs_certificate.serial.to_string(),
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            fingerprint: sha256_fingerprint(der_bytes),
        })
    }

    /// Parse the certificate from stored DER bytes
    pub fn parse(&self) -> Result<X509Certificate<'_>, TrustError> {
        let (_, cert) =
            X509Certificate::from_der(&self.raw).map_err(|e| TrustError::X509(e.into()))?;
        Ok(cert)
    }
}

pub fn sha256_fingerprint(der: &[u8]) -> String {
    hex::encode(digest(&SHA256, der))
}

/// Normalise a configured fingerprint (`AB:CD:..` or `abcd..`) to lowercase hex.
pub fn normalize_fingerprint(fingerprint: &str) -> String {
    fingerprint
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Decode every certificate in a concatenated PEM bundle.
///
/// Text outside the armour (blank lines, `subject=`/`issuer=` lines written by
/// openssl) is ignored. Segments that fail to decode are logged and skipped.
pub fn pem_bundle_to_der(bundle: &str) -> Vec<Vec<u8>> {
    let mut certs = Vec::new();

    for (index, segment) in bundle.split_inclusive(PEM_END).enumerate() {
        if !segment.contains(PEM_BEGIN) {
            continue;
        }
        match parse_x509_pem(segment.as_bytes()) {
            Ok((_, pem)) if pem.label == "CERTIFICATE" => certs.push(pem.contents),
            Ok((_, pem)) => {
                tracing::warn!(index, label = %pem.label, "Skipping non-certificate PEM block");
            }
            Err(e) => {
                tracing::warn!(index, "Skipping malformed PEM segment: {e}");
            }
        }
    }
    certs
}

/// The fixed set of trusted root certificates for the single trust domain.
#[derive(Debug, Clone)]
pub struct TrustStore {
    anchors: Arc<Vec<CertificateEntry>>,
}

impl TrustStore {
    /// Load the anchors from a PEM file.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self, TrustError> {
        let path = path.as_ref();
        let pem = fs::read_to_string(path).await?;
        let store = Self::from_pem(&pem)?;
        tracing::info!(
            "Loaded {} trust anchors from {}",
            store.len(),
            path.display()
        );
        Ok(store)
    }

    pub fn from_pem(pem: &str) -> Result<Self, TrustError> {
        Self::from_der_certs(pem_bundle_to_der(pem))
    }

    pub fn from_der_certs<I, D>(der_certs: I) -> Result<Self, TrustError>
    where
        I: IntoIterator<Item = D>,
        D: AsRef<[u8]>,
    {
        let mut anchors = Vec::new();
        for der in der_certs {
            match CertificateEntry::from_der(der) {
                Ok(entry) => {
                    if entry.subject != entry.issuer {
                        tracing::warn!("Trust anchor {} is not self-signed", entry.subject);
                    }
                    anchors.push(entry);
                }
                Err(e) => tracing::warn!("Ignoring unparsable trust anchor: {e}"),
            }
        }

        if anchors.is_empty() {
            return Err(TrustError::NoAnchors);
        }
        Ok(Self {
            anchors: Arc::new(anchors),
        })
    }

    /// Return the amount of trusted roots.
    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    /// True iff the candidate chains directly to one of the anchors.
    pub fn verify(&self, candidate: &X509Certificate<'_>) -> bool {
        match self.check(candidate) {
            Ok(()) => true,
            Err(reason) => {
                tracing::warn!(
                    subject = %candidate.subject(),
                    %reason,
                    "Certificate does not chain to a trusted root"
                );
                false
            }
        }
    }

    /// Same as [`TrustStore::verify`] for a stored entry, with the reason kept
    /// in the error.
    pub fn verify_entry(&self, entry: &CertificateEntry) -> Result<(), TrustError> {
        let reject = |reason| TrustError::Rejected {
            subject: entry.subject.clone(),
            reason,
        };
        let cert = entry.parse().map_err(|_| reject(RejectReason::Malformed))?;
        self.check(&cert).map_err(reject)
    }

    /// Anchor check with a reason code on failure.
    pub fn check(&self, candidate: &X509Certificate<'_>) -> Result<(), RejectReason> {
        let now = ASN1Time::now();

        if !candidate.validity().is_valid_at(now) {
            return Err(RejectReason::Expired);
        }
        match candidate.basic_constraints() {
            Ok(Some(bc)) if bc.value.ca => {}
            Ok(_) => return Err(RejectReason::NotCa),
            Err(_) => return Err(RejectReason::Malformed),
        }

        let mut outcome = RejectReason::NoMatchingAnchor;
        for anchor in self.anchors.iter() {
            let Ok(root) = anchor.parse() else {
                continue;
            };
            if root.subject() != candidate.issuer() {
                continue;
            }
            if candidate
                .verify_signature(Some(root.public_key()))
                .is_err()
            {
                outcome = RejectReason::BadSignature;
                continue;
            }
            if !root.validity().is_valid_at(now) {
                outcome = RejectReason::Expired;
                continue;
            }
            return Ok(());
        }
        Err(outcome)
    }
}

/// Accept a CRL only if it was issued and signed by `authority`.
pub fn verify_crl(authority: &CertificateEntry, crl_der: &[u8]) -> Result<(), TrustError> {
    let authority_cert = authority.parse()?;
    let (_, crl) =
        CertificateRevocationList::from_der(crl_der).map_err(|e| TrustError::X509(e.into()))?;

    if crl.issuer().as_raw() != authority_cert.subject().as_raw() {
        return Err(TrustError::IssuerMismatch {
            crl_issuer: crl.issuer().to_string(),
            authority: authority.subject.clone(),
        });
    }

    x509_parser::verify::verify_signature(
        authority_cert.public_key(),
        &crl.signature_algorithm,
        &crl.signature_value,
        crl.tbs_cert_list.as_ref(),
    )
    .map_err(|e| {
        tracing::debug!("CRL signature verification failed: {e:?}");
        TrustError::CrlSignature
    })
}
