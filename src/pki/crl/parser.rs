use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};
use x509_parser::prelude::*;

use super::errors::ParseError;
use super::types::RevocationDocument;

/// Turns DER CRL bytes into a [`RevocationDocument`].
///
/// The validity window is checked against the clock: a `thisUpdate` later than
/// now (plus the allowed skew) is rejected, and so is a `nextUpdate` in the
/// past unless the decoder was built with `accept_expired`.
#[derive(Debug, Clone)]
pub struct CrlDecoder {
    accept_expired: bool,
    clock_skew: TimeDelta,
}

impl Default for CrlDecoder {
    fn default() -> Self {
        Self::new(false, Duration::from_secs(300))
    }
}

impl CrlDecoder {
    pub fn new(accept_expired: bool, clock_skew: Duration) -> Self {
        Self {
            accept_expired,
            clock_skew: TimeDelta::from_std(clock_skew).unwrap_or(TimeDelta::zero()),
        }
    }

    pub fn decode(&self, issuer_id: &str, der: &[u8]) -> Result<RevocationDocument, ParseError> {
        self.decode_at(issuer_id, der, Utc::now())
    }

    pub fn decode_at(
        &self,
        issuer_id: &str,
        der: &[u8],
        now: DateTime<Utc>,
    ) -> Result<RevocationDocument, ParseError> {
        let (rem, crl) =
            CertificateRevocationList::from_der(der).map_err(|e| ParseError::Malformed(e.into()))?;
        if !rem.is_empty() {
            warn!(issuer_id, "Ignoring {} trailing bytes after CRL", rem.len());
        }

        let this_update = asn1_to_utc(crl.last_update())?;
        let next_update = crl.next_update().map(asn1_to_utc).transpose()?;

        if this_update > now + self.clock_skew {
            return Err(ParseError::NotYetValid {
                this_update: this_update.to_rfc3339(),
            });
        }
        if let Some(next_update) = next_update
            && next_update < now
        {
            if !self.accept_expired {
                return Err(ParseError::Expired {
                    next_update: next_update.to_rfc3339(),
                });
            }
            warn!(issuer_id, %next_update, "Accepting stale CRL");
        }

        let revoked_serials: Vec<u64> = crl
            .iter_revoked_certificates()
            .map(|revoked| serial_to_u64(revoked.raw_serial()))
            .collect();

        debug!(
            issuer_id,
            revoked = revoked_serials.len(),
            "Decoded CRL issued by {}",
            crl.issuer()
        );

        Ok(RevocationDocument {
            issuer_id: issuer_id.to_string(),
            issuer_name: crl.issuer().to_string(),
            this_update,
            next_update,
            revoked_serials,
        })
    }
}

fn asn1_to_utc(time: ASN1Time) -> Result<DateTime<Utc>, ParseError> {
    DateTime::from_timestamp(time.timestamp(), 0).ok_or(ParseError::InvalidTime)
}

/// Low 64 bits of a DER INTEGER serial, big-endian.
pub fn serial_to_u64(raw: &[u8]) -> u64 {
    let significant = raw
        .iter()
        .position(|&b| b != 0)
        .map_or(&raw[raw.len()..], |start| &raw[start..]);
    if significant.len() > 8 {
        debug!(
            "Serial {} is wider than 64 bits, indexing its low 64 bits",
            hex::encode(raw)
        );
    }

    let tail = &significant[significant.len().saturating_sub(8)..];
    let mut buf = [0u8; 8];
    buf[8 - tail.len()..].copy_from_slice(tail);
    u64::from_be_bytes(buf)
}
