use chrono::{DateTime, Utc};

/// Revocation data decoded from one CRL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevocationDocument {
    /// Resource id of the issuing authority this CRL belongs to.
    pub issuer_id: String,
    /// Issuer distinguished name as written in the CRL.
    pub issuer_name: String,
    pub this_update: DateTime<Utc>,
    pub next_update: Option<DateTime<Utc>>,
    /// Revoked serials in CRL order.
    pub revoked_serials: Vec<u64>,
}

impl RevocationDocument {
    pub fn revoked_count(&self) -> usize {
        self.revoked_serials.len()
    }
}
