use axum::extract::{Path, State};
use axum::response::IntoResponse;
use tracing::debug;

use crate::pki::crl::RevocationStatus;
use crate::server::AppState;
use crate::server::errors::QueryError;

/// `GET /{issuer_id}/{serial}`
///
/// `true` means the serial may be revoked (bloom filter hit), `false` means it
/// is definitely not on the issuer's current CRL.
pub async fn revocation_status(
    State(state): State<AppState>,
    Path((issuer_id, serial)): Path<(String, String)>,
) -> Result<impl IntoResponse, QueryError> {
    let serial = parse_serial(&serial)?;

    let status = state.registry.lookup(&issuer_id, serial);
    debug!(%issuer_id, serial, ?status, "Revocation lookup");

    match status {
        RevocationStatus::UnknownIssuer => Err(QueryError::UnknownIssuer(issuer_id)),
        status => Ok(format!("Certificate Revoked?: {}", status.is_revoked())),
    }
}

/// Decimal digits only; no sign, no whitespace, must fit in a `u64`.
fn parse_serial(raw: &str) -> Result<u64, QueryError> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(QueryError::InvalidSerial(raw.to_string()));
    }
    raw.parse()
        .map_err(|_| QueryError::InvalidSerial(raw.to_string()))
}
