use std::collections::BTreeMap;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::pki::crl::{IndexSummary, IssuerStatus};
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct IssuerStats {
    pub issuer_id: String,
    /// Missing until the first successful refresh.
    pub index: Option<IndexSummary>,
    pub refresh: Option<IssuerStatus>,
}

/// `GET /stats`: one entry per known issuer, sorted by id.
pub async fn stats(State(state): State<AppState>) -> Json<Vec<IssuerStats>> {
    Json(collect(&state))
}

fn collect(state: &AppState) -> Vec<IssuerStats> {
    let mut by_issuer: BTreeMap<String, IssuerStats> = BTreeMap::new();

    for summary in state.registry.summaries() {
        let issuer_id = summary.issuer_id.clone();
        by_issuer.insert(
            issuer_id.clone(),
            IssuerStats {
                issuer_id,
                index: Some(summary),
                refresh: None,
            },
        );
    }

    if let Some(scheduler) = &state.scheduler {
        for status in scheduler.statuses() {
            let entry = by_issuer
                .entry(status.issuer_id.clone())
                .or_insert_with_key(|issuer_id| IssuerStats {
                    issuer_id: issuer_id.clone(),
                    index: None,
                    refresh: None,
                });
            entry.refresh = Some(status);
        }
    }

    by_issuer.into_values().collect()
}
