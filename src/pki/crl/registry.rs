use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use super::index::RevocationIndex;

/// Issuer id → index. Never mutated once published.
pub type Snapshot = HashMap<String, Arc<RevocationIndex>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RevocationStatus {
    /// No index has ever been built for this issuer.
    UnknownIssuer,
    NotRevoked,
    /// The serial is on the CRL, or collided with one that is.
    PossiblyRevoked,
}

impl RevocationStatus {
    pub fn is_revoked(self) -> bool {
        matches!(self, RevocationStatus::PossiblyRevoked)
    }
}

/// Per-issuer metadata for status pages.
#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    pub issuer_id: String,
    pub revoked_count: usize,
    pub this_update: DateTime<Utc>,
    pub next_update: Option<DateTime<Utc>>,
    pub built_at: DateTime<Utc>,
    pub age_secs: u64,
    pub false_positive_rate: f64,
    pub size_bits: u64,
}

/// Current set of revocation indexes, shared between the refresh task and
/// the query handlers.
///
/// Readers load the current snapshot without locking; writers publish a new
/// map that reuses the `Arc` of every issuer they did not touch.
#[derive(Debug)]
pub struct RevocationRegistry {
    current: ArcSwap<Snapshot>,
}

impl Default for RevocationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RevocationRegistry {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot::new()),
        }
    }

    pub fn lookup(&self, issuer_id: &str, serial: u64) -> RevocationStatus {
        let snapshot = self.current.load();
        match snapshot.get(issuer_id) {
            None => RevocationStatus::UnknownIssuer,
            Some(index) if index.might_contain(serial) => RevocationStatus::PossiblyRevoked,
            Some(_) => RevocationStatus::NotRevoked,
        }
    }

    /// Publish `index` for `issuer_id`, replacing any previous one.
    pub fn swap(&self, issuer_id: &str, index: RevocationIndex) {
        let index = Arc::new(index);
        let revoked = index.revoked_count();
        self.current.rcu(|current| {
            let mut next = Snapshot::clone(current);
            next.insert(issuer_id.to_string(), Arc::clone(&index));
            next
        });
        info!(issuer_id, revoked, "Published revocation index");
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    pub fn get(&self, issuer_id: &str) -> Option<Arc<RevocationIndex>> {
        self.current.load().get(issuer_id).cloned()
    }

    pub fn snapshot_age(&self, issuer_id: &str) -> Option<Duration> {
        self.current.load().get(issuer_id).map(|index| index.age())
    }

    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().is_empty()
    }

    /// Summaries sorted by issuer id.
    pub fn summaries(&self) -> Vec<IndexSummary> {
        let snapshot = self.current.load();
        let mut summaries: Vec<_> = snapshot
            .values()
            .map(|index| IndexSummary {
                issuer_id: index.issuer_id().to_string(),
                revoked_count: index.revoked_count(),
                this_update: index.this_update(),
                next_update: index.next_update(),
                built_at: index.built_at(),
                age_secs: index.age().as_secs(),
                false_positive_rate: index.false_positive_rate(),
                size_bits: index.size_bits(),
            })
            .collect();
        summaries.sort_by(|a, b| a.issuer_id.cmp(&b.issuer_id));
        summaries
    }
}
