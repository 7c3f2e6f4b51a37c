use std::fmt;
use std::time::{Duration, Instant};

use bloomfilter::Bloom;
use chrono::{DateTime, Utc};
use ring::digest::{SHA256, digest};
use thiserror::Error;

use super::types::RevocationDocument;

/// Smallest capacity a filter is sized for; an empty CRL still gets a filter.
pub const MIN_CAPACITY: usize = 1;

#[derive(Debug, Error, PartialEq)]
#[error("false positive rate must be in (0, 1), got {0}")]
pub struct InvalidFalsePositiveRate(pub f64);

/// Builds one [`RevocationIndex`] per decoded CRL.
#[derive(Debug, Clone, Copy)]
pub struct RevocationIndexBuilder {
    false_positive_rate: f64,
    min_capacity: usize,
}

impl RevocationIndexBuilder {
    pub fn new(false_positive_rate: f64) -> Result<Self, InvalidFalsePositiveRate> {
        if !(false_positive_rate > 0.0 && false_positive_rate < 1.0) {
            return Err(InvalidFalsePositiveRate(false_positive_rate));
        }
        Ok(Self {
            false_positive_rate,
            min_capacity: MIN_CAPACITY,
        })
    }

    /// Size every filter for at least `min_capacity` serials.
    pub fn with_min_capacity(mut self, min_capacity: usize) -> Self {
        self.min_capacity = min_capacity.max(MIN_CAPACITY);
        self
    }

    pub fn false_positive_rate(&self) -> f64 {
        self.false_positive_rate
    }

    /// Insert every revoked serial of `doc` into a filter sized for its count.
    ///
    /// The hash seed is derived from the issuer id, so two builds of the same
    /// document answer every query the same way.
    pub fn build(&self, doc: &RevocationDocument) -> RevocationIndex {
        let capacity = doc.revoked_count().max(self.min_capacity);
        let mut filter = Bloom::new_for_fp_rate_with_seed(
            capacity,
            self.false_positive_rate,
            &filter_seed(&doc.issuer_id),
        );
        for serial in &doc.revoked_serials {
            filter.set(&serial.to_be_bytes());
        }

        RevocationIndex {
            issuer_id: doc.issuer_id.clone(),
            filter,
            capacity,
            false_positive_rate: self.false_positive_rate,
            revoked_count: doc.revoked_count(),
            this_update: doc.this_update,
            next_update: doc.next_update,
            built_at: Utc::now(),
            built_instant: Instant::now(),
        }
    }
}

fn filter_seed(issuer_id: &str) -> [u8; 32] {
    let mut seed = [0u8; 32];
    seed.copy_from_slice(digest(&SHA256, issuer_id.as_bytes()).as_ref());
    seed
}

/// Immutable membership index over one issuer's revoked serials.
pub struct RevocationIndex {
    issuer_id: String,
    filter: Bloom<[u8; 8]>,
    capacity: usize,
    false_positive_rate: f64,
    revoked_count: usize,
    this_update: DateTime<Utc>,
    next_update: Option<DateTime<Utc>>,
    built_at: DateTime<Utc>,
    built_instant: Instant,
}

impl RevocationIndex {
    /// `false` means the serial is definitely not on the CRL.
    pub fn might_contain(&self, serial: u64) -> bool {
        self.filter.check(&serial.to_be_bytes())
    }

    pub fn issuer_id(&self) -> &str {
        &self.issuer_id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn false_positive_rate(&self) -> f64 {
        self.false_positive_rate
    }

    pub fn revoked_count(&self) -> usize {
        self.revoked_count
    }

    pub fn this_update(&self) -> DateTime<Utc> {
        self.this_update
    }

    pub fn next_update(&self) -> Option<DateTime<Utc>> {
        self.next_update
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn age(&self) -> Duration {
        self.built_instant.elapsed()
    }

    pub fn size_bits(&self) -> u64 {
        self.filter.number_of_bits()
    }
}

impl fmt::Debug for RevocationIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevocationIndex")
            .field("issuer_id", &self.issuer_id)
            .field("capacity", &self.capacity)
            .field("false_positive_rate", &self.false_positive_rate)
            .field("revoked_count", &self.revoked_count)
            .field("bits", &self.size_bits())
            .field("built_at", &self.built_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn document(issuer_id: &str, serials: Vec<u64>) -> RevocationDocument {
        RevocationDocument {
            issuer_id: issuer_id.to_string(),
            issuer_name: format!("CN={issuer_id}"),
            this_update: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            next_update: None,
            revoked_serials: serials,
        }
    }

    // Cheap deterministic spread of serials, no RNG needed.
    fn serials(count: u64, salt: u64) -> Vec<u64> {
        (0..count)
            .map(|i| (i ^ salt).wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(17))
            .collect()
    }

    #[test]
    fn test_rejects_invalid_rate() {
        for rate in [0.0, 1.0, -0.5, 2.0, f64::NAN] {
            assert!(RevocationIndexBuilder::new(rate).is_err(), "{rate}");
        }
        assert!(RevocationIndexBuilder::new(0.5).is_ok());
    }

    #[test]
    fn test_no_false_negatives() {
        for rate in [0.5, 0.1, 0.001, 1e-6] {
            let doc = document("DODEMAILCA_41", serials(5_000, 7));
            let index = RevocationIndexBuilder::new(rate).unwrap().build(&doc);
            assert!(doc.revoked_serials.iter().all(|s| index.might_contain(*s)));
        }
    }

    #[test]
    fn test_false_positive_rate_is_bounded() {
        let rate = 0.01;
        let revoked = serials(10_000, 1);
        let index = RevocationIndexBuilder::new(rate)
            .unwrap()
            .build(&document("DODIDCA_59", revoked.clone()));

        let revoked: std::collections::HashSet<u64> = revoked.into_iter().collect();
        let probes: Vec<u64> = serials(200_000, 0xdead_beef)
            .into_iter()
            .filter(|s| !revoked.contains(s))
            .collect();
        let hits = probes.iter().filter(|s| index.might_contain(**s)).count();
        let observed = hits as f64 / probes.len() as f64;
        // Generous tolerance over the target to keep the test stable.
        assert!(observed <= rate * 1.5, "observed fpr {observed}");
    }

    #[test]
    fn test_empty_document() {
        let index = RevocationIndexBuilder::new(0.001)
            .unwrap()
            .build(&document("DODSWCA_60", vec![]));
        assert_eq!(index.capacity(), MIN_CAPACITY);
        assert_eq!(index.revoked_count(), 0);
        assert!(index.size_bits() > 0);
    }

    #[test]
    fn test_min_capacity() {
        let doc = document("DODIDSWCA_46", serials(10, 5));
        let index = RevocationIndexBuilder::new(0.01)
            .unwrap()
            .with_min_capacity(10_000)
            .build(&doc);
        assert_eq!(index.capacity(), 10_000);
        assert!(index.size_bits() > RevocationIndexBuilder::new(0.01).unwrap().build(&doc).size_bits());

        let floor = RevocationIndexBuilder::new(0.01).unwrap().with_min_capacity(0);
        assert_eq!(floor.build(&document("X", vec![])).capacity(), MIN_CAPACITY);
    }

    #[test]
    fn test_rebuild_is_deterministic() {
        let doc = document("DODEMAILCA_41", serials(1_000, 3));
        let builder = RevocationIndexBuilder::new(0.05).unwrap();
        let first = builder.build(&doc);
        let second = builder.build(&doc.clone());

        for serial in serials(50_000, 99) {
            assert_eq!(first.might_contain(serial), second.might_contain(serial));
        }
        assert_eq!(first.size_bits(), second.size_bits());
    }

    #[test]
    fn test_example_serials() {
        let doc = document("Example-CA-41", vec![1572835, 3145685]);
        let index = RevocationIndexBuilder::new(1e-6).unwrap().build(&doc);
        assert!(index.might_contain(1572835));
        assert!(index.might_contain(3145685));
        assert!(!index.might_contain(3145686));
        assert_eq!(index.issuer_id(), "Example-CA-41");
    }
}
