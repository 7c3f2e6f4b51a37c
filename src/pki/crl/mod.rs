//! Certificate Revocation List (CRL) ingestion and indexing
//!
//! # Features
//! - CRL fetching from per-issuer distribution points with an on-disk cache
//! - Parsing CRLs into revoked serial numbers
//! - One bloom filter index per issuing authority
//! - Lock-free registry of the current indexes
//! - Scheduled periodic refresh

mod errors;
pub mod fetcher;
pub mod index;
mod parser;
pub mod registry;
pub mod scheduler;
mod types;

pub use errors::{FetchError, FetchResult, ParseError, RefreshError};
pub use fetcher::{CrlFetcher, CrlOrigin, CrlSource, FetchedCrl, FetcherConfig};
pub use index::{InvalidFalsePositiveRate, RevocationIndex, RevocationIndexBuilder};
pub use parser::{CrlDecoder, serial_to_u64};
pub use registry::{IndexSummary, RevocationRegistry, RevocationStatus};
pub use scheduler::{IssuerState, IssuerStatus, RefreshScheduler, SchedulerConfig, SchedulerHandle};
pub use types::RevocationDocument;
