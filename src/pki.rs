pub mod catalog;
pub mod crl;
pub mod truststore;

#[cfg(test)]
pub(crate) mod test_support;

pub use catalog::{CatalogError, IssuerCatalog, IssuerEntry, NameRule};
pub use truststore::{TrustError, TrustStore};
