use reqwest::StatusCode;
use thiserror::Error;
use x509_parser::prelude::X509Error;

use crate::pki::truststore::TrustError;

/// Failures while retrieving CRL bytes for one issuer.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Timeout while fetching CRL")]
    Timeout,

    #[error("CRL not found at {0}")]
    NotFound(String),

    #[error("CRL exceeds the {limit} byte limit")]
    Oversize { limit: u64 },

    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP error {status} when fetching CRL from {url}")]
    Status { status: StatusCode, url: String },

    #[error("Downloaded CRL is unusable: {0}")]
    Corrupt(String),

    #[error("Invalid CRL URL: {0}")]
    InvalidUrl(String),

    #[error("CRL cache error: {0}")]
    Cache(#[from] std::io::Error),
}

/// Failures while decoding CRL bytes.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("CRL parsing failed: {0}")]
    Malformed(#[from] X509Error),

    #[error("CRL thisUpdate {this_update} is in the future")]
    NotYetValid { this_update: String },

    #[error("CRL is expired (nextUpdate: {next_update})")]
    Expired { next_update: String },

    #[error("CRL timestamp out of range")]
    InvalidTime,
}

/// Failure of one refresh attempt for one issuer.
#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("trust check failed: {0}")]
    Trust(#[from] TrustError),

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("decode failed: {0}")]
    Parse(#[from] ParseError),
}

impl RefreshError {
    /// Short stage label for logs and status output.
    pub fn stage(&self) -> &'static str {
        match self {
            RefreshError::Trust(_) => "trust",
            RefreshError::Fetch(_) => "fetch",
            RefreshError::Parse(_) => "decode",
        }
    }
}

pub type FetchResult<T> = Result<T, FetchError>;
