use std::{collections::HashMap, path::PathBuf, time::Duration};

use config::{Config as ConfigLib, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::pki::catalog::{NameRule, default_rules};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub trust: TrustConfig,
    pub catalog: CatalogConfig,
    pub crl: CrlConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrustConfig {
    /// PEM file holding the trusted root certificates.
    pub anchors_path: PathBuf,
    /// Extra SHA-256 fingerprints (hex) to classify as roots inside the issuer bundle.
    #[serde(default)]
    pub root_fingerprints: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// PEM bundle with the issuing authority certificates.
    pub bundle_path: PathBuf,
    /// Ordered name rules; the first matching prefix wins.
    #[serde(default = "default_rules")]
    pub rules: Vec<NameRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrlConfig {
    pub base_url: String,
    pub cache_dir: PathBuf,
    pub refresh_interval_secs: u64,
    pub fetch_timeout_secs: u64,
    pub max_size_bytes: u64,
    pub cache_max_age_secs: u64,
    pub false_positive_rate: f64,
    /// Lower bound on the number of serials each filter is sized for.
    pub min_index_capacity: usize,
    pub accept_expired: bool,
    pub clock_skew_secs: u64,
}

impl CrlConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache_max_age_secs)
    }

    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew_secs)
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    pub fn load_with_sources(
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = ConfigLib::builder()
            .set_default("server.host", "localhost")?
            .set_default("server.port", 8080)?
            .set_default("trust.anchors_path", "config/roots.pem")?
            .set_default("catalog.bundle_path", "config/issuers.pem")?
            .set_default("crl.base_url", "http://crl.disa.mil/crl")?
            .set_default("crl.cache_dir", "cache")?
            .set_default("crl.refresh_interval_secs", 3600)?
            .set_default("crl.fetch_timeout_secs", 30)?
            .set_default("crl.max_size_bytes", 64 * 1024 * 1024)?
            .set_default("crl.cache_max_age_secs", 3600)?
            .set_default("crl.false_positive_rate", 0.0001)?
            .set_default("crl.min_index_capacity", 1)?
            .set_default("crl.accept_expired", false)?
            .set_default("crl.clock_skew_secs", 300)?
            .add_source(File::with_name("config/settings").required(false));

        // An explicit map replaces the process environment so tests do not
        // pick up each other's variables.
        if let Some(vars) = env_vars {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            // e.g. APP_CRL__BASE_URL or APP_SERVER__PORT
            builder = builder.add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );
        }

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let fpr = self.crl.false_positive_rate;
        if !(fpr > 0.0 && fpr < 1.0) {
            return Err(ConfigError::Message(format!(
                "crl.false_positive_rate must be in (0, 1), got {fpr}"
            )));
        }
        if self.crl.refresh_interval_secs == 0 {
            return Err(ConfigError::Message(
                "crl.refresh_interval_secs must be positive".into(),
            ));
        }
        if self.crl.fetch_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "crl.fetch_timeout_secs must be positive".into(),
            ));
        }
        if self.crl.fetch_timeout_secs > self.crl.refresh_interval_secs {
            return Err(ConfigError::Message(format!(
                "crl.fetch_timeout_secs ({}) must not exceed crl.refresh_interval_secs ({})",
                self.crl.fetch_timeout_secs, self.crl.refresh_interval_secs
            )));
        }
        if url::Url::parse(&self.crl.base_url).is_err() {
            return Err(ConfigError::Message(format!(
                "crl.base_url is not a valid URL: {}",
                self.crl.base_url
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::load_with_sources(Some(HashMap::new())).expect("Failed to load config");

        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.crl.refresh_interval(), Duration::from_secs(3600));
        assert_eq!(config.crl.false_positive_rate, 0.0001);
        assert_eq!(config.crl.min_index_capacity, 1);
        assert!(!config.crl.accept_expired);
        assert!(config.trust.root_fingerprints.is_empty());
        assert_eq!(config.catalog.rules.len(), 4);
    }

    #[test]
    fn test_env_config() {
        let mut env_vars = HashMap::new();
        env_vars.insert("server.host".to_string(), "0.0.0.0".to_string());
        env_vars.insert("server.port".to_string(), "443".to_string());
        env_vars.insert(
            "crl.base_url".to_string(),
            "https://pki.example.org/crl".to_string(),
        );
        env_vars.insert("crl.fetch_timeout_secs".to_string(), "5".to_string());
        env_vars.insert("crl.false_positive_rate".to_string(), "0.01".to_string());

        let config = Config::load_with_sources(Some(env_vars)).expect("Failed to load config");

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 443);
        assert_eq!(config.crl.base_url, "https://pki.example.org/crl");
        assert_eq!(config.crl.fetch_timeout(), Duration::from_secs(5));
        assert_eq!(config.crl.false_positive_rate, 0.01);
    }

    #[test]
    fn test_rejects_out_of_range_fpr() {
        let mut env_vars = HashMap::new();
        env_vars.insert("crl.false_positive_rate".to_string(), "1.5".to_string());

        let err = Config::load_with_sources(Some(env_vars)).unwrap_err();
        assert!(err.to_string().contains("false_positive_rate"));
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let mut env_vars = HashMap::new();
        env_vars.insert("crl.base_url".to_string(), "not a url".to_string());

        assert!(Config::load_with_sources(Some(env_vars)).is_err());
    }

    #[test]
    fn test_rejects_unusable_fetch_timeout() {
        let mut env_vars = HashMap::new();
        env_vars.insert("crl.fetch_timeout_secs".to_string(), "0".to_string());
        let err = Config::load_with_sources(Some(env_vars)).unwrap_err();
        assert!(err.to_string().contains("fetch_timeout_secs"), "{err}");

        let mut env_vars = HashMap::new();
        env_vars.insert("crl.refresh_interval_secs".to_string(), "60".to_string());
        env_vars.insert("crl.fetch_timeout_secs".to_string(), "61".to_string());
        let err = Config::load_with_sources(Some(env_vars)).unwrap_err();
        assert!(err.to_string().contains("refresh_interval_secs"), "{err}");

        let mut env_vars = HashMap::new();
        env_vars.insert("crl.refresh_interval_secs".to_string(), "60".to_string());
        env_vars.insert("crl.fetch_timeout_secs".to_string(), "60".to_string());
        assert!(Config::load_with_sources(Some(env_vars)).is_ok());
    }
}
