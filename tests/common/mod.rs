#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Path as UrlPath, State},
    http::StatusCode,
    routing::get,
};
use crl_index::{
    config::Config,
    server::{AppState, Server, ServerConfig},
};
use rcgen::{
    BasicConstraints, CertificateParams, CertificateRevocationListParams, DistinguishedName,
    DnType, IsCa, Issuer, KeyIdMethod, KeyPair, RevokedCertParams, SerialNumber, date_time_ymd,
};

pub struct Ca {
    pub issuer: Issuer<'static, KeyPair>,
    pub pem: String,
}

fn ca_params(common_name: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, "U.S. Government");
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params
}

impl Ca {
    pub fn root(common_name: &str) -> Self {
        let params = ca_params(common_name);
        let key_pair = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key_pair).unwrap();
        Self {
            pem: cert.pem(),
            issuer: Issuer::new(params, key_pair),
        }
    }

    pub fn intermediate(common_name: &str, parent: &Ca) -> Self {
        let params = ca_params(common_name);
        let key_pair = KeyPair::generate().unwrap();
        let cert = params.signed_by(&key_pair, &parent.issuer).unwrap();
        Self {
            pem: cert.pem(),
            issuer: Issuer::new(params, key_pair),
        }
    }

    pub fn crl(&self, serials: &[u64]) -> Vec<u8> {
        CertificateRevocationListParams {
            this_update: date_time_ymd(2020, 1, 1),
            next_update: date_time_ymd(2090, 1, 1),
            crl_number: SerialNumber::from(1u64),
            issuing_distribution_point: None,
            revoked_certs: serials
                .iter()
                .map(|serial| RevokedCertParams {
                    serial_number: SerialNumber::from(*serial),
                    revocation_time: date_time_ymd(2021, 1, 1),
                    reason_code: None,
                    invalidity_date: None,
                })
                .collect(),
            key_identifier_method: KeyIdMethod::Sha256,
        }
        .signed_by(&self.issuer)
        .unwrap()
        .der()
        .to_vec()
    }
}

/// Serves `GET /crl/<id>.crl` from the given map; anything else is a 404.
pub async fn spawn_distribution_point(crls: HashMap<String, Vec<u8>>) -> String {
    async fn serve(
        State(crls): State<Arc<HashMap<String, Vec<u8>>>>,
        UrlPath(file): UrlPath<String>,
    ) -> Result<Vec<u8>, StatusCode> {
        file.strip_suffix(".crl")
            .and_then(|id| crls.get(id))
            .cloned()
            .ok_or(StatusCode::NOT_FOUND)
    }

    let router = Router::new()
        .route("/crl/{file}", get(serve))
        .with_state(Arc::new(crls));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}/crl")
}

/// Configuration rooted in `dir`, with `roots.pem` and `issuers.pem` expected
/// inside it.
pub fn config(dir: &Path, base_url: &str) -> Config {
    let path = |name: &str| dir.join(name).to_string_lossy().into_owned();
    let overrides = HashMap::from([
        ("trust.anchors_path".to_string(), path("roots.pem")),
        ("catalog.bundle_path".to_string(), path("issuers.pem")),
        ("crl.cache_dir".to_string(), path("cache")),
        ("crl.base_url".to_string(), base_url.to_string()),
        ("crl.fetch_timeout_secs".to_string(), "5".to_string()),
        ("crl.false_positive_rate".to_string(), "0.000001".to_string()),
    ]);
    Config::load_with_sources(Some(overrides)).unwrap()
}

// Helper function to spawn a test server on a random port
pub async fn spawn_server(state: AppState) -> String {
    let server_config = ServerConfig {
        host: "127.0.0.1",
        port: 0,
    };
    let server = Server::new(state, server_config).await.unwrap();

    let port = server.port().unwrap();
    tokio::spawn(async move {
        server.run().await.expect("failed to run server");
    });

    format!("http://{}:{}", server_config.host, port)
}
