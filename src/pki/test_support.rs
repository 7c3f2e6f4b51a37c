//! Certificate and CRL fixtures minted with `rcgen`.

use rcgen::{
    BasicConstraints, CertificateParams, CertificateRevocationListParams, DistinguishedName,
    DnType, IsCa, Issuer, KeyIdMethod, KeyPair, RevokedCertParams, SerialNumber, date_time_ymd,
};

pub struct TestCa {
    pub issuer: Issuer<'static, KeyPair>,
    pub der: Vec<u8>,
    pub pem: String,
}

fn ca_params(common_name: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CountryName, "US");
    dn.push(DnType::OrganizationName, "Test Organization");
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params
}

impl TestCa {
    pub fn root(common_name: &str) -> Self {
        let params = ca_params(common_name);
        let key_pair = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key_pair).unwrap();
        Self {
            der: cert.der().to_vec(),
            pem: cert.pem(),
            issuer: Issuer::new(params, key_pair),
        }
    }

    pub fn intermediate(common_name: &str, parent: &TestCa) -> Self {
        let params = ca_params(common_name);
        let key_pair = KeyPair::generate().unwrap();
        let cert = params.signed_by(&key_pair, &parent.issuer).unwrap();
        Self {
            der: cert.der().to_vec(),
            pem: cert.pem(),
            issuer: Issuer::new(params, key_pair),
        }
    }
}

pub fn expired_intermediate(common_name: &str, parent: &TestCa) -> Vec<u8> {
    let mut params = ca_params(common_name);
    params.not_before = date_time_ymd(2000, 1, 1);
    params.not_after = date_time_ymd(2001, 1, 1);
    let key_pair = KeyPair::generate().unwrap();
    params
        .signed_by(&key_pair, &parent.issuer)
        .unwrap()
        .der()
        .to_vec()
}

pub fn leaf_cert(common_name: &str, parent: &TestCa) -> Vec<u8> {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    params.is_ca = IsCa::NoCa;
    let key_pair = KeyPair::generate().unwrap();
    params
        .signed_by(&key_pair, &parent.issuer)
        .unwrap()
        .der()
        .to_vec()
}

/// CRL over `serials`, valid from 2020 to 2090.
pub fn signed_crl(ca: &TestCa, serials: &[u64]) -> Vec<u8> {
    signed_crl_with_window(ca, serials, (2020, 1, 1), (2090, 1, 1))
}

pub fn signed_crl_with_window(
    ca: &TestCa,
    serials: &[u64],
    this_update: (i32, u8, u8),
    next_update: (i32, u8, u8),
) -> Vec<u8> {
    let (y, m, d) = this_update;
    let (ny, nm, nd) = next_update;
    let params = CertificateRevocationListParams {
        this_update: date_time_ymd(y, m, d),
        next_update: date_time_ymd(ny, nm, nd),
        crl_number: SerialNumber::from(1u64),
        issuing_distribution_point: None,
        revoked_certs: serials
            .iter()
            .map(|serial| RevokedCertParams {
                serial_number: SerialNumber::from(*serial),
                revocation_time: date_time_ymd(2020, 1, 1),
                reason_code: None,
                invalidity_date: None,
            })
            .collect(),
        key_identifier_method: KeyIdMethod::Sha256,
    };
    params.signed_by(&ca.issuer).unwrap().der().to_vec()
}
