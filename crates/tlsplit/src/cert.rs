//! Self-signed certificate generation and PEM plumbing
//!
//! Embedders (and the companion CLI) use this to mint the certificate
//! presented to victims; the engine itself only ever consumes ready-made
//! TLS configs through the policy.

use crate::error::{Error, Result};
use rand::Rng;
use rcgen::{
  CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, KeyPair,
  KeyUsagePurpose, SanType,
};
use std::io::Write;
use std::net::IpAddr;
use std::path::Path;
use time::{Duration, OffsetDateTime};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};

/// Certificate validity period (1 year)
const TTL: Duration = Duration::days(365);
/// Offset for not_before to absorb clock skew between proxy and victim
const NOT_BEFORE_OFFSET: Duration = Duration::seconds(60);

/// A freshly generated self-signed server certificate and its private key.
pub struct SelfSignedCert {
  cert_der: CertificateDer<'static>,
  key_der: PrivateKeyDer<'static>,
  cert_pem: String,
  key_pem: String,
}

impl SelfSignedCert {
  /// Generate a certificate for the given organization, IP SANs, and DNS
  /// SANs.
  ///
  /// The certificate carries digital-signature and key-encipherment usage,
  /// the server-auth EKU, a random serial, and a one-year validity starting
  /// just before now.
  pub fn generate(org: &str, ips: &[IpAddr], dns_names: &[String]) -> Result<Self> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, org);
    params.distinguished_name = dn;

    params.serial_number = Some(rand::thread_rng().gen::<u64>().into());
    params.key_usages = vec![
      KeyUsagePurpose::DigitalSignature,
      KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    let now = OffsetDateTime::now_utc();
    params.not_before = now - NOT_BEFORE_OFFSET;
    params.not_after = now + TTL;

    let mut sans = Vec::with_capacity(ips.len() + dns_names.len());
    for ip in ips {
      sans.push(SanType::IpAddress(*ip));
    }
    for name in dns_names {
      let dns_name = name
        .as_str()
        .try_into()
        .map_err(|_| Error::certificate(format!("invalid dns name: {name}")))?;
      sans.push(SanType::DnsName(dns_name));
    }
    params.subject_alt_names = sans;

    let key_pair = KeyPair::generate()
      .map_err(|e| Error::certificate(format!("failed to generate key pair: {e}")))?;
    let cert = params
      .self_signed(&key_pair)
      .map_err(|e| Error::certificate(format!("failed to sign certificate: {e}")))?;

    let key_der = PrivateKeyDer::try_from(key_pair.serialize_der())
      .map_err(|_| Error::certificate("failed to serialize private key"))?;

    Ok(Self {
      cert_der: CertificateDer::from(cert.der().to_vec()),
      key_der,
      cert_pem: cert.pem(),
      key_pem: key_pair.serialize_pem(),
    })
  }

  /// Certificate in DER form for a rustls config.
  pub fn cert_der(&self) -> CertificateDer<'static> {
    self.cert_der.clone()
  }

  /// Private key in DER form for a rustls config.
  pub fn key_der(&self) -> PrivateKeyDer<'static> {
    self.key_der.clone_key()
  }

  /// PEM-encoded certificate.
  pub fn cert_pem(&self) -> &str {
    &self.cert_pem
  }

  /// PEM-encoded private key.
  pub fn key_pem(&self) -> &str {
    &self.key_pem
  }

  /// Write the PEM pair to the given writers.
  pub fn write_pem(&self, cert_writer: &mut dyn Write, key_writer: &mut dyn Write) -> Result<()> {
    cert_writer.write_all(self.cert_pem.as_bytes())?;
    key_writer.write_all(self.key_pem.as_bytes())?;
    Ok(())
  }
}

/// Load a PEM certificate/key pair from disk into rustls types.
pub fn load_key_pair(
  cert_path: &Path,
  key_path: &Path,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
  let cert_pem = std::fs::read(cert_path)?;
  let key_pem = std::fs::read(key_path)?;

  let certs = rustls_pemfile::certs(&mut cert_pem.as_slice())
    .collect::<std::result::Result<Vec<_>, _>>()
    .map_err(|e| Error::certificate(format!("failed to parse certificate pem: {e}")))?;
  if certs.is_empty() {
    return Err(Error::certificate("no certificate found in pem"));
  }

  let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
    .map_err(|e| Error::certificate(format!("failed to parse key pem: {e}")))?
    .ok_or_else(|| Error::certificate("no private key found in pem"))?;

  Ok((certs, key))
}
