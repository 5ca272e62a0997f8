//! Mutual TLS with a single shared self-signed certificate.
//!
//! Both ends of every connection in this workspace present the same cert/key pair and
//! trust it as the sole CA. Hostname verification is deliberately disabled by pinning
//! the expected domain name to the certificate's CN (`"common"`) rather than to the
//! peer's actual address, so the one key pair works unmodified across hosts.

use std::path::Path;

use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};

use crate::error::{MackenzieError, Result};

/// The common name baked into every certificate `makecert` produces.
pub const COMMON_NAME: &str = "common";

pub struct TlsMaterial {
    cert_pem: Vec<u8>,
    key_pem: Vec<u8>,
}

impl TlsMaterial {
    pub fn load(cert_file: &Path, key_file: &Path) -> Result<Self> {
        let cert_pem = std::fs::read(cert_file)
            .map_err(|e| MackenzieError::Tls(format!("reading {cert_file:?}: {e}")))?;
        let key_pem = std::fs::read(key_file)
            .map_err(|e| MackenzieError::Tls(format!("reading {key_file:?}: {e}")))?;
        Ok(Self { cert_pem, key_pem })
    }

    fn identity(&self) -> Identity {
        Identity::from_pem(&self.cert_pem, &self.key_pem)
    }

    fn ca(&self) -> Certificate {
        Certificate::from_pem(&self.cert_pem)
    }

    /// Server config: present our identity, trust only the same cert as client CA.
    pub fn server_config(&self) -> ServerTlsConfig {
        ServerTlsConfig::new()
            .identity(self.identity())
            .client_ca_root(self.ca())
    }

    /// Client config: present our identity, trust only the same cert as server CA, and
    /// pin the expected domain name to the CN so hostname mismatches never fail the
    /// handshake.
    pub fn client_config(&self) -> ClientTlsConfig {
        ClientTlsConfig::new()
            .identity(self.identity())
            .ca_certificate(self.ca())
            .domain_name(COMMON_NAME)
    }
}

/// Generate a fresh self-signed RSA-4096/SHA-256 cert pair valid for ten years, with
/// `CN=common`, and write `{name}.crt` / `{name}.key` PEM files next to each other.
pub fn make_cert(out_dir: &Path, name: &str) -> Result<()> {
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_RSA_SHA256};

    let key_pair = KeyPair::generate_for(&PKCS_RSA_SHA256)
        .map_err(|e| MackenzieError::Tls(format!("generating key pair: {e}")))?;

    let mut params = CertificateParams::new(Vec::<String>::new())
        .map_err(|e| MackenzieError::Tls(format!("building cert params: {e}")))?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, COMMON_NAME);
    params.distinguished_name = dn;
    params.not_before = rcgen::date_time_ymd(2024, 1, 1);
    params.not_after = rcgen::date_time_ymd(2034, 1, 1);

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| MackenzieError::Tls(format!("self-signing cert: {e}")))?;

    std::fs::create_dir_all(out_dir)?;
    std::fs::write(out_dir.join(format!("{name}.crt")), cert.pem())?;
    std::fs::write(out_dir.join(format!("{name}.key")), key_pair.serialize_pem())?;
    Ok(())
}
