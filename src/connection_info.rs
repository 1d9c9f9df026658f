use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};

use crate::connection_name::ConnectionName;
use crate::error::ConnectorError;

/// The kind of IP address to prefer when connecting. `Primary` is the
/// public/primary IP of the instance; case-insensitive aliases are accepted
/// when parsing from configuration strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpKind {
    Primary,
    Private,
    Psc,
}

impl IpKind {
    /// The key this variant is reported under by the admin API's
    /// `connectSettings` response.
    fn api_key(self) -> &'static str {
        match self {
            IpKind::Primary => "PRIMARY",
            IpKind::Private => "PRIVATE",
            IpKind::Psc => "PSC",
        }
    }
}

impl std::str::FromStr for IpKind {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PRIMARY" | "PUBLIC" => Ok(IpKind::Primary),
            "PRIVATE" => Ok(IpKind::Private),
            "PSC" => Ok(IpKind::Psc),
            other => Err(ConnectorError::IpTypeNotFound(other.to_string())),
        }
    }
}

impl fmt::Display for IpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.api_key())
    }
}

/// An immutable bundle of everything needed to open a TLS connection to one
/// instance: its reachable IP addresses, the server's CA certificate, and an
/// ephemeral client certificate/key pair good until `expiration`.
pub struct ConnectionInfo {
    pub conn_name: ConnectionName,
    pub ip_addresses: HashMap<String, String>,
    pub server_ca_cert_pem: String,
    pub ephemeral_cert_pem: String,
    pub private_key_pem: String,
    pub expiration: DateTime<Utc>,
    pub database_version: String,
    pub enable_iam_auth: bool,
    tls_config: OnceLock<Arc<ClientConfig>>,
}

impl ConnectionInfo {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conn_name: ConnectionName,
        ip_addresses: HashMap<String, String>,
        server_ca_cert_pem: String,
        ephemeral_cert_pem: String,
        private_key_pem: String,
        expiration: DateTime<Utc>,
        database_version: String,
        enable_iam_auth: bool,
    ) -> Self {
        ConnectionInfo {
            conn_name,
            ip_addresses,
            server_ca_cert_pem,
            ephemeral_cert_pem,
            private_key_pem,
            expiration,
            database_version,
            enable_iam_auth,
            tls_config: OnceLock::new(),
        }
    }

    /// The IP address of the requested kind, or `IpTypeNotFound` if the
    /// instance does not expose one.
    pub fn get_preferred_ip(&self, ip_type: IpKind) -> Result<&str, ConnectorError> {
        self.ip_addresses
            .get(ip_type.api_key())
            .map(|s| s.as_str())
            .ok_or_else(|| ConnectorError::IpTypeNotFound(ip_type.to_string()))
    }

    /// The `rustls::ClientConfig` used to dial this instance, lazily derived
    /// from the PEM material on first call and cached for the rest of this
    /// value's lifetime. TLS 1.3 is preferred, but 1.2 is allowed unless IAM
    /// auth is enabled, in which case the OAuth2 token embedded in the
    /// certificate's subject requires TLS 1.3's exporter support and 1.2 is
    /// rejected outright.
    pub fn tls_config(&self) -> Result<Arc<ClientConfig>, ConnectorError> {
        if let Some(config) = self.tls_config.get() {
            return Ok(config.clone());
        }
        let config = Arc::new(self.build_tls_config()?);
        // Another caller may have raced us to build the same config; either
        // way `self.tls_config.get()` is now populated, so use that value.
        Ok(self.tls_config.get_or_init(|| config).clone())
    }

    fn build_tls_config(&self) -> Result<ClientConfig, ConnectorError> {
        let server_ca = parse_pem_cert(&self.server_ca_cert_pem)?;
        let cert_chain = parse_pem_cert_chain(&self.ephemeral_cert_pem)?;
        let private_key = parse_pem_private_key(&self.private_key_pem)?;

        let verifier = Arc::new(SingleCaVerifier::new(server_ca)?);

        let supports_tls13 = !cfg!(feature = "legacy-tls12-only");
        if self.enable_iam_auth && !supports_tls13 {
            return Err(ConnectorError::TlsVersionError);
        }

        let versions: &[&'static rustls::SupportedProtocolVersion] = if supports_tls13 {
            &[&rustls::version::TLS13, &rustls::version::TLS12]
        } else {
            &[&rustls::version::TLS12]
        };

        let builder = ClientConfig::builder_with_protocol_versions(versions)
            .dangerous()
            .with_custom_certificate_verifier(verifier);

        let config = builder
            .with_client_auth_cert(cert_chain, private_key)
            .map_err(|e| ConnectorError::CertParse(e.to_string()))?;
        Ok(config)
    }
}

fn parse_pem_cert(pem: &str) -> Result<CertificateDer<'static>, ConnectorError> {
    let mut chain = parse_pem_cert_chain(pem)?;
    chain
        .pop()
        .ok_or_else(|| ConnectorError::CertParse("no certificate found in PEM".to_string()))
}

fn parse_pem_cert_chain(pem: &str) -> Result<Vec<CertificateDer<'static>>, ConnectorError> {
    let mut reader = std::io::Cursor::new(pem.as_bytes());
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConnectorError::CertParse(e.to_string()))
}

fn parse_pem_private_key(
    pem: &str,
) -> Result<rustls::pki_types::PrivateKeyDer<'static>, ConnectorError> {
    let mut reader = std::io::Cursor::new(pem.as_bytes());
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ConnectorError::CertParse(e.to_string()))?
        .ok_or_else(|| ConnectorError::CertParse("no private key found in PEM".to_string()))
}

/// Validates the server's certificate chain against exactly one trusted CA
/// (the server CA certificate the admin API handed back with the rest of an
/// instance's metadata) and deliberately skips hostname verification: the
/// proxy does not publish per-instance SANs, so connections are addressed by
/// IP and authenticated purely by certificate chain of trust.
#[derive(Debug)]
struct SingleCaVerifier {
    root: CertificateDer<'static>,
    provider: Arc<CryptoProvider>,
}

impl SingleCaVerifier {
    fn new(root: CertificateDer<'static>) -> Result<Self, ConnectorError> {
        Ok(SingleCaVerifier {
            root,
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        })
    }
}

impl ServerCertVerifier for SingleCaVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let (_, leaf) = x509_parser::certificate::X509Certificate::from_der(end_entity.as_ref())
            .map_err(|e| rustls::Error::General(e.to_string()))?;
        let (_, root) = x509_parser::certificate::X509Certificate::from_der(self.root.as_ref())
            .map_err(|e| rustls::Error::General(e.to_string()))?;

        if !leaf.validity().is_valid() {
            return Err(rustls::Error::General(
                "server certificate is not currently valid".to_string(),
            ));
        }

        leaf.verify_signature(Some(root.public_key()))
            .map_err(|e| rustls::Error::General(format!("server certificate not signed by trusted CA: {e}")))?;

        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn ip_kind_accepts_case_insensitive_aliases() {
        assert_eq!(IpKind::from_str("public").unwrap(), IpKind::Primary);
        assert_eq!(IpKind::from_str("Primary").unwrap(), IpKind::Primary);
        assert_eq!(IpKind::from_str("private").unwrap(), IpKind::Private);
        assert_eq!(IpKind::from_str("psc").unwrap(), IpKind::Psc);
        assert!(IpKind::from_str("bogus").is_err());
    }

    #[test]
    fn preferred_ip_missing_kind_errors() {
        let info = ConnectionInfo::new(
            ConnectionName::parse("proj:region:inst").unwrap(),
            HashMap::new(),
            String::new(),
            String::new(),
            String::new(),
            Utc::now(),
            "POSTGRES_15".to_string(),
            false,
        );
        assert!(info.get_preferred_ip(IpKind::Private).is_err());
    }
}
