use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::pkcs8::LineEnding;
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::error::ConnectorError;

const KEY_BITS: usize = 2048;

/// A process-wide RSA keypair used to request ephemeral certificates from
/// the admin API. One `KeyMaterial` is generated per `Connector` and shared
/// by every instance cache it owns.
pub struct KeyMaterial {
    private_key: RsaPrivateKey,
    public_key_pem: String,
}

impl KeyMaterial {
    /// Generates a fresh 2048-bit RSA keypair. This is CPU-bound, so callers
    /// on an async runtime should run it via `spawn_blocking`.
    pub fn generate() -> Result<Self, ConnectorError> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, KEY_BITS)
            .map_err(|e| ConnectorError::KeyGeneration(e.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);
        let public_key_pem = public_key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| ConnectorError::KeyGeneration(e.to_string()))?;
        Ok(KeyMaterial {
            private_key,
            public_key_pem,
        })
    }

    /// PEM-encoded PKCS#1 public key, sent to the admin API when requesting
    /// an ephemeral certificate.
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// PEM-encoded PKCS#1 private key, paired locally with the ephemeral
    /// certificate returned by the admin API to build the client TLS identity.
    pub fn private_key_pem(&self) -> Result<String, ConnectorError> {
        self.private_key
            .to_pkcs1_pem(LineEnding::LF)
            .map(|s| s.to_string())
            .map_err(|e| ConnectorError::KeyGeneration(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_matching_keypair_pem() {
        let keys = KeyMaterial::generate().unwrap();
        assert!(keys.public_key_pem().contains("BEGIN RSA PUBLIC KEY"));
        assert!(keys.private_key_pem().unwrap().contains("BEGIN RSA PRIVATE KEY"));
    }
}
