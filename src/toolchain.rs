//! Collaborator interfaces over the cryptographic toolchain.
//!
//! The bundle generator does not call cryptographic primitives directly; it
//! works through three capability traits so each collaborator can be
//! substituted in tests without exercising real key generation or signing.

use anyhow::{anyhow, Result};
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::{X509Req, X509};
use secrecy::{ExposeSecret, Secret};

use crate::entity_bundle::SubjectSpec;

/// Generates asymmetric key pairs.
pub trait KeyPairGenerator {
    fn generate_keypair(&self, bits: u32) -> Result<PKey<Private>>;
}

/// Issues certificates from signing requests. Implemented by
/// [`CertificateAuthority`](crate::ca_issuer::CertificateAuthority).
pub trait CertificateSigner {
    fn sign(&self, request: &X509Req, subject: &SubjectSpec) -> Result<X509>;
}

/// Exports password-protected PKCS#12 containers.
pub trait ContainerExporter {
    /// Keystore: the entity's private key, its certificate and the CA
    /// certificate as the chain, under `alias`.
    fn export_keystore(
        &self,
        alias: &str,
        key: &PKey<Private>,
        cert: &X509,
        ca_cert: &X509,
        password: &Secret<String>,
    ) -> Result<Vec<u8>>;

    /// Truststore: solely the CA certificate under `alias`.
    fn export_truststore(
        &self,
        alias: &str,
        ca_cert: &X509,
        password: &Secret<String>,
    ) -> Result<Vec<u8>>;
}

/// The production toolchain, backed by the openssl crate.
pub struct OpensslToolchain;

impl KeyPairGenerator for OpensslToolchain {
    fn generate_keypair(&self, bits: u32) -> Result<PKey<Private>> {
        let rsa = openssl::rsa::Rsa::generate(bits)
            .map_err(|e| anyhow!("Failed to generate RSA keypair: {}", e))?;
        PKey::from_rsa(rsa).map_err(|e| anyhow!("Failed to create private key: {}", e))
    }
}

impl ContainerExporter for OpensslToolchain {
    fn export_keystore(
        &self,
        alias: &str,
        key: &PKey<Private>,
        cert: &X509,
        ca_cert: &X509,
        password: &Secret<String>,
    ) -> Result<Vec<u8>> {
        let mut chain = Stack::new()?;
        chain
            .push(ca_cert.clone())
            .map_err(|e| anyhow!("Failed to build CA chain: {}", e))?;

        let mut builder = Pkcs12::builder();
        builder.name(alias);
        builder.pkey(key);
        builder.cert(cert);
        builder.ca(chain);
        let container = builder
            .build2(password.expose_secret())
            .map_err(|e| anyhow!("Failed to build keystore: {}", e))?;

        container
            .to_der()
            .map_err(|e| anyhow!("Failed to encode keystore: {}", e))
    }

    fn export_truststore(
        &self,
        alias: &str,
        ca_cert: &X509,
        password: &Secret<String>,
    ) -> Result<Vec<u8>> {
        let mut builder = Pkcs12::builder();
        builder.name(alias);
        builder.cert(ca_cert);
        let container = builder
            .build2(password.expose_secret())
            .map_err(|e| anyhow!("Failed to build truststore: {}", e))?;

        container
            .to_der()
            .map_err(|e| anyhow!("Failed to encode truststore: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate_ca::{DistinguishedName, RsaCaBuilder};

    fn test_ca() -> (PKey<Private>, X509) {
        RsaCaBuilder::new(DistinguishedName {
            common_name: "Test CA".to_string(),
            organization: "Test Org".to_string(),
            organizational_unit: "Testing".to_string(),
            locality: "Testville".to_string(),
            state: "TS".to_string(),
            country: "US".to_string(),
        })
        .validity_days(30)
        .build()
        .unwrap()
    }

    #[test]
    fn test_generate_keypair_bit_length() {
        let key = OpensslToolchain.generate_keypair(2048).unwrap();
        assert_eq!(key.bits(), 2048);
    }

    #[test]
    fn test_keystore_roundtrip() {
        let (ca_key, ca_cert) = test_ca();
        let password = Secret::new("ks-secret".to_string());

        let der = OpensslToolchain
            .export_keystore("test-alias", &ca_key, &ca_cert, &ca_cert, &password)
            .unwrap();

        let parsed = Pkcs12::from_der(&der)
            .unwrap()
            .parse2("ks-secret")
            .unwrap();
        assert!(parsed.pkey.is_some());
        assert_eq!(
            parsed.cert.unwrap().to_der().unwrap(),
            ca_cert.to_der().unwrap()
        );
        let chain = parsed.ca.expect("keystore should carry a CA chain");
        assert!(chain
            .iter()
            .any(|c| c.to_der().unwrap() == ca_cert.to_der().unwrap()));
    }

    #[test]
    fn test_keystore_rejects_wrong_password() {
        let (ca_key, ca_cert) = test_ca();
        let password = Secret::new("ks-secret".to_string());

        let der = OpensslToolchain
            .export_keystore("test-alias", &ca_key, &ca_cert, &ca_cert, &password)
            .unwrap();

        assert!(Pkcs12::from_der(&der).unwrap().parse2("wrong").is_err());
    }

    #[test]
    fn test_truststore_holds_only_the_ca_cert() {
        let (_, ca_cert) = test_ca();
        let password = Secret::new("ts-secret".to_string());

        let der = OpensslToolchain
            .export_truststore("nifi-ca", &ca_cert, &password)
            .unwrap();

        let parsed = Pkcs12::from_der(&der)
            .unwrap()
            .parse2("ts-secret")
            .unwrap();
        assert!(parsed.pkey.is_none());

        let mut certs: Vec<Vec<u8>> = Vec::new();
        if let Some(cert) = parsed.cert {
            certs.push(cert.to_der().unwrap());
        }
        if let Some(chain) = parsed.ca {
            for cert in chain.iter() {
                certs.push(cert.to_der().unwrap());
            }
        }
        assert_eq!(certs, vec![ca_cert.to_der().unwrap()]);
    }
}
