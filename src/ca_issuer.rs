//! Certificate authority persistence and issuance.
//!
//! The CA lives in a single directory:
//!
//! ```text
//! <output_dir>/ca/
//!   ca-key      PKCS#8 PEM private key, mode 600
//!   ca-cert     PEM certificate, mode 400
//!   ca-serial   decimal issuance counter, created on first signing
//! ```
//!
//! Creation is idempotent: an existing key/cert pair is loaded and returned
//! unchanged, without re-validating its fields. The serial counter is shared
//! mutable state across subject iterations; it is not protected by a lock,
//! so concurrent runs against the same CA directory can collide.

use anyhow::{anyhow, bail, Context, Result};
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{
    BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
};
use openssl::x509::{X509Req, X509};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::entity_bundle::{Role, SubjectSpec};
use crate::generate_ca::{DistinguishedName, RsaCaBuilder};
use crate::secure_files::{
    create_restricted_dir, write_with_mode, MODE_CA_CERT, MODE_SECRET, MODE_SHARED,
};
use crate::toolchain::CertificateSigner;

pub const CA_KEY_FILE: &str = "ca-key";
pub const CA_CERT_FILE: &str = "ca-cert";
pub const CA_SERIAL_FILE: &str = "ca-serial";

const X509_VERSION_3: i32 = 2;

/// A root CA loaded in memory, bound to the directory holding its key
/// material and serial counter.
pub struct CertificateAuthority {
    key: PKey<Private>,
    cert: X509,
    serial_path: PathBuf,
}

impl CertificateAuthority {
    /// Load the CA at `ca_dir`, generating it first if it does not exist.
    ///
    /// Returns the CA and whether an existing one was reused. A reused CA is
    /// returned byte-for-byte as persisted; its fields are not re-checked.
    pub fn ensure(dn: DistinguishedName, validity_days: u32, ca_dir: &Path) -> Result<(Self, bool)> {
        if ca_dir.join(CA_KEY_FILE).exists() && ca_dir.join(CA_CERT_FILE).exists() {
            return Ok((Self::load(ca_dir)?, true));
        }
        Ok((Self::generate_into(dn, validity_days, ca_dir)?, false))
    }

    /// Generate a fresh CA at `ca_dir`, discarding any existing key, cert
    /// and serial counter. Certificates issued by the previous CA no longer
    /// chain to the new one.
    pub fn regenerate(
        dn: DistinguishedName,
        validity_days: u32,
        ca_dir: &Path,
    ) -> Result<Self> {
        let serial_path = ca_dir.join(CA_SERIAL_FILE);
        if serial_path.exists() {
            fs::remove_file(&serial_path).with_context(|| {
                format!("Failed to reset serial counter {}", serial_path.display())
            })?;
        }
        Self::generate_into(dn, validity_days, ca_dir)
    }

    fn generate_into(dn: DistinguishedName, validity_days: u32, ca_dir: &Path) -> Result<Self> {
        let (key, cert) = RsaCaBuilder::new(dn)
            .validity_days(validity_days)
            .build()
            .context("Failed to generate root CA")?;

        create_restricted_dir(ca_dir)?;
        let key_pem = key
            .private_key_to_pem_pkcs8()
            .map_err(|e| anyhow!("Failed to encode CA private key: {}", e))?;
        write_with_mode(&ca_dir.join(CA_KEY_FILE), &key_pem, MODE_SECRET)?;
        let cert_pem = cert
            .to_pem()
            .map_err(|e| anyhow!("Failed to encode CA certificate: {}", e))?;
        write_with_mode(&ca_dir.join(CA_CERT_FILE), &cert_pem, MODE_CA_CERT)?;

        Ok(Self {
            key,
            cert,
            serial_path: ca_dir.join(CA_SERIAL_FILE),
        })
    }

    fn load(ca_dir: &Path) -> Result<Self> {
        let key_path = ca_dir.join(CA_KEY_FILE);
        let key_pem = fs::read(&key_path)
            .with_context(|| format!("Failed to read CA private key {}", key_path.display()))?;
        let key = PKey::private_key_from_pem(&key_pem)
            .map_err(|e| anyhow!("Failed to parse CA private key: {}", e))?;

        let cert_path = ca_dir.join(CA_CERT_FILE);
        let cert_pem = fs::read(&cert_path)
            .with_context(|| format!("Failed to read CA certificate {}", cert_path.display()))?;
        let cert = X509::from_pem(&cert_pem)
            .map_err(|e| anyhow!("Failed to parse CA certificate: {}", e))?;

        Ok(Self {
            key,
            cert,
            serial_path: ca_dir.join(CA_SERIAL_FILE),
        })
    }

    pub fn certificate(&self) -> &X509 {
        &self.cert
    }

    /// Next serial number: reads the counter file, increments it, writes it
    /// back. The file is created at the first signing. No locking; see the
    /// module docs.
    fn next_serial(&self) -> Result<u64> {
        let current = match fs::read_to_string(&self.serial_path) {
            Ok(text) => text.trim().parse::<u64>().with_context(|| {
                format!("Corrupt serial counter {}", self.serial_path.display())
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read serial counter {}", self.serial_path.display())
                })
            }
        };

        let next = current + 1;
        write_with_mode(&self.serial_path, format!("{}\n", next).as_bytes(), MODE_SHARED)?;
        Ok(next)
    }

    /// Sign a certificate request for `subject`.
    ///
    /// The issued certificate carries:
    /// - issuer = this CA's subject name
    /// - serial from the monotonic counter file
    /// - `basicConstraints=CA:FALSE`, critical
    /// - `keyUsage=digitalSignature,keyEncipherment`, critical
    /// - `extendedKeyUsage`: serverAuth+clientAuth for servers, clientAuth
    ///   only for the admin role
    /// - subjectAltName equal to the subject's declared DNS/IP set (omitted
    ///   when the subject declares none)
    /// - SHA-256 signature, validity `[now, now + subject.validity_days]`
    ///
    /// # Errors
    /// Fails if the request's self-signature does not verify, the serial
    /// counter cannot be advanced, or any X.509 construction step fails.
    pub fn sign_request(&self, request: &X509Req, subject: &SubjectSpec) -> Result<X509> {
        let request_key = request
            .public_key()
            .map_err(|e| anyhow!("Failed to extract public key from request: {}", e))?;
        if !request
            .verify(&request_key)
            .map_err(|e| anyhow!("Failed to verify request signature: {}", e))?
        {
            bail!(
                "Request signature for '{}' does not verify",
                subject.common_name
            );
        }

        let mut builder =
            X509::builder().map_err(|e| anyhow!("Failed to create X509 builder: {}", e))?;
        builder
            .set_version(X509_VERSION_3)
            .map_err(|e| anyhow!("Failed to set version: {}", e))?;

        let serial = BigNum::from_dec_str(&self.next_serial()?.to_string())?;
        let serial_asn1 = serial.to_asn1_integer()?;
        builder.set_serial_number(&serial_asn1)?;

        builder
            .set_subject_name(request.subject_name())
            .map_err(|e| anyhow!("Failed to set subject: {}", e))?;
        builder
            .set_issuer_name(self.cert.subject_name())
            .map_err(|e| anyhow!("Failed to set issuer from CA: {}", e))?;

        let not_before = openssl::asn1::Asn1Time::days_from_now(0)
            .map_err(|e| anyhow!("Failed to create not_before: {}", e))?;
        builder
            .set_not_before(&not_before)
            .map_err(|e| anyhow!("Failed to set not_before: {}", e))?;
        let not_after = openssl::asn1::Asn1Time::days_from_now(subject.validity_days)
            .map_err(|e| anyhow!("Failed to create not_after: {}", e))?;
        builder
            .set_not_after(&not_after)
            .map_err(|e| anyhow!("Failed to set not_after: {}", e))?;

        builder
            .set_pubkey(&request_key)
            .map_err(|e| anyhow!("Failed to set public key: {}", e))?;

        // End-entity certificate: CA=false
        let mut bc = BasicConstraints::new();
        bc.critical();
        builder
            .append_extension(
                bc.build()
                    .map_err(|e| anyhow!("Failed to build BasicConstraints: {}", e))?,
            )
            .map_err(|e| anyhow!("Failed to add BasicConstraints: {}", e))?;

        let mut ku = KeyUsage::new();
        ku.critical();
        ku.digital_signature();
        ku.key_encipherment();
        builder
            .append_extension(
                ku.build()
                    .map_err(|e| anyhow!("Failed to build KeyUsage: {}", e))?,
            )
            .map_err(|e| anyhow!("Failed to add KeyUsage: {}", e))?;

        let mut eku = ExtendedKeyUsage::new();
        match subject.role {
            Role::Server => {
                eku.server_auth();
                eku.client_auth();
            }
            Role::Admin => {
                eku.client_auth();
            }
        }
        builder
            .append_extension(
                eku.build()
                    .map_err(|e| anyhow!("Failed to build ExtendedKeyUsage: {}", e))?,
            )
            .map_err(|e| anyhow!("Failed to add ExtendedKeyUsage: {}", e))?;

        if subject.has_identities() {
            let mut san = SubjectAlternativeName::new();
            for dns in &subject.dns_names {
                san.dns(dns);
            }
            for ip in &subject.ip_addresses {
                san.ip(ip);
            }
            let extension = san
                .build(&builder.x509v3_context(Some(&self.cert), None))
                .map_err(|e| anyhow!("Failed to build SubjectAlternativeName: {}", e))?;
            builder
                .append_extension(extension)
                .map_err(|e| anyhow!("Failed to add SubjectAlternativeName: {}", e))?;
        }

        builder
            .sign(&self.key, MessageDigest::sha256())
            .map_err(|e| anyhow!("Failed to sign certificate: {}", e))?;

        Ok(builder.build())
    }
}

impl CertificateSigner for CertificateAuthority {
    fn sign(&self, request: &X509Req, subject: &SubjectSpec) -> Result<X509> {
        self.sign_request(request, subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate_csr::CsrBuilder;
    use openssl::rsa::Rsa;
    use tempfile::tempdir;

    fn test_dn(common_name: &str) -> DistinguishedName {
        DistinguishedName {
            common_name: common_name.to_string(),
            organization: "Test Org".to_string(),
            organizational_unit: "Testing".to_string(),
            locality: "Testville".to_string(),
            state: "TS".to_string(),
            country: "US".to_string(),
        }
    }

    fn signed_for(ca: &CertificateAuthority, subject: &SubjectSpec) -> X509 {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let mut csr = CsrBuilder::new(test_dn(&subject.common_name));
        for dns in &subject.dns_names {
            csr = csr.dns_name(dns);
        }
        for ip in &subject.ip_addresses {
            csr = csr.ip_address(ip);
        }
        ca.sign_request(&csr.build(&key).unwrap(), subject).unwrap()
    }

    #[test]
    fn test_ensure_creates_key_cert_and_no_serial() {
        let dir = tempdir().unwrap();
        let ca_dir = dir.path().join("ca");

        let (_, reused) = CertificateAuthority::ensure(test_dn("Test CA"), 365, &ca_dir).unwrap();

        assert!(!reused);
        assert!(ca_dir.join(CA_KEY_FILE).exists());
        assert!(ca_dir.join(CA_CERT_FILE).exists());
        // Counter only appears once something is signed
        assert!(!ca_dir.join(CA_SERIAL_FILE).exists());
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let dir = tempdir().unwrap();
        let ca_dir = dir.path().join("ca");

        let (_, first_reused) =
            CertificateAuthority::ensure(test_dn("Test CA"), 365, &ca_dir).unwrap();
        let key_bytes = fs::read(ca_dir.join(CA_KEY_FILE)).unwrap();
        let cert_bytes = fs::read(ca_dir.join(CA_CERT_FILE)).unwrap();

        let (_, second_reused) =
            CertificateAuthority::ensure(test_dn("Another Name"), 30, &ca_dir).unwrap();

        assert!(!first_reused);
        assert!(second_reused);
        assert_eq!(fs::read(ca_dir.join(CA_KEY_FILE)).unwrap(), key_bytes);
        assert_eq!(fs::read(ca_dir.join(CA_CERT_FILE)).unwrap(), cert_bytes);
    }

    #[test]
    fn test_regenerate_replaces_material_and_resets_serial() {
        let dir = tempdir().unwrap();
        let ca_dir = dir.path().join("ca");

        let (ca, _) = CertificateAuthority::ensure(test_dn("Test CA"), 365, &ca_dir).unwrap();
        signed_for(&ca, &SubjectSpec::server("node-a", "10.0.0.5", 30));
        let old_cert = fs::read(ca_dir.join(CA_CERT_FILE)).unwrap();
        assert!(ca_dir.join(CA_SERIAL_FILE).exists());

        let fresh = CertificateAuthority::regenerate(test_dn("Test CA"), 365, &ca_dir).unwrap();

        assert_ne!(fs::read(ca_dir.join(CA_CERT_FILE)).unwrap(), old_cert);
        assert!(!ca_dir.join(CA_SERIAL_FILE).exists());
        // First signing under the fresh CA starts the counter over
        signed_for(&fresh, &SubjectSpec::server("node-a", "10.0.0.5", 30));
        let counter = fs::read_to_string(ca_dir.join(CA_SERIAL_FILE)).unwrap();
        assert_eq!(counter.trim(), "1");
    }

    #[test]
    fn test_serials_increase_monotonically() {
        let dir = tempdir().unwrap();
        let ca_dir = dir.path().join("ca");
        let (ca, _) = CertificateAuthority::ensure(test_dn("Test CA"), 365, &ca_dir).unwrap();

        let subject = SubjectSpec::server("node-a", "10.0.0.5", 30);
        let serials: Vec<u64> = (0..3)
            .map(|_| {
                let cert = signed_for(&ca, &subject);
                let serial = cert.serial_number().to_bn().unwrap().to_dec_str().unwrap();
                serial.parse().unwrap()
            })
            .collect();

        assert_eq!(serials, vec![1, 2, 3]);
        let counter = fs::read_to_string(ca_dir.join(CA_SERIAL_FILE)).unwrap();
        assert_eq!(counter.trim(), "3");
    }

    #[test]
    fn test_issued_cert_chains_to_ca() {
        let dir = tempdir().unwrap();
        let (ca, _) =
            CertificateAuthority::ensure(test_dn("Test CA"), 365, &dir.path().join("ca")).unwrap();

        let cert = signed_for(&ca, &SubjectSpec::server("node-a", "10.0.0.5", 30));

        assert_eq!(
            cert.issuer_name().to_der().unwrap(),
            ca.certificate().subject_name().to_der().unwrap()
        );
        let ca_key = ca.certificate().public_key().unwrap();
        assert!(cert.verify(&ca_key).unwrap());
    }

    #[test]
    fn test_server_cert_extensions() {
        let dir = tempdir().unwrap();
        let (ca, _) =
            CertificateAuthority::ensure(test_dn("Test CA"), 365, &dir.path().join("ca")).unwrap();

        let cert = signed_for(&ca, &SubjectSpec::server("node-a", "10.0.0.5", 1095));
        let der = cert.to_der().unwrap();
        let (_, parsed) = x509_parser::parse_x509_certificate(&der).unwrap();

        let bc = parsed.basic_constraints().unwrap().unwrap();
        assert!(!bc.value.ca);

        let eku = parsed.extended_key_usage().unwrap().unwrap();
        assert!(eku.value.server_auth);
        assert!(eku.value.client_auth);

        let san = parsed.subject_alternative_name().unwrap().unwrap();
        let mut dns = Vec::new();
        let mut ips = Vec::new();
        for name in &san.value.general_names {
            match name {
                x509_parser::extensions::GeneralName::DNSName(n) => dns.push(n.to_string()),
                x509_parser::extensions::GeneralName::IPAddress(o) => ips.push(o.to_vec()),
                other => panic!("unexpected SAN entry: {:?}", other),
            }
        }
        assert_eq!(dns, vec!["node-a".to_string()]);
        assert_eq!(ips, vec![vec![10, 0, 0, 5]]);

        let validity = parsed.validity();
        let window = validity.not_after.timestamp() - validity.not_before.timestamp();
        assert_eq!(window, 1095 * 86_400);
    }

    #[test]
    fn test_admin_cert_is_client_auth_only_without_san() {
        let dir = tempdir().unwrap();
        let (ca, _) =
            CertificateAuthority::ensure(test_dn("Test CA"), 365, &dir.path().join("ca")).unwrap();

        let cert = signed_for(&ca, &SubjectSpec::admin("admin", 730));
        let der = cert.to_der().unwrap();
        let (_, parsed) = x509_parser::parse_x509_certificate(&der).unwrap();

        let eku = parsed.extended_key_usage().unwrap().unwrap();
        assert!(eku.value.client_auth);
        assert!(!eku.value.server_auth);
        assert!(parsed.subject_alternative_name().unwrap().is_none());
    }

    #[test]
    fn test_tampered_request_is_rejected() {
        let dir = tempdir().unwrap();
        let (ca, _) =
            CertificateAuthority::ensure(test_dn("Test CA"), 365, &dir.path().join("ca")).unwrap();

        let signing_key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let request = CsrBuilder::new(test_dn("node-a"))
            .dns_name("node-a")
            .build(&signing_key)
            .unwrap();
        let mut der = request.to_der().unwrap();
        let len = der.len();
        der[len - 1] ^= 0xff; // corrupt the signature
        let tampered = X509Req::from_der(&der).unwrap();

        let result =
            ca.sign_request(&tampered, &SubjectSpec::server("node-a", "10.0.0.5", 30));
        assert!(result.is_err());
    }
}
