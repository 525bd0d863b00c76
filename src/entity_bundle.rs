//! Per-subject certificate bundle issuance.
//!
//! For every configured subject this module generates a fresh key pair,
//! builds a signing request carrying the subject's declared identities, has
//! the CA sign it and packages the result:
//!
//! ```text
//! <output_dir>/<name>/
//!   <name>.key          PKCS#8 PEM private key, mode 600
//!   <name>.csr          PEM signing request, mode 640
//!   <name>.crt          PEM signed certificate, mode 640
//!   <name>.keystore     PKCS#12: key + cert + CA chain, alias = CN
//!   <name>.truststore   PKCS#12: CA cert only, alias "nifi-ca" (servers)
//! <output_dir>/admin/
//!   admin.key / admin.csr / admin.crt / admin.p12
//! ```
//!
//! Unlike the CA, entity bundles are never reused: every run regenerates the
//! key pair and overwrites the previous artifacts.

use anyhow::{bail, Context, Result};
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use secrecy::Secret;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use crate::generate_ca::DistinguishedName;
use crate::generate_csr::CsrBuilder;
use crate::secure_files::{create_restricted_dir, write_with_mode, MODE_SECRET, MODE_SHARED};
use crate::toolchain::{CertificateSigner, ContainerExporter, KeyPairGenerator};

/// Minimum strength for entity keys; the CA key is stronger.
pub const ENTITY_KEY_BITS: u32 = 2048;

/// Alias the CA certificate is stored under in every server truststore.
pub const TRUSTSTORE_CA_ALIAS: &str = "nifi-ca";

/// Directory and file stem used for the administrator bundle.
pub const ADMIN_FILE_STEM: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Cluster host: serverAuth + clientAuth, keystore and truststore.
    Server,
    /// Administrator browser identity: clientAuth only, `.p12` bundle.
    Admin,
}

/// One subject to provision, as declared by configuration. Immutable.
#[derive(Debug, Clone)]
pub struct SubjectSpec {
    pub common_name: String,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<String>,
    pub validity_days: u32,
    pub role: Role,
}

impl SubjectSpec {
    /// A server host identified by its DNS name and IP address.
    pub fn server(name: &str, ip: &str, validity_days: u32) -> Self {
        Self {
            common_name: name.to_string(),
            dns_names: vec![name.to_string()],
            ip_addresses: vec![ip.to_string()],
            validity_days,
            role: Role::Server,
        }
    }

    /// The administrator client identity. Declares no network identities,
    /// so its certificate carries no subjectAltName extension.
    pub fn admin(common_name: &str, validity_days: u32) -> Self {
        Self {
            common_name: common_name.to_string(),
            dns_names: Vec::new(),
            ip_addresses: Vec::new(),
            validity_days,
            role: Role::Admin,
        }
    }

    pub fn has_identities(&self) -> bool {
        !self.dns_names.is_empty() || !self.ip_addresses.is_empty()
    }

    /// File stem for this subject's artifacts (`admin.p12` keeps its fixed
    /// name regardless of the configured admin common name).
    pub fn file_stem(&self) -> &str {
        match self.role {
            Role::Server => &self.common_name,
            Role::Admin => ADMIN_FILE_STEM,
        }
    }

    /// Reject malformed subject configuration before any key material is
    /// generated.
    pub fn validate(&self) -> Result<()> {
        if self.common_name.is_empty() {
            bail!("Subject common name must not be empty");
        }
        if self.common_name.contains('/') || self.common_name.contains("..") {
            bail!(
                "Subject name '{}' is not usable as a directory name",
                self.common_name
            );
        }
        if self.role == Role::Server && self.common_name == "ca" {
            bail!("Subject name 'ca' is reserved for the certificate authority directory");
        }
        if self.validity_days == 0 {
            bail!("Validity for '{}' must be at least one day", self.common_name);
        }
        for ip in &self.ip_addresses {
            ip.parse::<IpAddr>().map_err(|_| {
                anyhow::anyhow!("Invalid IP address '{}' for subject '{}'", ip, self.common_name)
            })?;
        }
        Ok(())
    }
}

/// Everything issued for one subject in a single run.
#[derive(Debug)]
pub struct CertificateBundle {
    pub private_key: PKey<Private>,
    pub certificate: X509,
    pub keystore_path: PathBuf,
    pub truststore_path: Option<PathBuf>,
}

/// Inputs for one bundle issuance.
pub struct BundleRequest<'a> {
    pub subject: &'a SubjectSpec,
    /// Subject DN (entity common name, organization fields shared with the CA).
    pub dn: DistinguishedName,
    /// Protects the keystore (`.keystore` for servers, `.p12` for the admin).
    pub keystore_password: &'a Secret<String>,
    /// Protects server truststores; unused for the admin bundle.
    pub truststore_password: &'a Secret<String>,
    /// Directory receiving this subject's artifacts.
    pub output_dir: &'a Path,
}

/// Issue a complete certificate bundle for one subject.
///
/// Steps, each a hard dependency on the previous one succeeding:
/// 1. fresh key pair ([`ENTITY_KEY_BITS`]) from `keygen`
/// 2. signing request with the subject's declared identities
/// 3. CA signature via `signer` (advances the CA serial counter)
/// 4. keystore export with key, certificate and CA chain
/// 5. servers only: truststore export with the CA certificate; an existing
///    truststore is overwritten with a warning
///
/// # Errors
/// Fails on malformed subject configuration, any toolchain failure, or any
/// filesystem write failure. The caller decides whether a failure aborts the
/// whole run or only this subject.
pub fn issue_bundle(
    request: &BundleRequest,
    ca_cert: &X509,
    keygen: &impl KeyPairGenerator,
    signer: &impl CertificateSigner,
    exporter: &impl ContainerExporter,
) -> Result<CertificateBundle> {
    let subject = request.subject;
    subject.validate()?;

    // Always a fresh key; bundles are never reused across runs
    let private_key = keygen
        .generate_keypair(ENTITY_KEY_BITS)
        .with_context(|| format!("Failed to generate key pair for '{}'", subject.common_name))?;

    let mut csr_builder = CsrBuilder::new(request.dn.clone());
    for dns in &subject.dns_names {
        csr_builder = csr_builder.dns_name(dns);
    }
    for ip in &subject.ip_addresses {
        csr_builder = csr_builder.ip_address(ip);
    }
    let csr = csr_builder
        .build(&private_key)
        .with_context(|| format!("Failed to build request for '{}'", subject.common_name))?;

    let certificate = signer
        .sign(&csr, subject)
        .with_context(|| format!("Failed to sign certificate for '{}'", subject.common_name))?;

    create_restricted_dir(request.output_dir)?;
    let stem = subject.file_stem();

    let key_pem = private_key
        .private_key_to_pem_pkcs8()
        .context("Failed to encode private key")?;
    write_with_mode(
        &request.output_dir.join(format!("{}.key", stem)),
        &key_pem,
        MODE_SECRET,
    )?;

    let csr_pem = csr.to_pem().context("Failed to encode request")?;
    write_with_mode(
        &request.output_dir.join(format!("{}.csr", stem)),
        &csr_pem,
        MODE_SHARED,
    )?;

    let cert_pem = certificate.to_pem().context("Failed to encode certificate")?;
    write_with_mode(
        &request.output_dir.join(format!("{}.crt", stem)),
        &cert_pem,
        MODE_SHARED,
    )?;

    let keystore_name = match subject.role {
        Role::Server => format!("{}.keystore", stem),
        Role::Admin => format!("{}.p12", stem),
    };
    let keystore_path = request.output_dir.join(keystore_name);
    let keystore = exporter
        .export_keystore(
            &subject.common_name,
            &private_key,
            &certificate,
            ca_cert,
            request.keystore_password,
        )
        .with_context(|| format!("Failed to export keystore for '{}'", subject.common_name))?;
    write_with_mode(&keystore_path, &keystore, MODE_SHARED)?;

    let truststore_path = match subject.role {
        Role::Server => {
            let path = request.output_dir.join(format!("{}.truststore", stem));
            if path.exists() {
                println!("⚠ Replacing existing truststore {}", path.display());
            }
            let truststore = exporter
                .export_truststore(TRUSTSTORE_CA_ALIAS, ca_cert, request.truststore_password)
                .with_context(|| {
                    format!("Failed to export truststore for '{}'", subject.common_name)
                })?;
            write_with_mode(&path, &truststore, MODE_SHARED)?;
            Some(path)
        }
        Role::Admin => None,
    };

    Ok(CertificateBundle {
        private_key,
        certificate,
        keystore_path,
        truststore_path,
    })
}
