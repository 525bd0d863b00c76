//! Self-signed root CA certificate generation.
//!
//! The CA produced here is the trust anchor for a provisioned cluster and
//! signs every server and admin certificate directly:
//!
//! ```text
//! Root CA (self-signed, pathlen=0)
//!   ├── Server certificate (keystore + truststore per host)
//!   └── Admin client certificate (browser bundle)
//! ```
//!
//! # Certificate Properties
//! - **Self-signed**: issuer and subject are the same
//! - **Key Usage**: keyCertSign, cRLSign, digitalSignature
//! - **Basic Constraints**: CA=true, pathlen=0 (signs end entities only)
//! - **Key Size**: RSA 4096-bit
//! - **Signature Algorithm**: SHA-256 with RSA
//! - **Version**: X.509v3 with extensions

use anyhow::{anyhow, Result};
use openssl::asn1::Asn1Integer;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509, X509Name};

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
const CA_RSA_KEY_SIZE: u32 = 4096;
const CA_PATH_LENGTH: u32 = 0;

/// Subject fields shared by the CA and every issued entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistinguishedName {
    pub common_name: String,
    pub organization: String,
    pub organizational_unit: String,
    pub locality: String,
    pub state: String,
    pub country: String,
}

/// Build an [`X509Name`] from a [`DistinguishedName`].
pub(crate) fn build_x509_name(dn: &DistinguishedName) -> Result<X509Name> {
    let mut name_builder = X509Name::builder()
        .map_err(|e| anyhow!("Failed to create name builder: {}", e))?;

    name_builder
        .append_entry_by_nid(openssl::nid::Nid::COMMONNAME, &dn.common_name)
        .map_err(|e| anyhow!("Failed to set CN: {}", e))?;
    name_builder
        .append_entry_by_nid(openssl::nid::Nid::ORGANIZATIONNAME, &dn.organization)
        .map_err(|e| anyhow!("Failed to set organization: {}", e))?;
    name_builder
        .append_entry_by_nid(
            openssl::nid::Nid::ORGANIZATIONALUNITNAME,
            &dn.organizational_unit,
        )
        .map_err(|e| anyhow!("Failed to set organizational unit: {}", e))?;
    name_builder
        .append_entry_by_nid(openssl::nid::Nid::LOCALITYNAME, &dn.locality)
        .map_err(|e| anyhow!("Failed to set locality: {}", e))?;
    name_builder
        .append_entry_by_nid(openssl::nid::Nid::STATEORPROVINCENAME, &dn.state)
        .map_err(|e| anyhow!("Failed to set state/province: {}", e))?;
    name_builder
        .append_entry_by_nid(openssl::nid::Nid::COUNTRYNAME, &dn.country)
        .map_err(|e| anyhow!("Failed to set country: {}", e))?;

    Ok(name_builder.build())
}

/// Random 128-bit serial number for the self-signed CA certificate. Issued
/// leaf certificates take theirs from the CA serial counter instead.
pub(crate) fn random_serial() -> Result<Asn1Integer> {
    let mut serial = BigNum::new()?;
    serial.rand(128, MsbOption::MAYBE_ZERO, false)?;
    Ok(serial.to_asn1_integer()?)
}

/// Builder for an RSA key pair and self-signed root CA certificate.
///
/// # Examples
/// ```rust,no_run
/// use pki_provision::generate_ca::{DistinguishedName, RsaCaBuilder};
/// # use anyhow::Result;
/// # fn example(dn: DistinguishedName) -> Result<()> {
/// let (private_key, certificate) = RsaCaBuilder::new(dn)
///     .validity_days(3650) // 10 years
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RsaCaBuilder {
    dn: DistinguishedName,
    validity_days: u32,
}

impl RsaCaBuilder {
    pub fn new(dn: DistinguishedName) -> Self {
        Self {
            dn,
            validity_days: 3650,
        }
    }

    /// Set validity period in days
    pub fn validity_days(mut self, days: u32) -> Self {
        self.validity_days = days;
        self
    }

    /// Build the RSA key pair and self-signed root CA certificate.
    ///
    /// # Returns
    /// * `Ok((PKey<Private>, X509))` - Tuple of (private key, self-signed certificate)
    /// * `Err(anyhow::Error)` - If key generation or certificate signing fails
    pub fn build(self) -> Result<(PKey<Private>, X509)> {
        let rsa = openssl::rsa::Rsa::generate(CA_RSA_KEY_SIZE)
            .map_err(|e| anyhow!("Failed to generate RSA keypair: {}", e))?;
        let private_key =
            PKey::from_rsa(rsa).map_err(|e| anyhow!("Failed to create private key: {}", e))?;

        let mut builder =
            X509::builder().map_err(|e| anyhow!("Failed to create X509 builder: {}", e))?;
        builder
            .set_version(X509_VERSION_3)
            .map_err(|e| anyhow!("Failed to set version: {}", e))?;
        let serial = random_serial()?;
        builder.set_serial_number(&serial)?;

        let name = build_x509_name(&self.dn)?;
        builder
            .set_subject_name(&name)
            .map_err(|e| anyhow!("Failed to set subject: {}", e))?;
        builder
            .set_issuer_name(&name)
            .map_err(|e| anyhow!("Failed to set issuer: {}", e))?;

        let not_before = openssl::asn1::Asn1Time::days_from_now(0)
            .map_err(|e| anyhow!("Failed to create not_before: {}", e))?;
        builder
            .set_not_before(&not_before)
            .map_err(|e| anyhow!("Failed to set not_before: {}", e))?;
        let not_after = openssl::asn1::Asn1Time::days_from_now(self.validity_days)
            .map_err(|e| anyhow!("Failed to create not_after: {}", e))?;
        builder
            .set_not_after(&not_after)
            .map_err(|e| anyhow!("Failed to set not_after: {}", e))?;

        builder
            .set_pubkey(&private_key)
            .map_err(|e| anyhow!("Failed to set public key: {}", e))?;

        let mut bc = BasicConstraints::new();
        bc.critical().ca().pathlen(CA_PATH_LENGTH);
        builder
            .append_extension(
                bc.build()
                    .map_err(|e| anyhow!("Failed to build BasicConstraints: {}", e))?,
            )
            .map_err(|e| anyhow!("Failed to add BasicConstraints: {}", e))?;

        let mut ku = KeyUsage::new();
        ku.critical();
        ku.key_cert_sign();
        ku.crl_sign();
        ku.digital_signature();
        builder
            .append_extension(
                ku.build()
                    .map_err(|e| anyhow!("Failed to build KeyUsage: {}", e))?,
            )
            .map_err(|e| anyhow!("Failed to add KeyUsage: {}", e))?;

        builder
            .sign(&private_key, MessageDigest::sha256())
            .map_err(|e| anyhow!("Failed to sign certificate: {}", e))?;

        Ok((private_key, builder.build()))
    }
}
