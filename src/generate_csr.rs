//! Certificate signing request generation.
//!
//! Each provisioned entity produces a CSR carrying its subject name and the
//! exact set of DNS/IP identities declared for it. The CA copies that
//! identity set into the issued certificate, so the CSR is the single place
//! a subject's identities are stated.

use anyhow::{anyhow, Result};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::X509Req;

use crate::generate_ca::{build_x509_name, DistinguishedName};

/// Builder for an X.509 certificate signing request.
///
/// The subjectAltName extension lists exactly the DNS names and IP addresses
/// added through [`dns_name`](Self::dns_name) and
/// [`ip_address`](Self::ip_address); when neither is added the extension is
/// omitted entirely (the admin client certificate has no network identity).
pub struct CsrBuilder {
    dn: DistinguishedName,
    dns_names: Vec<String>,
    ip_addresses: Vec<String>,
}

impl CsrBuilder {
    pub fn new(dn: DistinguishedName) -> Self {
        Self {
            dn,
            dns_names: Vec::new(),
            ip_addresses: Vec::new(),
        }
    }

    /// Add a DNS entry to the subjectAltName set
    pub fn dns_name(mut self, name: &str) -> Self {
        self.dns_names.push(name.to_string());
        self
    }

    /// Add an IP entry to the subjectAltName set
    pub fn ip_address(mut self, ip: &str) -> Self {
        self.ip_addresses.push(ip.to_string());
        self
    }

    /// Build the request and self-sign it with the entity's private key.
    pub fn build(self, key: &PKey<Private>) -> Result<X509Req> {
        let mut builder =
            X509Req::builder().map_err(|e| anyhow!("Failed to create request builder: {}", e))?;

        builder
            .set_version(0)
            .map_err(|e| anyhow!("Failed to set request version: {}", e))?;

        let name = build_x509_name(&self.dn)?;
        builder
            .set_subject_name(&name)
            .map_err(|e| anyhow!("Failed to set subject: {}", e))?;
        builder
            .set_pubkey(key)
            .map_err(|e| anyhow!("Failed to set public key: {}", e))?;

        if !self.dns_names.is_empty() || !self.ip_addresses.is_empty() {
            let mut san = SubjectAlternativeName::new();
            for dns in &self.dns_names {
                san.dns(dns);
            }
            for ip in &self.ip_addresses {
                san.ip(ip);
            }
            let extension = san
                .build(&builder.x509v3_context(None))
                .map_err(|e| anyhow!("Failed to build SubjectAlternativeName: {}", e))?;

            let mut extensions = Stack::new()?;
            extensions.push(extension)?;
            builder
                .add_extensions(&extensions)
                .map_err(|e| anyhow!("Failed to add request extensions: {}", e))?;
        }

        builder
            .sign(key, MessageDigest::sha256())
            .map_err(|e| anyhow!("Failed to sign request: {}", e))?;

        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::rsa::Rsa;
    use x509_parser::certification_request::X509CertificationRequest;
    use x509_parser::extensions::{GeneralName, ParsedExtension};
    use x509_parser::prelude::FromDer;

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

    fn test_key() -> PKey<Private> {
        PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
    }

    #[test]
    fn test_request_signature_verifies() {
        let key = test_key();
        let req = CsrBuilder::new(test_dn("node-a")).build(&key).unwrap();

        let public_key = req.public_key().unwrap();
        assert!(req.verify(&public_key).unwrap());
    }

    #[test]
    fn test_request_carries_exact_san_set() {
        let key = test_key();
        let req = CsrBuilder::new(test_dn("node-a"))
            .dns_name("node-a")
            .ip_address("10.0.0.5")
            .build(&key)
            .unwrap();

        let der = req.to_der().unwrap();
        let (_, parsed) = X509CertificationRequest::from_der(&der).unwrap();
        let san = parsed
            .requested_extensions()
            .expect("request should carry extensions")
            .find_map(|ext| match ext {
                ParsedExtension::SubjectAlternativeName(san) => Some(san),
                _ => None,
            })
            .expect("request should carry a SAN extension");

        let mut dns = Vec::new();
        let mut ips = Vec::new();
        for general_name in &san.general_names {
            match general_name {
                GeneralName::DNSName(name) => dns.push(name.to_string()),
                GeneralName::IPAddress(octets) => ips.push(octets.to_vec()),
                other => panic!("unexpected SAN entry: {:?}", other),
            }
        }
        assert_eq!(dns, vec!["node-a".to_string()]);
        assert_eq!(ips, vec![vec![10, 0, 0, 5]]);
    }

    #[test]
    fn test_request_without_identities_has_no_extensions() {
        let key = test_key();
        let req = CsrBuilder::new(test_dn("admin")).build(&key).unwrap();

        let der = req.to_der().unwrap();
        let (_, parsed) = X509CertificationRequest::from_der(&der).unwrap();
        assert!(parsed.requested_extensions().is_none());
    }

    #[test]
    fn test_request_subject_common_name() {
        let key = test_key();
        let req = CsrBuilder::new(test_dn("node-b")).build(&key).unwrap();

        let der = req.to_der().unwrap();
        let (_, parsed) = X509CertificationRequest::from_der(&der).unwrap();
        let cn = parsed
            .certification_request_info
            .subject
            .iter_common_name()
            .next()
            .and_then(|attr| attr.as_str().ok())
            .expect("request should carry a CN");
        assert_eq!(cn, "node-b");
    }
}
